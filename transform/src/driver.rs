//! Fixpoint rewrite driver.
//!
//! [`Rewriter::run`] repeatedly picks the first op (in pre-order) that some pattern accepts,
//! applies the pattern and splices the result in place of the op, until nothing matches.
//! Recoverable failures are remembered per (op, pattern) and skipped; anything else aborts
//! the run. Every applied rewrite is checked with the nest verifier before it is committed.

use std::collections::HashSet;

use bon::bon;
use smallvec::SmallVec;
use tessera_ir::nest::{self, verify_nest};
use tessera_ir::{OpId, Stmt, StructuredOp, ValueId};
use tracing::{debug, trace, warn};

use crate::config::TransformConfig;
use crate::error::*;
use crate::fuse::reads_output;
use crate::marker::{Marker, MarkerFilter, MarkerTable};
use crate::request::{RewriteKind, RewriteRequest};

/// A rewrite kind with the ops it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub kind: RewriteKind,
    pub filter: MarkerFilter,
    /// Op names the pattern is restricted to; empty accepts every op.
    pub ops: SmallVec<[&'static str; 2]>,
}

#[bon]
impl Pattern {
    #[builder]
    pub fn builder(
        kind: RewriteKind,
        #[builder(default)] filter: MarkerFilter,
        #[builder(default, into)] ops: SmallVec<[&'static str; 2]>,
    ) -> Self {
        Self { kind, filter, ops }
    }

    pub fn new(kind: RewriteKind, filter: MarkerFilter) -> Self {
        Self { kind, filter, ops: SmallVec::new() }
    }

    fn accepts(&self, markers: &MarkerTable, op: &StructuredOp) -> bool {
        (self.ops.is_empty() || self.ops.contains(&op.name())) && self.filter.accepts(markers, op)
    }

    /// Marker for the ops this pattern produces.
    fn replacement(&self) -> Marker {
        self.filter.replacement.clone().unwrap_or_else(|| Marker::new(self.kind.name()))
    }
}

/// Applies rewrite requests and pattern sets to blocks of loop IR.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    pub markers: MarkerTable,
    pub config: TransformConfig,
    failed: HashSet<(OpId, usize)>,
}

impl Rewriter {
    pub fn new(config: TransformConfig) -> Self {
        Self { markers: MarkerTable::new(), config, failed: HashSet::new() }
    }

    /// Apply `patterns` until no pattern matches. Returns the number of rewrites applied.
    #[tracing::instrument(skip_all, fields(patterns = patterns.len()))]
    pub fn run(&mut self, block: &mut Vec<Stmt>, patterns: &[Pattern]) -> Result<usize> {
        let limit = self.config.max_rewrites;
        let mut applied = 0;
        while let Some((index, request)) = self.next_match(block, patterns) {
            if applied >= limit {
                return RewriteLimitExceededSnafu { limit }.fail();
            }
            match self.apply(block, &request) {
                Ok(()) => applied += 1,
                Err(err) if err.is_recoverable() => {
                    warn!(op.id = %request.target, pattern = request.kind.name(), %err, "skipping pattern");
                    self.failed.insert((request.target, index));
                }
                Err(err) => return Err(err),
            }
        }
        verify_nest(block)?;
        debug!(applied, "rewrite fixpoint reached");
        Ok(applied)
    }

    fn next_match(&self, block: &[Stmt], patterns: &[Pattern]) -> Option<(usize, RewriteRequest)> {
        nest::ops(block).into_iter().find_map(|op| {
            patterns.iter().enumerate().find_map(|(index, pattern)| {
                if self.failed.contains(&(op.id(), index)) || !pattern.accepts(&self.markers, op) {
                    return None;
                }
                trace!(op.id = %op.id(), pattern = pattern.kind.name(), "pattern matched");
                let request = RewriteRequest::new(op.id(), pattern.kind.clone()).with_marker(pattern.replacement());
                Some((index, request))
            })
        })
    }

    /// Apply one request to the op `request.target` inside `block`.
    ///
    /// On failure `block` is left untouched.
    #[tracing::instrument(skip_all, fields(op.id = %request.target, kind = request.kind.name()))]
    pub fn apply(&mut self, block: &mut Vec<Stmt>, request: &RewriteRequest) -> Result<()> {
        let path = find_op(block, request.target).unwrap_or_default();
        let Some((&position, parents)) = path.split_last() else {
            return UnknownTargetSnafu { target: request.target }.fail();
        };
        let mut rewritten = block.clone();
        let Some(container) = body_at(&mut rewritten, parents) else {
            return UnknownTargetSnafu { target: request.target }.fail();
        };
        let Some(op) = container.get(position).and_then(Stmt::as_op).cloned() else {
            return UnknownTargetSnafu { target: request.target }.fail();
        };

        let mut erase = None;
        let producer = match &request.kind {
            RewriteKind::Fuse { operand, producer, .. } => {
                let found = find_producer(container, position, &op, *operand, *producer)?;
                erase = producer_erasable(container, found, position, &op, *operand)?.then_some(found);
                container.get(found).and_then(Stmt::as_op).cloned()
            }
            _ => None,
        };

        let stmts = request.kind.apply(&op, producer.as_ref(), &self.config)?.into_stmts();
        let new_ops: Vec<OpId> = nest::ops(&stmts).iter().map(|o| o.id()).collect();
        container.splice(position..=position, stmts);
        if let Some(found) = erase {
            container.remove(found);
        }
        verify_nest(&rewritten)?;

        *block = rewritten;
        if let Some(marker) = &request.marker {
            for id in &new_ops {
                self.markers.mark(*id, marker.clone());
            }
        }
        debug!(new_ops = new_ops.len(), producer_erased = erase.is_some(), "rewrite applied");
        Ok(())
    }
}

/// Index path to the statement holding op `target`.
fn find_op(block: &[Stmt], target: OpId) -> Option<Vec<usize>> {
    for (idx, stmt) in block.iter().enumerate() {
        if stmt.as_op().is_some_and(|op| op.id() == target) {
            return Some(vec![idx]);
        }
        if let Some(mut path) = stmt.body().and_then(|body| find_op(body, target)) {
            path.insert(0, idx);
            return Some(path);
        }
    }
    None
}

fn body_at<'a>(block: &'a mut Vec<Stmt>, path: &[usize]) -> Option<&'a mut Vec<Stmt>> {
    match path.split_first() {
        None => Some(block),
        Some((&idx, rest)) => body_at(block.get_mut(idx)?.body_mut()?, rest),
    }
}

/// The op writing the consumer operand: the requested one, or the nearest preceding writer.
fn find_producer(
    block: &[Stmt],
    consumer_pos: usize,
    consumer: &StructuredOp,
    operand: usize,
    requested: Option<OpId>,
) -> Result<usize> {
    let Some(value) = consumer.operand(operand).map(|o| o.id) else {
        return UnsupportedOpSnafu { op: consumer.name(), reason: "fused operand index out of range" }.fail();
    };
    let writes = |stmt: &Stmt| stmt.as_op().is_some_and(|op| op.outputs().iter().any(|o| o.id == value));
    let found = match requested {
        Some(id) => block[..consumer_pos].iter().position(|s| s.as_op().is_some_and(|op| op.id() == id)),
        None => block[..consumer_pos].iter().rposition(writes),
    };
    match found {
        Some(pos) if writes(&block[pos]) => Ok(pos),
        Some(pos) => {
            let producer = block[pos].as_op().map_or(consumer.id(), StructuredOp::id);
            NotAProducerSnafu { producer, value }.fail()
        }
        None => NotAProducerSnafu { producer: requested.unwrap_or(consumer.id()), value }.fail(),
    }
}

/// Whether the fused nest fully replaces the producer at `producer_pos`.
///
/// Statements before the producer only see the buffer's earlier contents, so they never keep
/// it. Fusing into an input recomputes the producer's output tile into a temporary, so the
/// producer stays while its output is read by any later statement or by another operand of
/// the consumer. Fusing into an output makes the consumer nest write the buffer itself, so
/// only uses between producer and consumer keep it.
/// A producer that reads its own output cannot be both kept and fused.
fn producer_erasable(
    block: &[Stmt],
    producer_pos: usize,
    consumer_pos: usize,
    consumer: &StructuredOp,
    operand: usize,
) -> Result<bool> {
    let Some(producer) = block[producer_pos].as_op() else { return Ok(false) };
    let outputs: SmallVec<[ValueId; 2]> = producer.outputs().iter().map(|o| o.id).collect();
    let into_output = consumer.is_output(operand);
    let used_later = block.iter().enumerate().any(|(pos, stmt)| {
        let outside = pos > producer_pos && pos != consumer_pos && (!into_output || pos < consumer_pos);
        outside && outputs.iter().any(|&v| references(stmt, v))
    });
    let used_by_consumer = consumer
        .operands()
        .iter()
        .enumerate()
        .any(|(idx, o)| idx != operand && outputs.contains(&o.id));
    let used_elsewhere = used_later || used_by_consumer;
    let erasable = outputs.len() == 1 && !used_elsewhere;
    if !erasable && reads_output(producer) {
        return UnfusableIndexingSnafu {
            reason: format!("accumulating producer {} is still needed outside the fused nest", producer.id()),
        }
        .fail();
    }
    Ok(erasable)
}

/// `stmt` (or anything nested in it) reads or writes `value`.
fn references(stmt: &Stmt, value: ValueId) -> bool {
    let mut found = false;
    nest::walk(std::slice::from_ref(stmt), &mut |s| {
        found |= s.reads().contains(&value) || matches!(s, Stmt::Store { target, .. } if *target == value);
    });
    found
}
