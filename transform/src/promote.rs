//! Promotion of operands into local buffers.
//!
//! Each promoted operand gets a scoped local buffer. By default the buffer covers the full
//! tile (the static upper bound of every extent) and the op works on a partial view of it
//! sized like the original operand; with `promote_dynamic` the buffer has the operand's
//! exact runtime size. Inputs and outputs are copied in before the op, outputs are copied
//! back after it. Buffers are released when their scope ends.

use itertools::Itertools;
use smallvec::SmallVec;
use tessera_ir::{IndexExpr, Operand, Stmt, StructuredOp, ViewType};
use tracing::debug;

use crate::config::TransformConfig;
use crate::error::*;
use crate::lower::zero_of;

/// One promoted operand.
struct Promotion {
    index: usize,
    original: Operand,
    buffer: Operand,
    sizes: SmallVec<[IndexExpr; 4]>,
    /// View the op uses; the partial view of `buffer` for full-tile promotion.
    partial: Option<Stmt>,
    view: Operand,
}

/// Promote the operands at `operands` (positions in operand order) of `op`.
#[tracing::instrument(skip_all, fields(op.id = %op.id(), op = op.name(), ?operands))]
pub fn promote(op: &StructuredOp, operands: &[usize], config: &TransformConfig) -> Result<Vec<Stmt>> {
    op.verify()?;
    let all = op.operands();
    if operands.iter().any(|&idx| idx >= all.len()) {
        return UnsupportedOpSnafu { op: op.name(), reason: "promoted operand index out of range" }.fail();
    }

    let promotions = operands
        .iter()
        .copied()
        .sorted()
        .dedup()
        .map(|idx| promotion(idx, all[idx], config))
        .collect::<Result<Vec<_>>>()?;

    let replaced: SmallVec<[Operand; 4]> = all
        .iter()
        .enumerate()
        .map(|(idx, &o)| promotions.iter().find(|p| p.index == idx).map_or_else(|| o.clone(), |p| p.view.clone()))
        .collect();
    let promoted = op.with_operands(replaced);

    let mut inner = Vec::new();
    if config.promote_zero_fill && !config.promote_dynamic {
        for p in &promotions {
            inner.push(Stmt::Op(StructuredOp::fill(p.buffer.clone(), zero_of(&p.buffer))));
        }
    }
    for p in &promotions {
        inner.push(Stmt::Op(StructuredOp::copy(p.original.clone(), p.view.clone())));
    }
    inner.push(Stmt::Op(promoted));
    for p in promotions.iter().filter(|p| op.is_output(p.index)) {
        inner.push(Stmt::Op(StructuredOp::copy(p.view.clone(), p.original.clone())));
    }

    let count = promotions.len();
    let block = promotions.into_iter().rev().fold(inner, |body, p| {
        let body = p.partial.into_iter().chain(body).collect();
        vec![Stmt::LocalBuffer { buffer: p.buffer, sizes: p.sizes, body }]
    });
    debug!(promoted = count, dynamic = config.promote_dynamic, "promoted operands");
    Ok(block)
}

fn promotion(index: usize, original: &Operand, config: &TransformConfig) -> Result<Promotion> {
    let exact: SmallVec<[IndexExpr; 4]> = original
        .shape()
        .iter()
        .enumerate()
        .map(|(coordinate, &dim)| IndexExpr::extent(original.id, coordinate, dim))
        .collect();

    if config.promote_dynamic {
        let buffer = Operand::new(ViewType::new(original.dtype().clone(), original.shape().iter().copied()));
        return Ok(Promotion {
            index,
            original: original.clone(),
            view: buffer.clone(),
            buffer,
            sizes: exact,
            partial: None,
        });
    }

    let mut full = SmallVec::<[usize; 4]>::new();
    for (dim, extent) in original.shape().iter().enumerate() {
        let Some(bound) = extent.upper_bound() else {
            return NonStaticShapeSnafu { dim }.fail();
        };
        full.push(bound);
    }
    let buffer = Operand::new(ViewType::from_static(original.dtype().clone(), &full));
    let view = Operand::new(buffer.ty.narrowed(original.shape().iter().copied()));
    let partial = Stmt::SubView {
        result: view.clone(),
        source: buffer.id,
        offsets: SmallVec::from_elem(IndexExpr::Const(0), original.rank()),
        sizes: exact,
    };
    Ok(Promotion {
        index,
        original: original.clone(),
        buffer,
        sizes: full.iter().map(|&n| IndexExpr::Const(n as i64)).collect(),
        partial: Some(partial),
        view,
    })
}
