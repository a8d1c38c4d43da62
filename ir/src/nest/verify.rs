//! Consistency checks for loop IR blocks.

use std::collections::{HashMap, HashSet};

use super::{IndexExpr, LoopVar, ScalarArg, ScalarVar, Stmt};
use crate::error::*;
use crate::value::ValueId;

/// Check loop steps, variable scoping, buffer uniqueness and view ranks, and verify every
/// embedded structured op.
pub fn verify_nest(block: &[Stmt]) -> Result<()> {
    let mut checker = NestChecker::default();
    checker.block(block)
}

#[derive(Default)]
struct NestChecker {
    /// Loop variables currently in scope.
    live_vars: HashSet<LoopVar>,
    /// Every loop variable ever bound; rebinding is rejected.
    bound_vars: HashSet<LoopVar>,
    scalars: HashSet<ScalarVar>,
    /// Ranks of views defined inside the block.
    ranks: HashMap<ValueId, usize>,
    /// Local buffers currently allocated.
    live_buffers: HashSet<ValueId>,
    /// Every local buffer ever allocated.
    buffers: HashSet<ValueId>,
    defined: HashSet<ValueId>,
}

fn malformed<T>(reason: impl Into<String>) -> Result<T> {
    MalformedNestSnafu { reason: reason.into() }.fail()
}

impl NestChecker {
    fn block(&mut self, block: &[Stmt]) -> Result<()> {
        block.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn expr(&self, expr: &IndexExpr) -> Result<()> {
        let mut missing = None;
        expr.visit_vars(&mut |v| {
            if !self.live_vars.contains(&v) {
                missing.get_or_insert(v);
            }
        });
        match missing {
            Some(v) => malformed(format!("loop variable {v} used outside its loop")),
            None => Ok(()),
        }
    }

    fn exprs<'a>(&self, exprs: impl IntoIterator<Item = &'a IndexExpr>) -> Result<()> {
        exprs.into_iter().try_for_each(|e| self.expr(e))
    }

    fn define(&mut self, id: ValueId, rank: usize) -> Result<()> {
        if !self.defined.insert(id) {
            return malformed(format!("view {id} defined twice"));
        }
        self.ranks.insert(id, rank);
        Ok(())
    }

    fn check_rank(&self, id: ValueId, indices: usize) -> Result<()> {
        if self.buffers.contains(&id) && !self.live_buffers.contains(&id) {
            return malformed(format!("local buffer {id} used after release"));
        }
        match self.ranks.get(&id) {
            Some(&rank) if rank != indices => malformed(format!("{indices} indices into rank-{rank} view {id}")),
            _ => Ok(()),
        }
    }

    fn scalar(&self, var: ScalarVar) -> Result<()> {
        if self.scalars.contains(&var) {
            Ok(())
        } else {
            malformed(format!("scalar {var} used before definition"))
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Loop(l) => {
                if l.step <= 0 {
                    return malformed(format!("loop {} has non-positive step {}", l.var, l.step));
                }
                self.exprs([&l.lower, &l.upper])?;
                if !self.bound_vars.insert(l.var) {
                    return malformed(format!("loop variable {} bound twice", l.var));
                }
                self.live_vars.insert(l.var);
                let scalars = self.scalars.clone();
                let result = self.block(&l.body);
                self.scalars = scalars;
                self.live_vars.remove(&l.var);
                result
            }
            Stmt::SubView { result, offsets, sizes, source } => {
                if offsets.len() != sizes.len() || sizes.len() != result.rank() {
                    return malformed(format!(
                        "subview {} has {} offsets, {} sizes, rank {}",
                        result.id,
                        offsets.len(),
                        sizes.len(),
                        result.rank()
                    ));
                }
                self.check_rank(*source, sizes.len())?;
                self.exprs(offsets.iter().chain(sizes))?;
                self.define(result.id, result.rank())
            }
            Stmt::LocalBuffer { buffer, sizes, body } => {
                if sizes.len() != buffer.rank() {
                    return malformed(format!("buffer {} has {} sizes for rank {}", buffer.id, sizes.len(), buffer.rank()));
                }
                self.exprs(sizes)?;
                self.define(buffer.id, buffer.rank())?;
                self.live_buffers.insert(buffer.id);
                self.buffers.insert(buffer.id);
                let result = self.block(body);
                self.live_buffers.remove(&buffer.id);
                result
            }
            Stmt::Op(op) => {
                op.verify()?;
                for operand in op.operands() {
                    self.check_rank(operand.id, operand.rank())?;
                }
                Ok(())
            }
            Stmt::Load { result, source, indices } => {
                self.check_rank(*source, indices.len())?;
                self.exprs(indices)?;
                self.scalars.insert(*result);
                Ok(())
            }
            Stmt::Compute { results, region, args } => {
                for arg in args {
                    match arg {
                        ScalarArg::Value(v) => self.scalar(*v)?,
                        ScalarArg::Index(e) => self.expr(e)?,
                    }
                }
                if args.len() != region.params().len() {
                    return malformed(format!("{} arguments for region {region}", args.len()));
                }
                if results.len() != region.results().len() {
                    return malformed(format!("{} results bound for region {region}", results.len()));
                }
                self.scalars.extend(results.iter().copied());
                Ok(())
            }
            Stmt::Store { value, target, indices } => {
                self.scalar(*value)?;
                self.check_rank(*target, indices.len())?;
                self.exprs(indices)
            }
            Stmt::Contract(c) => {
                for (map, operand) in c.indexing_maps.iter().zip([&c.lhs, &c.rhs, &c.acc]) {
                    if map.num_dims() != c.shape.len() || map.num_results() != operand.rank() {
                        return malformed(format!("contraction map {map} does not fit {}", operand.ty));
                    }
                }
                if c.iterator_kinds.len() != c.shape.len() {
                    return malformed("contraction iterator kinds disagree with its shape");
                }
                Ok(())
            }
            Stmt::LibraryCall { operands, .. } => {
                for operand in operands {
                    self.check_rank(operand.id, operand.rank())?;
                }
                Ok(())
            }
        }
    }
}
