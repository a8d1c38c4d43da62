//! Lowering of structured ops to explicit loop nests and library calls.
//!
//! One loop per iteration dim, outermost first. The innermost body loads every operand the
//! scalar computation reads, applies it and stores the outputs, all at the coordinates the
//! indexing maps give for the current induction values.

use smallvec::SmallVec;
use tessera_ir::{
    ConstValue, IndexExpr, KnownBody, Loop, LoopForm, LoopVar, Op, Operand, Region, ScalarArg, ScalarVar, Stmt,
    StructuredOp, Symbol,
};
use tracing::{debug, trace};

use crate::config::TransformConfig;
use crate::error::*;

/// Lower `op` to a loop nest of the given form.
///
/// `LoopForm::Affine` fails with [`TransformError::NonAffineBound`] when some trip count is
/// not expressible as an affine bound.
#[tracing::instrument(skip_all, fields(op.id = %op.id(), op = op.name(), %form))]
pub fn lower_to_loops(op: &StructuredOp, form: LoopForm) -> Result<Vec<Stmt>> {
    op.verify()?;
    let domain = op.iteration_domain()?;
    let bounds: SmallVec<[IndexExpr; 6]> = domain.iter().map(|e| e.bound()).collect();
    if form == LoopForm::Affine
        && let Some(dim) = bounds.iter().position(|b| !b.is_affine())
    {
        return NonAffineBoundSnafu { dim }.fail();
    }

    let vars: SmallVec<[LoopVar; 6]> = bounds.iter().map(|_| LoopVar::fresh()).collect();
    let coords: SmallVec<[IndexExpr; 6]> = vars.iter().map(|&v| IndexExpr::var(v)).collect();
    let mut body = scalar_body(op, &coords);

    for (var, upper) in vars.iter().zip(bounds).rev() {
        body = vec![Stmt::Loop(Loop { var: *var, lower: IndexExpr::Const(0), upper, step: 1, form, body })];
    }
    debug!(loops = vars.len(), "lowered to loops");
    Ok(body)
}

/// Lower with the configured form, falling back to generic loops when affine bounds are
/// not available.
pub fn lower_preferred(op: &StructuredOp, config: &TransformConfig) -> Result<Vec<Stmt>> {
    match lower_to_loops(op, config.loop_form) {
        Err(TransformError::NonAffineBound { dim }) => {
            trace!(op.id = %op.id(), dim, "affine bound unavailable, emitting generic loops");
            lower_to_loops(op, LoopForm::Generic)
        }
        other => other,
    }
}

/// Replace `op` with a call to its library kernel.
pub fn lower_to_library_call(op: &StructuredOp) -> Result<Stmt> {
    op.verify()?;
    let callee = Symbol::new(op.library_call_name());
    debug!(op.id = %op.id(), %callee, "lowered to library call");
    Ok(Stmt::LibraryCall { callee, operands: op.operands().into_iter().cloned().collect() })
}

/// Coordinates of operand `idx` at the loop point `coords`.
fn operand_indices(op: &StructuredOp, idx: usize, coords: &[IndexExpr]) -> SmallVec<[IndexExpr; 4]> {
    op.indexing_maps()[idx].results().iter().map(|e| IndexExpr::from_affine(e, coords)).collect()
}

fn load(op: &StructuredOp, idx: usize, operand: &Operand, coords: &[IndexExpr], body: &mut Vec<Stmt>) -> ScalarVar {
    let result = ScalarVar::fresh();
    body.push(Stmt::Load { result, source: operand.id, indices: operand_indices(op, idx, coords) });
    result
}

fn store(op: &StructuredOp, idx: usize, operand: &Operand, value: ScalarVar, coords: &[IndexExpr], body: &mut Vec<Stmt>) {
    body.push(Stmt::Store { value, target: operand.id, indices: operand_indices(op, idx, coords) });
}

fn scalar_body(op: &StructuredOp, coords: &[IndexExpr]) -> Vec<Stmt> {
    let mut body = Vec::new();
    match op.op() {
        Op::Copy { input, output, .. } => {
            let value = load(op, 0, input, coords, &mut body);
            store(op, 1, output, value, coords, &mut body);
        }
        Op::Fill { output, value } => {
            let result = ScalarVar::fresh();
            let region = Region::known(KnownBody::Constant(*value), [], [output.dtype().clone()]);
            body.push(Stmt::Compute { results: SmallVec::from_elem(result, 1), region, args: SmallVec::new() });
            store(op, 0, output, result, coords, &mut body);
        }
        Op::Dot { .. } | Op::Matvec { .. } | Op::Matmul { .. } | Op::Conv { .. } => {
            let operands = op.operands();
            let args: SmallVec<[ScalarArg; 6]> = operands
                .iter()
                .enumerate()
                .map(|(idx, operand)| ScalarArg::Value(load(op, idx, operand, coords, &mut body)))
                .collect();
            let acc = operands[2];
            let result = ScalarVar::fresh();
            let region = Region::known(
                KnownBody::MulAdd,
                operands.iter().map(|o| o.dtype().clone()),
                [acc.dtype().clone()],
            );
            body.push(Stmt::Compute { results: SmallVec::from_elem(result, 1), region, args });
            store(op, 2, acc, result, coords, &mut body);
        }
        Op::Generic(g) | Op::IndexedGeneric(g) => {
            let indexed = matches!(op.op(), Op::IndexedGeneric(_));
            let mut args: SmallVec<[ScalarArg; 6]> = SmallVec::new();
            if indexed {
                args.extend(coords.iter().cloned().map(ScalarArg::Index));
            }
            for (idx, operand) in g.operands.iter().enumerate() {
                args.push(ScalarArg::Value(load(op, idx, operand, coords, &mut body)));
            }
            let results: SmallVec<[ScalarVar; 2]> = (0..g.args_out).map(|_| ScalarVar::fresh()).collect();
            body.push(Stmt::Compute { results: results.clone(), region: g.region.clone(), args });
            for (i, (output, value)) in g.outputs().iter().zip(results).enumerate() {
                store(op, g.args_in + i, output, value, coords, &mut body);
            }
        }
    }
    body
}

/// Zero of the element type of `operand`.
pub(crate) fn zero_of(operand: &Operand) -> ConstValue {
    ConstValue::zero(operand.dtype().base())
}
