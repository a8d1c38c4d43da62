//! Recognition of bilinear reductions as vector contractions.

use smallvec::SmallVec;
use tessera_ir::{Contraction, DType, IteratorKind, KnownBody, Op, Stmt, StructuredOp};
use tracing::debug;

use crate::error::*;

/// Replace `op` with a single contraction `acc += lhs * rhs`.
///
/// Accepts `dot`, `matvec`, `matmul` and generic ops with a multiply-accumulate body over
/// two inputs and one output. All maps must be projected permutations, at least one loop
/// must reduce, and every extent must be static.
#[tracing::instrument(skip_all, fields(op.id = %op.id(), op = op.name()))]
pub fn vectorize(op: &StructuredOp) -> Result<Stmt> {
    op.verify()?;
    let name = op.name();
    match op.op() {
        Op::Dot { .. } | Op::Matvec { .. } | Op::Matmul { .. } => {}
        Op::Generic(g) => {
            if g.region.known_body() != Some(KnownBody::MulAdd) {
                return NotAContractionSnafu { op: name, reason: "body is not a multiply-accumulate" }.fail();
            }
            if g.args_in != 2 || g.args_out != 1 {
                return NotAContractionSnafu { op: name, reason: "expected two inputs and one output" }.fail();
            }
        }
        Op::Conv { .. } => return NotAContractionSnafu { op: name, reason: "window loops" }.fail(),
        Op::Copy { .. } | Op::Fill { .. } | Op::IndexedGeneric(_) => {
            return NotAContractionSnafu { op: name, reason: "not a bilinear reduction" }.fail();
        }
    }

    let kinds = op.iterator_kinds();
    if kinds.contains(&IteratorKind::Window) {
        return NotAContractionSnafu { op: name, reason: "window loops" }.fail();
    }
    if !kinds.contains(&IteratorKind::Reduction) {
        return NotAContractionSnafu { op: name, reason: "no reduction loop" }.fail();
    }
    let maps = op.indexing_maps();
    if !maps.iter().all(|m| m.is_projected_permutation()) {
        return NotAContractionSnafu { op: name, reason: "indexing maps are not projected permutations" }.fail();
    }

    let domain = op.iteration_domain()?;
    let mut shape: SmallVec<[usize; 6]> = SmallVec::with_capacity(domain.len());
    for (dim, extent) in domain.iter().enumerate() {
        let Some(n) = extent.dim.as_static() else {
            return NonStaticShapeSnafu { dim }.fail();
        };
        shape.push(n);
    }

    let operands = op.operands();
    let (lhs, rhs, acc) = (operands[0].clone(), operands[1].clone(), operands[2].clone());
    let compute_dtype = DType::least_upper_dtype(&[lhs.dtype().clone(), rhs.dtype().clone(), acc.dtype().clone()])
        .unwrap_or_else(|| acc.dtype().clone());
    let contraction = Contraction {
        lhs,
        rhs,
        acc,
        indexing_maps: [maps[0].clone(), maps[1].clone(), maps[2].clone()],
        iterator_kinds: kinds,
        shape,
        compute_dtype,
    };
    debug!(shape = ?contraction.shape, dtype = %contraction.compute_dtype, "vectorized contraction");
    Ok(Stmt::Contract(contraction))
}
