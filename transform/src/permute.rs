//! Loop permutation and generalization of named ops.

use tessera_ir::{GenericOp, KnownBody, Op, Permutation, Region, StructuredOp};
use tracing::debug;

use crate::error::*;

/// Rewrite a named op as an equivalent `Generic` with a known scalar body.
///
/// Generic variants are returned unchanged (with a fresh identity).
pub fn generalize(op: &StructuredOp) -> Result<StructuredOp> {
    let body = match op.op() {
        Op::Generic(_) | Op::IndexedGeneric(_) => return Ok(op.renewed()),
        Op::Copy { .. } => KnownBody::Identity,
        Op::Fill { value, .. } => KnownBody::Constant(*value),
        Op::Dot { .. } | Op::Matvec { .. } | Op::Matmul { .. } | Op::Conv { .. } => KnownBody::MulAdd,
    };
    op.verify()?;
    let operands = op.operands();
    let region = Region::known(
        body,
        operands.iter().map(|o| o.dtype().clone()),
        op.outputs().iter().map(|o| o.dtype().clone()),
    );
    let generic = GenericOp::builder()
        .operands(operands.iter().map(|&o| o.clone()).collect::<Vec<_>>())
        .args_in(op.num_inputs())
        .args_out(op.num_outputs())
        .indexing_maps(op.indexing_maps())
        .iterator_kinds(op.iterator_kinds())
        .region(region)
        .build();
    let generic = StructuredOp::try_generic(generic)?;
    debug!(op.id = %op.id(), generic.id = %generic.id(), op = op.name(), "generalized");
    Ok(generic)
}

/// Reorder the loops of `op`: new loop `i` is old loop `perm[i]`. Maps and iterator kinds
/// follow.
///
/// Named ops have fixed layouts, so a non-identity permutation generalizes them first.
#[tracing::instrument(skip_all, fields(op.id = %op.id(), op = op.name(), ?perm))]
pub fn permute(op: &StructuredOp, perm: &[usize]) -> Result<StructuredOp> {
    op.verify()?;
    let n = op.num_loops();
    let perm = Permutation::new(perm.iter().copied())?;
    if perm.len() != n {
        return Err(tessera_ir::Error::InvalidPermutation { permutation: perm.as_slice().to_vec(), expected: n }.into());
    }
    if perm.is_identity() {
        return Ok(op.renewed());
    }
    if let Op::IndexedGeneric(_) = op.op() {
        return UnsupportedOpSnafu { op: op.name(), reason: "region receives coordinates in loop order" }.fail();
    }

    let generic = generalize(op)?;
    let Op::Generic(g) = generic.op() else {
        return UnsupportedOpSnafu { op: op.name(), reason: "generalization did not yield a generic op" }.fail();
    };
    let permuted = GenericOp {
        indexing_maps: g.indexing_maps.iter().map(|m| m.permute_dims(&perm)).collect(),
        iterator_kinds: perm.apply(&g.iterator_kinds),
        ..g.clone()
    };
    let permuted = StructuredOp::try_generic(permuted)?;
    debug!(permuted.id = %permuted.id(), %perm, "permuted loops");
    Ok(permuted)
}
