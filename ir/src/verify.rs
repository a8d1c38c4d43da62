//! Structural verification of structured ops.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. operand arity against `args_in`/`args_out` and the map count;
//! 2. copy permutations;
//! 3. every map's domain rank and codomain rank against the operands;
//! 4. iterator-kind count;
//! 5. generic region signature;
//! 6. conv window attributes;
//! 7. element types, fill value, copy shapes;
//! 8. library-call symbols, when a table is supplied.

use smallvec::SmallVec;
use tessera_dtype::DType;

use crate::error::*;
use crate::indexing::conv_spatial_rank;
use crate::library::SymbolTable;
use crate::op::{GenericOp, Op, StructuredOp};
use crate::types::Dim;

type Check = std::result::Result<(), (Invariant, Site)>;

impl StructuredOp {
    pub fn verify(&self) -> Result<()> {
        self.check(None)
    }

    /// Verify, additionally resolving `library_call` against `symbols`.
    pub fn verify_with_symbols(&self, symbols: &dyn SymbolTable) -> Result<()> {
        self.check(Some(symbols))
    }

    fn check(&self, symbols: Option<&dyn SymbolTable>) -> Result<()> {
        let op = self.op();
        let result = check_arity(op)
            .and_then(|()| check_copy_permutations(op))
            .and_then(|num_loops| check_maps(self, num_loops))
            .and_then(|num_loops| check_iterators(self, num_loops))
            .and_then(|()| check_region(op))
            .and_then(|()| check_window(op))
            .and_then(|()| check_element_types(op))
            .and_then(|()| check_copy_shapes(op))
            .and_then(|()| check_library_call(op, symbols));

        result.map_err(|(invariant, site)| {
            tracing::trace!(op.id = %self.id(), op = self.name(), %invariant, %site, "verification failed");
            Error::Verification { op: self.name(), invariant, site }
        })
    }
}

fn check_arity(op: &Op) -> Check {
    let Some(g) = op.as_generic() else { return Ok(()) };
    if g.args_in + g.args_out != g.operands.len() {
        return Err((Invariant::OperandCount, Site::Op));
    }
    if g.args_out == 0 {
        return Err((Invariant::OperandCount, Site::Op));
    }
    if g.indexing_maps.len() != g.operands.len() {
        return Err((Invariant::MapCount, Site::Op));
    }
    Ok(())
}

/// Returns the iteration-space rank the maps are checked against.
fn check_copy_permutations(op: &Op) -> std::result::Result<usize, (Invariant, Site)> {
    match op {
        Op::Copy { input, output, input_permutation, output_permutation } => {
            if let Some(p) = input_permutation
                && p.len() != input.rank()
            {
                return Err((Invariant::CopyPermutation, Site::Operand(0)));
            }
            if let Some(p) = output_permutation
                && p.len() != output.rank()
            {
                return Err((Invariant::CopyPermutation, Site::Operand(1)));
            }
            Ok(output.rank())
        }
        // The maps define the domain; a disagreeing kind list is reported as IteratorCount.
        Op::Generic(g) | Op::IndexedGeneric(g) => Ok(generic_domain_rank(g)),
        _ => Ok(op.num_loops()),
    }
}

fn generic_domain_rank(g: &GenericOp) -> usize {
    g.indexing_maps.first().map_or(g.iterator_kinds.len(), |m| m.num_dims())
}

fn check_maps(op: &StructuredOp, num_loops: usize) -> std::result::Result<usize, (Invariant, Site)> {
    let maps = op.indexing_maps();
    for (idx, (map, operand)) in maps.iter().zip(op.operands()).enumerate() {
        if map.num_dims() != num_loops {
            return Err((Invariant::MapDomain, Site::Operand(idx)));
        }
        if map.num_results() != operand.rank() {
            return Err((Invariant::OperandRank, Site::Operand(idx)));
        }
    }
    Ok(num_loops)
}

fn check_iterators(op: &StructuredOp, num_loops: usize) -> Check {
    if op.iterator_kinds().len() != num_loops {
        return Err((Invariant::IteratorCount, Site::Op));
    }
    Ok(())
}

fn check_region(op: &Op) -> Check {
    let (g, indexed) = match op {
        Op::Generic(g) => (g, false),
        Op::IndexedGeneric(g) => (g, true),
        _ => return Ok(()),
    };
    let region = &g.region;
    let num_index = if indexed { g.num_loops() } else { 0 };
    let expected: SmallVec<[DType; 8]> = std::iter::repeat_n(DType::Index, num_index)
        .chain(g.operands.iter().map(|o| o.dtype().clone()))
        .collect();

    if region.params().len() != expected.len() {
        return Err((Invariant::RegionSignature, Site::Op));
    }
    if let Some(pos) = region.params().iter().zip(&expected).position(|(p, e)| p != e) {
        let site = if pos < num_index { Site::Dim(pos) } else { Site::Operand(pos - num_index) };
        return Err((Invariant::RegionSignature, site));
    }
    if region.results().len() != g.args_out {
        return Err((Invariant::RegionResults, Site::Op));
    }
    if let Some(pos) = region.results().iter().zip(g.outputs()).position(|(r, o)| r != o.dtype()) {
        return Err((Invariant::RegionResults, Site::Operand(g.args_in + pos)));
    }
    Ok(())
}

fn check_window(op: &Op) -> Check {
    let Op::Conv { filter, input, output, strides, dilations } = op else { return Ok(()) };
    let rank = output.rank();
    if rank < 3 {
        return Err((Invariant::OperandRank, Site::Operand(2)));
    }
    for (idx, operand) in [filter, input].into_iter().enumerate() {
        if operand.rank() != rank {
            return Err((Invariant::OperandRank, Site::Operand(idx)));
        }
    }
    let spatial = conv_spatial_rank(rank);
    for attr in [strides, dilations].into_iter().flatten() {
        if attr.len() != spatial {
            return Err((Invariant::WindowAttributes, Site::Op));
        }
        if let Some(pos) = attr.iter().position(|&v| v <= 0) {
            return Err((Invariant::WindowAttributes, Site::Dim(pos)));
        }
    }
    Ok(())
}

fn check_element_types(op: &Op) -> Check {
    match op {
        Op::Fill { output, value } => {
            if !value.fits(output.dtype()) {
                return Err((Invariant::FillValue, Site::Operand(0)));
            }
            Ok(())
        }
        Op::Copy { input, output, .. } => {
            if !DType::can_safe_cast(input.dtype(), output.dtype()) {
                return Err((Invariant::ElementType, Site::Operand(0)));
            }
            Ok(())
        }
        Op::Dot { .. } | Op::Matvec { .. } | Op::Matmul { .. } | Op::Conv { .. } => {
            let operands = op.operands();
            let acc = operands[2].dtype();
            if let Some(pos) = operands[..2].iter().position(|o| !DType::can_safe_cast(o.dtype(), acc)) {
                return Err((Invariant::ElementType, Site::Operand(pos)));
            }
            Ok(())
        }
        Op::Generic(_) | Op::IndexedGeneric(_) => Ok(()),
    }
}

/// Per loop dim, the static extents the two sides of a copy assign it must agree.
fn check_copy_shapes(op: &Op) -> Check {
    let Op::Copy { .. } = op else { return Ok(()) };
    let maps = op.indexing_maps();
    let operands = op.operands();
    let mut extents: SmallVec<[Option<usize>; 6]> = SmallVec::from_elem(None, op.num_loops());
    for (idx, (map, operand)) in maps.iter().zip(&operands).enumerate() {
        for (coordinate, &dim) in operand.shape().iter().enumerate() {
            let (Some(loop_dim), Dim::Static(extent)) = (map.result_dim(coordinate), dim) else { continue };
            match extents[loop_dim] {
                Some(seen) if seen != extent => {
                    return Err((Invariant::CopyShape, Site::OperandDim { operand: idx, dim: coordinate }));
                }
                _ => extents[loop_dim] = Some(extent),
            }
        }
    }
    Ok(())
}

fn check_library_call(op: &Op, symbols: Option<&dyn SymbolTable>) -> Check {
    let (Some(symbols), Some(call)) = (symbols, op.as_generic().and_then(|g| g.library_call.as_ref())) else {
        return Ok(());
    };
    if !symbols.contains_symbol(call.as_str()) {
        return Err((Invariant::LibraryCall, Site::Op));
    }
    Ok(())
}
