//! Iteration spaces of structured operations.
//!
//! Named variants derive their loops and indexing maps from fixed layouts:
//!
//! | op      | loops                                  | maps                                              |
//! |---------|----------------------------------------|---------------------------------------------------|
//! | copy    | `(d0..dr)` parallel                    | permutation or identity per side                  |
//! | fill    | `(d0..dr)` parallel                    | identity                                          |
//! | dot     | `(k)` reduction                        | `(k)`, `(k)`, `()`                                |
//! | matvec  | `(m, k)`                               | `(m, k)`, `(k)`, `(m)`                            |
//! | matmul  | `(m, n, k)`                            | `(m, k)`, `(k, n)`, `(m, n)`                      |
//! | conv    | `(b, x.., k)` par, `(q)` red, `(z..)` window | `(z.., q, k)`, `(b, x*s + z*d.., q)`, `(b, x.., k)` |
//!
//! Generic variants carry their own.

use smallvec::{SmallVec, smallvec};

use crate::affine::{AffineExpr, AffineMap, check_operand_maps};
use crate::error::*;
use crate::nest::IndexExpr;
use crate::op::{Op, StructuredOp};
use crate::types::{Dim, IteratorKind};
use crate::value::{Operand, ValueId};

impl Op {
    /// Rank of the iteration space.
    pub fn num_loops(&self) -> usize {
        match self {
            Op::Copy { output, .. } | Op::Fill { output, .. } => output.rank(),
            Op::Dot { .. } => 1,
            Op::Matvec { .. } => 2,
            Op::Matmul { .. } => 3,
            Op::Conv { output, .. } => 2 * output.rank().max(2) - 1,
            Op::Generic(g) | Op::IndexedGeneric(g) => g.num_loops(),
        }
    }

    pub fn iterator_kinds(&self) -> SmallVec<[IteratorKind; 6]> {
        use IteratorKind::*;
        match self {
            Op::Copy { .. } | Op::Fill { .. } => smallvec![Parallel; self.num_loops()],
            Op::Dot { .. } => smallvec![Reduction],
            Op::Matvec { .. } => smallvec![Parallel, Reduction],
            Op::Matmul { .. } => smallvec![Parallel, Parallel, Reduction],
            Op::Conv { output, .. } => {
                let spatial = conv_spatial_rank(output.rank());
                let mut kinds = smallvec![Parallel; spatial + 2];
                kinds.push(Reduction);
                kinds.extend(std::iter::repeat_n(Window, spatial));
                kinds
            }
            Op::Generic(g) | Op::IndexedGeneric(g) => g.iterator_kinds.clone(),
        }
    }

    /// One map per operand, in operand order.
    pub fn indexing_maps(&self) -> SmallVec<[AffineMap; 4]> {
        match self {
            Op::Copy { input_permutation, output_permutation, output, .. } => {
                let n = output.rank();
                let side = |perm: &Option<_>| perm.as_ref().map_or_else(|| AffineMap::identity(n), AffineMap::permutation);
                smallvec![side(input_permutation), side(output_permutation)]
            }
            Op::Fill { output, .. } => smallvec![AffineMap::identity(output.rank())],
            Op::Dot { .. } => {
                smallvec![dims_map(1, &[0]), dims_map(1, &[0]), dims_map(1, &[])]
            }
            Op::Matvec { .. } => {
                smallvec![dims_map(2, &[0, 1]), dims_map(2, &[1]), dims_map(2, &[0])]
            }
            Op::Matmul { .. } => {
                smallvec![dims_map(3, &[0, 2]), dims_map(3, &[2, 1]), dims_map(3, &[0, 1])]
            }
            Op::Conv { output, strides, dilations, .. } => {
                let spatial = conv_spatial_rank(output.rank());
                let n = 2 * spatial + 3;
                let layout = ConvLayout { spatial };
                let stride = |i: usize| strides.as_ref().and_then(|s| s.get(i).copied()).unwrap_or(1);
                let dilation = |i: usize| dilations.as_ref().and_then(|d| d.get(i).copied()).unwrap_or(1);

                let filter = (0..spatial)
                    .map(|i| AffineExpr::dim(layout.window(i)))
                    .chain([AffineExpr::dim(layout.input_feature()), AffineExpr::dim(layout.output_feature())]);
                let input = std::iter::once(AffineExpr::dim(layout.batch()))
                    .chain((0..spatial).map(|i| {
                        AffineExpr::linear([(layout.spatial(i), stride(i)), (layout.window(i), dilation(i))], 0)
                    }))
                    .chain([AffineExpr::dim(layout.input_feature())]);
                let out = std::iter::once(AffineExpr::dim(layout.batch()))
                    .chain((0..spatial).map(|i| AffineExpr::dim(layout.spatial(i))))
                    .chain([AffineExpr::dim(layout.output_feature())]);

                smallvec![AffineMap::from_parts(n, filter), AffineMap::from_parts(n, input), AffineMap::from_parts(n, out)]
            }
            Op::Generic(g) | Op::IndexedGeneric(g) => g.indexing_maps.clone(),
        }
    }
}

fn dims_map(n: usize, dims: &[usize]) -> AffineMap {
    AffineMap::from_parts(n, dims.iter().map(|&d| AffineExpr::dim(d)))
}

/// Number of sliding-window dims of a conv over rank-`rank` operands.
pub(crate) fn conv_spatial_rank(rank: usize) -> usize {
    rank.saturating_sub(2)
}

/// Loop positions of a conv with `spatial` window dims.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConvLayout {
    pub spatial: usize,
}

impl ConvLayout {
    pub fn batch(self) -> usize {
        0
    }

    pub fn spatial(self, i: usize) -> usize {
        1 + i
    }

    pub fn output_feature(self) -> usize {
        self.spatial + 1
    }

    pub fn input_feature(self) -> usize {
        self.spatial + 2
    }

    pub fn window(self, i: usize) -> usize {
        self.spatial + 3 + i
    }
}

/// Check that every computed coordinate stays inside its operand's static extent.
///
/// Plain `d_k` coordinates bound their loop and hold by construction. Others (conv window
/// reads, offset generic maps) are checked over the static loop extents; a coordinate
/// reading a non-static or empty loop is skipped.
fn check_coordinate_bounds(maps: &[AffineMap], operands: &[&Operand], domain: &[LoopExtent]) -> Result<()> {
    for (operand, (map, value)) in maps.iter().zip(operands).enumerate() {
        for (coordinate, expr) in map.results().iter().enumerate() {
            let Dim::Static(extent) = value.shape()[coordinate] else { continue };
            if expr.as_dim().is_some() {
                continue;
            }
            let spans: Option<SmallVec<[(i64, i64); 2]>> = expr
                .terms()
                .iter()
                .map(|&(d, c)| {
                    let last = domain[d].dim.as_static().filter(|&e| e > 0)? as i64 - 1;
                    Some(if c < 0 { (c * last, 0) } else { (0, c * last) })
                })
                .collect();
            let Some(spans) = spans else { continue };
            let min = expr.constant_term() + spans.iter().map(|s| s.0).sum::<i64>();
            let max = expr.constant_term() + spans.iter().map(|s| s.1).sum::<i64>();
            if min < 0 || max >= extent as i64 {
                return CoordinateOutOfBoundsSnafu { operand, coordinate, min, max, extent }.fail();
            }
        }
    }
    Ok(())
}

/// Where the trip count of one loop comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExtent {
    /// View whose extent bounds the loop.
    pub value: ValueId,
    pub operand: usize,
    /// Dimension of that view.
    pub coordinate: usize,
    pub dim: Dim,
}

impl LoopExtent {
    /// Upper bound of the loop as an index expression (constant when static).
    pub fn bound(&self) -> IndexExpr {
        IndexExpr::extent(self.value, self.coordinate, self.dim)
    }
}

impl StructuredOp {
    pub fn num_loops(&self) -> usize {
        self.op().num_loops()
    }

    pub fn iterator_kinds(&self) -> SmallVec<[IteratorKind; 6]> {
        self.op().iterator_kinds()
    }

    pub fn indexing_maps(&self) -> SmallVec<[AffineMap; 4]> {
        self.op().indexing_maps()
    }

    /// True when any loop accumulates into the outputs.
    pub fn has_reduction(&self) -> bool {
        self.iterator_kinds().iter().any(|k| k.accumulates())
    }

    /// Derive each loop's extent from the operand dims that read it verbatim.
    ///
    /// Static extents win over dynamic ones; two static extents for one loop must agree.
    /// Computed coordinates must stay inside their operand's static extent.
    pub fn iteration_domain(&self) -> Result<SmallVec<[LoopExtent; 6]>> {
        let n = self.num_loops();
        let maps = self.indexing_maps();
        let operands = self.operands();
        let ranks: SmallVec<[usize; 4]> = operands.iter().map(|o| o.rank()).collect();
        check_operand_maps(n, &maps, &ranks)?;

        let mut domain: SmallVec<[Option<LoopExtent>; 6]> = smallvec![None; n];
        for (operand, (map, value)) in maps.iter().zip(&operands).enumerate() {
            for (coordinate, expr) in map.results().iter().enumerate() {
                let Some(loop_dim) = expr.as_dim() else { continue };
                let candidate = LoopExtent { value: value.id, operand, coordinate, dim: value.shape()[coordinate] };
                let slot = &mut domain[loop_dim];
                match slot {
                    None => *slot = Some(candidate),
                    Some(current) => match (current.dim, candidate.dim) {
                        (Dim::Static(a), Dim::Static(b)) if a != b => {
                            return ExtentMismatchSnafu {
                                dim: loop_dim,
                                operand: current.operand,
                                extent: a,
                                other_operand: operand,
                                other_extent: b,
                            }
                            .fail();
                        }
                        (Dim::Static(_), _) => {}
                        (_, Dim::Static(_)) => *slot = Some(candidate),
                        (Dim::Bounded(_), Dim::Dynamic) => *slot = Some(candidate),
                        _ => {}
                    },
                }
            }
        }

        let domain: SmallVec<[LoopExtent; 6]> =
            domain.into_iter().enumerate().map(|(dim, extent)| extent.ok_or(Error::MissingExtent { dim })).collect::<Result<_>>()?;
        check_coordinate_bounds(&maps, &operands, &domain)?;
        Ok(domain)
    }

    /// Static loop extents, if every loop has one.
    pub fn static_loop_ranges(&self) -> Result<Option<SmallVec<[usize; 6]>>> {
        Ok(self.iteration_domain()?.iter().map(|e| e.dim.as_static()).collect())
    }
}
