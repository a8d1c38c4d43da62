//! Tiling.
//!
//! Tiling with sizes `ts` produces one tile loop per non-zero size, stepping by that size,
//! and an inner op of the same variant whose operands are subviews narrowed to the current
//! tile. Loop `d` of the inner op covers `[iv_d, iv_d + min(ts_d, E_d - iv_d))` of the
//! original loop; untiled loops keep their full range.

use smallvec::SmallVec;
use tessera_ir::{
    AffineMap, IndexExpr, Loop, LoopForm, LoopVar, Operand, Permutation, Stmt, StructuredOp, ValueId, ViewType,
};
use tracing::debug;

use crate::error::*;

/// One loop of a tile nest.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLoop {
    pub var: LoopVar,
    /// Loop of the tiled op this loop steps over.
    pub dim: usize,
    pub upper: IndexExpr,
    pub step: usize,
}

/// A subview of one operand, restricted to the current tile.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandView {
    pub operand: usize,
    pub source: ValueId,
    pub result: Operand,
    pub offsets: SmallVec<[IndexExpr; 4]>,
    pub sizes: SmallVec<[IndexExpr; 4]>,
}

impl OperandView {
    pub fn to_stmt(&self) -> Stmt {
        Stmt::SubView {
            result: self.result.clone(),
            source: self.source,
            offsets: self.offsets.clone(),
            sizes: self.sizes.clone(),
        }
    }
}

/// Range of one loop inside a tile: start offset and length.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoopRange {
    pub offset: IndexExpr,
    pub size: IndexExpr,
    /// Narrowed by the tile (as opposed to the full loop range).
    pub narrowed: bool,
}

/// Result of [`tile`].
#[derive(Debug, Clone, PartialEq)]
pub struct TiledOp {
    /// Tile loops, outermost first.
    pub loops: SmallVec<[TileLoop; 6]>,
    /// Subviews of the narrowed operands, in operand order.
    pub views: SmallVec<[OperandView; 4]>,
    /// The op over the subviews.
    pub op: StructuredOp,
    pub original: StructuredOp,
}

impl TiledOp {
    /// Subview feeding operand `operand` of the inner op, if that operand was narrowed.
    pub fn view(&self, operand: usize) -> Option<&OperandView> {
        self.views.iter().find(|v| v.operand == operand)
    }

    /// Tile-loop body: the subviews followed by the inner op.
    pub fn body(&self) -> Vec<Stmt> {
        self.views.iter().map(OperandView::to_stmt).chain([Stmt::Op(self.op.clone())]).collect()
    }

    pub fn into_nest(self) -> TileNest {
        let body = self.body();
        TileNest { loops: self.loops, body }
    }

    pub fn into_stmts(self) -> Vec<Stmt> {
        self.into_nest().into_stmts()
    }
}

/// Tile loops around an arbitrary body.
#[derive(Debug, Clone, PartialEq)]
pub struct TileNest {
    pub loops: SmallVec<[TileLoop; 6]>,
    pub body: Vec<Stmt>,
}

impl TileNest {
    /// Nest the loops around the body. Loops with affine bounds use the affine form.
    pub fn into_stmts(self) -> Vec<Stmt> {
        self.loops.into_iter().rev().fold(self.body, |body, l| {
            let form = if l.upper.is_affine() { LoopForm::Affine } else { LoopForm::Generic };
            vec![Stmt::Loop(Loop {
                var: l.var,
                lower: IndexExpr::Const(0),
                upper: l.upper,
                step: l.step as i64,
                form,
                body,
            })]
        })
    }
}

/// Tile `op` with `sizes` (missing entries and zeros leave a loop untiled). `interchange`
/// reorders the generated tile loops: tile loop `i` steps over the `interchange[i]`-th tiled
/// dim.
#[tracing::instrument(skip_all, fields(op.id = %op.id(), op = op.name(), ?sizes))]
pub fn tile(op: &StructuredOp, sizes: &[usize], interchange: Option<&[usize]>) -> Result<TiledOp> {
    op.verify()?;
    let n = op.num_loops();
    if sizes.len() > n {
        return TileSizeCountSnafu { given: sizes.len(), loops: n }.fail();
    }
    let kinds = op.iterator_kinds();
    for (dim, &size) in sizes.iter().enumerate() {
        if size != 0 && !kinds[dim].is_tileable() {
            return IllegalTileDimensionSnafu { dim, kind: kinds[dim], size }.fail();
        }
    }

    let domain = op.iteration_domain()?;
    let tiled: SmallVec<[usize; 6]> = (0..sizes.len()).filter(|&d| sizes[d] != 0).collect();
    let order: SmallVec<[usize; 6]> = match interchange {
        Some(perm) => {
            let perm = Permutation::new(perm.iter().copied())?;
            if perm.len() != tiled.len() {
                return Err(tessera_ir::Error::InvalidPermutation {
                    permutation: perm.as_slice().to_vec(),
                    expected: tiled.len(),
                }
                .into());
            }
            perm.apply(&tiled).into_iter().collect()
        }
        None => tiled.clone(),
    };

    let loops: SmallVec<[TileLoop; 6]> = order
        .iter()
        .map(|&dim| TileLoop { var: LoopVar::fresh(), dim, upper: domain[dim].bound(), step: sizes[dim] })
        .collect();

    let ranges: SmallVec<[LoopRange; 6]> = (0..n)
        .map(|dim| match loops.iter().find(|l| l.dim == dim) {
            Some(l) => LoopRange {
                offset: IndexExpr::var(l.var),
                size: tile_extent(l.step, &l.upper, l.var),
                narrowed: true,
            },
            None => LoopRange { offset: IndexExpr::Const(0), size: domain[dim].bound(), narrowed: false },
        })
        .collect();

    let views = narrow_operands(op, &ranges, &[])?;
    let inner = with_views(op, &views, &[]);
    debug!(tile_loops = loops.len(), narrowed = views.len(), inner.id = %inner.id(), "tiled");
    Ok(TiledOp { loops, views, op: inner, original: op.clone() })
}

/// Length of a tile of size `size` starting at `iv` within `[0, upper)`.
fn tile_extent(size: usize, upper: &IndexExpr, iv: LoopVar) -> IndexExpr {
    let size_expr = IndexExpr::Const(size as i64);
    match upper.as_const() {
        Some(extent) if size as i64 >= extent => IndexExpr::Const(extent),
        Some(extent) if extent % size as i64 == 0 => size_expr,
        _ => size_expr.min(upper.clone().sub(IndexExpr::var(iv))),
    }
}

/// Subviews for every operand whose map reads a narrowed loop. Operands listed in `skip`
/// are left alone.
pub(crate) fn narrow_operands(
    op: &StructuredOp,
    ranges: &[LoopRange],
    skip: &[usize],
) -> Result<SmallVec<[OperandView; 4]>> {
    let maps = op.indexing_maps();
    let mut views = SmallVec::new();
    for (idx, (map, operand)) in maps.iter().zip(op.operands()).enumerate() {
        if skip.contains(&idx) || !map.used_dims().iter().any(|&d| ranges[d].narrowed) {
            continue;
        }
        views.push(narrow_operand(op, idx, map, operand, ranges)?);
    }
    Ok(views)
}

fn narrow_operand(
    op: &StructuredOp,
    idx: usize,
    map: &AffineMap,
    operand: &Operand,
    ranges: &[LoopRange],
) -> Result<OperandView> {
    let mut offsets = SmallVec::new();
    let mut sizes = SmallVec::new();
    for (coordinate, expr) in map.results().iter().enumerate() {
        if !expr.dims().any(|d| ranges[d].narrowed) {
            offsets.push(IndexExpr::Const(0));
            sizes.push(IndexExpr::extent(operand.id, coordinate, operand.shape()[coordinate]));
            continue;
        }
        if let Some(dim) = expr.as_dim() {
            offsets.push(ranges[dim].offset.clone());
            sizes.push(ranges[dim].size.clone());
            continue;
        }
        if expr.terms().iter().any(|&(_, c)| c < 0) {
            return UnsupportedOpSnafu { op: op.name(), reason: "negative coefficient on a tiled loop" }.fail();
        }
        // Offset: the expression at the tile origin, without its constant (kept in the map).
        // Size: one past the largest coordinate reached from inside the tile.
        let offset = expr
            .terms()
            .iter()
            .fold(IndexExpr::Const(0), |acc, &(d, c)| acc.add(ranges[d].offset.clone().mul(c)));
        let size = expr.terms().iter().fold(IndexExpr::Const(expr.constant_term() + 1), |acc, &(d, c)| {
            acc.add(ranges[d].size.clone().sub(IndexExpr::Const(1)).mul(c))
        });
        offsets.push(offset);
        sizes.push(size);
    }
    let ty = operand.ty.narrowed(sizes.iter().map(IndexExpr::as_dim));
    Ok(OperandView { operand: idx, source: operand.id, result: Operand::new(ty), offsets, sizes })
}

/// `op` over the subviews in `views`, with `replacements` substituted for other operands.
pub(crate) fn with_views(op: &StructuredOp, views: &[OperandView], replacements: &[(usize, Operand)]) -> StructuredOp {
    let operands = op.operands().into_iter().enumerate().map(|(idx, operand)| {
        if let Some((_, replacement)) = replacements.iter().find(|(i, _)| *i == idx) {
            return replacement.clone();
        }
        views.iter().find(|v| v.operand == idx).map_or_else(|| operand.clone(), |v| v.result.clone())
    });
    op.with_operands(operands.collect::<Vec<_>>())
}

/// Contiguous temporary with the shape of `view`.
pub(crate) fn temporary_like(view: &OperandView) -> Operand {
    Operand::new(ViewType::new(view.result.dtype().clone(), view.result.shape().iter().copied()))
}
