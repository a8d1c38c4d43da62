//! Producer-consumer fusion into a tiled consumer.
//!
//! The producer is re-run over exactly the tile of its output the consumer touches in the
//! current tile iteration. Its output map must be a projected permutation, so every output
//! coordinate pins one producer loop to the consumer's tile range; the remaining producer
//! loops keep their full range.
//!
//! When the fused operand is a consumer input, the producer writes a tile-sized local
//! buffer the consumer then reads. When it is a consumer output, the producer writes the
//! consumer's output subview directly, which requires every tile loop to move over that
//! output so no tile is produced twice.

use smallvec::SmallVec;
use tessera_ir::{Op, Stmt, StructuredOp};
use tracing::debug;

use crate::error::*;
use crate::tile::{LoopRange, OperandView, TileNest, TiledOp, narrow_operands, temporary_like, with_views};

/// Whether re-running `op` over a tile needs the previous contents of its output.
pub fn reads_output(op: &StructuredOp) -> bool {
    op.has_reduction() || matches!(op.op(), Op::Generic(_) | Op::IndexedGeneric(_))
}

/// Fuse `producer` into the tile loop of `consumer`, in front of the use of operand
/// `operand`.
///
/// The fused nest recomputes the producer's output tile from the producer's inputs. The
/// producer itself is left to the caller: a producer that [`reads_output`] must not have run
/// on the full buffer before the nest.
#[tracing::instrument(skip_all, fields(consumer.id = %consumer.original.id(), producer.id = %producer.id(), operand))]
pub fn fuse(consumer: &TiledOp, operand: usize, producer: &StructuredOp) -> Result<TileNest> {
    producer.verify()?;
    let Some(view) = consumer.view(operand) else {
        return UnfusableIndexingSnafu { reason: format!("consumer operand #{operand} is not narrowed by the tile") }
            .fail();
    };
    let Some(out_pos) = producer.outputs().iter().position(|o| o.id == view.source) else {
        return NotAProducerSnafu { producer: producer.id(), value: view.source }.fail();
    };
    let out_idx = producer.num_inputs() + out_pos;
    let maps = producer.indexing_maps();
    let out_map = &maps[out_idx];
    if !out_map.is_projected_permutation() {
        return UnfusableIndexingSnafu { reason: format!("producer output map {out_map} is not a projected permutation") }
            .fail();
    }

    let fused_output = consumer.op.is_output(operand);
    if fused_output {
        let consumer_maps = consumer.original.indexing_maps();
        let used = consumer_maps[operand].used_dims();
        if let Some(l) = consumer.loops.iter().find(|l| !used.contains(&l.dim)) {
            return UnfusableIndexingSnafu {
                reason: format!("tile loop over d{} revisits the fused output tile", l.dim),
            }
            .fail();
        }
    }

    let domain = producer.iteration_domain()?;
    let mut ranges: SmallVec<[LoopRange; 6]> = domain
        .iter()
        .map(|e| LoopRange { offset: tessera_ir::IndexExpr::Const(0), size: e.bound(), narrowed: false })
        .collect();
    for (coordinate, expr) in out_map.results().iter().enumerate() {
        if let Some(dim) = expr.as_dim() {
            ranges[dim] = LoopRange {
                offset: view.offsets[coordinate].clone(),
                size: view.sizes[coordinate].clone(),
                narrowed: true,
            };
        }
    }

    let producer_views = narrow_operands(producer, &ranges, &[out_idx])?;
    let mut body: Vec<Stmt> = consumer.views.iter().filter(|v| v.operand != operand).map(OperandView::to_stmt).collect();
    body.extend(producer_views.iter().map(OperandView::to_stmt));

    if fused_output {
        let producer_tile = with_views(producer, &producer_views, &[(out_idx, view.result.clone())]);
        body.push(view.to_stmt());
        body.push(Stmt::Op(producer_tile));
        body.push(Stmt::Op(consumer.op.clone()));
    } else {
        let temp = temporary_like(view);
        let producer_tile = with_views(producer, &producer_views, &[(out_idx, temp.clone())]);
        let consumer_tile = with_views(&consumer.op, &[], &[(operand, temp.clone())]);
        let mut scope = Vec::with_capacity(3);
        if reads_output(producer) {
            body.push(view.to_stmt());
            scope.push(Stmt::Op(StructuredOp::copy(view.result.clone(), temp.clone())));
        }
        scope.push(Stmt::Op(producer_tile));
        scope.push(Stmt::Op(consumer_tile));
        body.push(Stmt::LocalBuffer { buffer: temp, sizes: view.sizes.clone(), body: scope });
    }

    debug!(fused_output, producer_views = producer_views.len(), "fused producer into tile");
    Ok(TileNest { loops: consumer.loops.clone(), body })
}
