//! Rewrite requests and the fixpoint driver.

use smallvec::smallvec;
use tessera_ir::nest;
use tessera_ir::test::fixtures::*;
use tessera_ir::{ConstValue, Stmt, StructuredOp};

use crate::config::TransformConfig;
use crate::driver::{Pattern, Rewriter};
use crate::error::TransformError;
use crate::marker::{Marker, MarkerFilter};
use crate::request::{RewriteKind, RewriteRequest};
use crate::test::helpers::*;

fn block_of(ops: &[&StructuredOp]) -> Vec<Stmt> {
    ops.iter().map(|&op| Stmt::Op(op.clone())).collect()
}

fn op_names(block: &[Stmt]) -> Vec<&'static str> {
    nest::ops(block).iter().map(|o| o.name()).collect()
}

// =========================================================================
// Patterns
// =========================================================================

#[test]
fn test_tile_pattern_reaches_fixpoint() {
    let op = matmul(8, 8, 8);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::new(RewriteKind::tile([4, 4, 4]), MarkerFilter::unmarked("tiled"))];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    let inner = nest::ops(&block);
    assert_eq!(inner.len(), 1);
    assert_eq!(rewriter.markers.get(inner[0].id()).map(Marker::as_str), Some("tiled"));
    assert_eq!(rewritten(&op, &block), reference(&op));
}

#[test]
fn test_default_marker_is_the_kind_name() {
    let op = matmul(4, 4, 4);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::builder().kind(RewriteKind::tile([2])).build()];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    let inner = nest::ops(&block);
    assert_eq!(rewriter.markers.get(inner[0].id()).map(Marker::as_str), Some("tile"));
}

#[test]
fn test_tile_then_vectorize() {
    let op = matmul(8, 8, 8);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();
    let patterns = [
        Pattern::new(RewriteKind::tile([4, 4, 4]), MarkerFilter::unmarked("tiled")),
        Pattern::new(RewriteKind::Vectorize, MarkerFilter::chain("tiled", "vectorized")),
    ];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 2);
    assert!(nest::ops(&block).is_empty());
    let mut contractions = 0;
    nest::walk(&block, &mut |s| contractions += usize::from(matches!(s, Stmt::Contract(_))));
    assert_eq!(contractions, 1);
    assert_eq!(rewritten(&op, &block), reference(&op));
}

#[test]
fn test_partial_tiles_skip_vectorization() {
    let op = matmul(7, 4, 4);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();
    let patterns = [
        Pattern::new(RewriteKind::tile([3]), MarkerFilter::unmarked("tiled")),
        Pattern::new(RewriteKind::Vectorize, MarkerFilter::chain("tiled", "vectorized")),
    ];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    assert_eq!(op_names(&block), vec!["matmul"]);
    assert_eq!(rewritten(&op, &block), reference(&op));
}

#[test]
fn test_pattern_restricted_to_op_names() {
    let fill = StructuredOp::fill(f32_view(&[3, 3]), ConstValue::Float(0.0));
    let op = matmul(3, 3, 3);
    let mut block = block_of(&[&fill, &op]);
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::builder()
        .kind(RewriteKind::LowerToLoops { form: None })
        .ops(smallvec!["fill"])
        .build()];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    assert_eq!(op_names(&block), vec!["matmul"]);
}

#[test]
fn test_lower_pattern_leaves_no_ops() {
    let op = matmul(3, 4, 2);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::new(RewriteKind::LowerToLoops { form: None }, MarkerFilter::default())];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    assert!(nest::ops(&block).is_empty());
    assert_eq!(nest::loops(&block).len(), 3);
    assert_eq!(rewritten(&op, &block), reference(&op));
}

// =========================================================================
// Failures
// =========================================================================

#[test]
fn test_invalid_op_surfaces_verification_error() {
    let op = StructuredOp::dot(f32_view(&[4]), f32_view(&[4]), f32_view(&[4]));
    let mut block = block_of(&[&op]);
    let original = block.clone();
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::new(RewriteKind::tile([2]), MarkerFilter::unmarked("tiled"))];

    let err = rewriter.run(&mut block, &patterns).unwrap_err();
    assert!(err.is_verification(), "{err:?}");
    assert_eq!(block, original);
}

#[test]
fn test_rewrite_limit() {
    let op = matmul(2, 2, 2);
    let mut block = block_of(&[&op]);
    let config = TransformConfig::builder().max_rewrites(5).build();
    let mut rewriter = Rewriter::new(config);
    // Each identity permutation yields a fresh op carrying the marker it matches on.
    let patterns = [
        Pattern::new(RewriteKind::permute([0, 1, 2]), MarkerFilter::unmarked("p")),
        Pattern::new(RewriteKind::permute([0, 1, 2]), MarkerFilter::chain("p", "p")),
    ];

    let err = rewriter.run(&mut block, &patterns).unwrap_err();
    assert_eq!(err, TransformError::RewriteLimitExceeded { limit: 5 });
}

#[test]
fn test_unknown_target() {
    let op = matmul(2, 2, 2);
    let stranger = matmul(2, 2, 2);
    let mut block = block_of(&[&op]);
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(stranger.id(), RewriteKind::tile([1]));
    let err = rewriter.apply(&mut block, &request).unwrap_err();
    assert_eq!(err, TransformError::UnknownTarget { target: stranger.id() });
}

// =========================================================================
// Fusion Requests
// =========================================================================

#[test]
fn test_tile_and_fuse_erases_producer() {
    let temp = f32_view(&[8, 5]);
    let producer = StructuredOp::matmul(f32_view(&[8, 3]), f32_view(&[3, 5]), temp.clone());
    let consumer = StructuredOp::matmul(temp, f32_view(&[5, 2]), f32_view(&[8, 2]));
    let original = block_of(&[&producer, &consumer]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(consumer.id(), RewriteKind::tile_and_fuse([4], 0)).with_marker("fused");
    rewriter.apply(&mut block, &request).unwrap();

    assert_eq!(block.len(), 1);
    assert_eq!(op_names(&block), vec!["copy", "matmul", "matmul"]);
    assert_eq!(rewriter.markers.len(), 3);

    let ops = [&producer, &consumer];
    assert_eq!(run_block(&ops, &block, &consumer.outputs()), run_block(&ops, &original, &consumer.outputs()));
}

#[test]
fn test_initialized_chain_fuses() {
    let temp = f32_view(&[8, 5]);
    let init = StructuredOp::fill(temp.clone(), ConstValue::Float(0.0));
    let producer = StructuredOp::matmul(f32_view(&[8, 3]), f32_view(&[3, 5]), temp.clone());
    let consumer = StructuredOp::matmul(temp, f32_view(&[5, 2]), f32_view(&[8, 2]));
    let original = block_of(&[&init, &producer, &consumer]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::builder()
        .kind(RewriteKind::tile_and_fuse([4], 0))
        .filter(MarkerFilter::unmarked("fused"))
        .ops(smallvec!["matmul"])
        .build()];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 1);
    assert_eq!(block.len(), 2);
    assert_eq!(block[0], original[0]);
    assert_eq!(op_names(&block), vec!["fill", "copy", "matmul", "matmul"]);

    let ops = [&init, &producer, &consumer];
    assert_eq!(run_block(&ops, &block, &consumer.outputs()), run_block(&ops, &original, &consumer.outputs()));
}

#[test]
fn test_producer_read_by_another_consumer_operand_is_kept() {
    let temp = f32_view(&[4, 4]);
    let producer = StructuredOp::fill(temp.clone(), ConstValue::Float(2.0));
    let consumer = StructuredOp::matmul(temp.clone(), temp, f32_view(&[4, 4]));
    let original = block_of(&[&producer, &consumer]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(consumer.id(), RewriteKind::tile_and_fuse([2], 0));
    rewriter.apply(&mut block, &request).unwrap();

    assert_eq!(block.len(), 2);
    assert_eq!(block[0], original[0]);
    let ops = [&producer, &consumer];
    assert_eq!(run_block(&ops, &block, &consumer.outputs()), run_block(&ops, &original, &consumer.outputs()));
}

#[test]
fn test_accumulating_producer_read_by_another_consumer_operand_is_refused() {
    let temp = f32_view(&[4, 4]);
    let producer = StructuredOp::matmul(f32_view(&[4, 2]), f32_view(&[2, 4]), temp.clone());
    let consumer = StructuredOp::matmul(temp.clone(), temp, f32_view(&[4, 4]));
    let original = block_of(&[&producer, &consumer]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(consumer.id(), RewriteKind::tile_and_fuse([2], 0));
    let err = rewriter.apply(&mut block, &request).unwrap_err();
    assert!(matches!(err, TransformError::UnfusableIndexing { .. }), "{err:?}");
    assert_eq!(block, original);
}

#[test]
fn test_pure_producer_used_elsewhere_is_kept() {
    let temp = f32_view(&[4, 4]);
    let producer = StructuredOp::fill(temp.clone(), ConstValue::Float(2.0));
    let consumer = StructuredOp::copy(temp.clone(), f32_view(&[4, 4]));
    let other = StructuredOp::copy(temp, f32_view(&[4, 4]));
    let original = block_of(&[&producer, &consumer, &other]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(consumer.id(), RewriteKind::tile_and_fuse([2, 2], 0));
    rewriter.apply(&mut block, &request).unwrap();

    assert_eq!(block.len(), 3);
    assert_eq!(block[0], original[0]);
    let ops = [&producer, &consumer, &other];
    let outputs = [consumer.outputs()[0], other.outputs()[0]];
    assert_eq!(run_block(&ops, &block, &outputs), run_block(&ops, &original, &outputs));
}

#[test]
fn test_accumulating_producer_used_elsewhere_is_refused() {
    let temp = f32_view(&[4, 4]);
    let producer = StructuredOp::matmul(f32_view(&[4, 2]), f32_view(&[2, 4]), temp.clone());
    let consumer = StructuredOp::copy(temp.clone(), f32_view(&[4, 4]));
    let other = StructuredOp::copy(temp, f32_view(&[4, 4]));
    let original = block_of(&[&producer, &consumer, &other]);
    let mut block = original.clone();
    let mut rewriter = Rewriter::default();

    let request = RewriteRequest::new(consumer.id(), RewriteKind::tile_and_fuse([2, 2], 0));
    let err = rewriter.apply(&mut block, &request).unwrap_err();
    assert!(matches!(err, TransformError::UnfusableIndexing { .. }), "{err:?}");
    assert_eq!(block, original);
    assert!(rewriter.markers.is_empty());
}

#[test]
fn test_requested_producer_must_write_the_operand() {
    let temp = f32_view(&[4, 4]);
    let unrelated = StructuredOp::fill(f32_view(&[4, 4]), ConstValue::Float(1.0));
    let consumer = StructuredOp::copy(temp.clone(), f32_view(&[4, 4]));
    let mut block = block_of(&[&unrelated, &consumer]);
    let mut rewriter = Rewriter::default();

    let kind = RewriteKind::Fuse {
        tile_sizes: smallvec![2, 2],
        interchange: None,
        operand: 0,
        producer: Some(unrelated.id()),
    };
    let err = rewriter.apply(&mut block, &RewriteRequest::new(consumer.id(), kind)).unwrap_err();
    assert_eq!(err, TransformError::NotAProducer { producer: unrelated.id(), value: temp.id });
}

#[test]
fn test_fuse_pattern_without_producer_is_skipped() {
    let op = StructuredOp::copy(f32_view(&[4, 4]), f32_view(&[4, 4]));
    let mut block = block_of(&[&op]);
    let original = block.clone();
    let mut rewriter = Rewriter::default();
    let patterns = [Pattern::new(RewriteKind::tile_and_fuse([2, 2], 0), MarkerFilter::unmarked("fused"))];

    assert_eq!(rewriter.run(&mut block, &patterns).unwrap(), 0);
    assert_eq!(block, original);
}
