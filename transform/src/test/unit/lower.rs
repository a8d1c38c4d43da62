//! Loop and library-call lowering.

use smallvec::SmallVec;
use tessera_ir::nest::{self, verify_nest};
use tessera_ir::test::fixtures::*;
use tessera_ir::{
    AffineMap, ConstValue, DType, Dim, GenericOp, IteratorKind, LoopForm, Permutation, Region, Stmt, StructuredOp,
};

use crate::config::TransformConfig;
use crate::error::TransformError;
use crate::lower::{lower_preferred, lower_to_library_call, lower_to_loops};
use crate::test::helpers::*;

fn trip_counts(block: &[Stmt]) -> Vec<Option<i64>> {
    nest::loops(block).iter().map(|l| l.trip_count()).collect()
}

// =========================================================================
// Loop Structure
// =========================================================================

#[test]
fn test_matmul_lowers_to_three_affine_loops() {
    let op = matmul(4, 5, 6);
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();

    assert_eq!(trip_counts(&block), vec![Some(4), Some(5), Some(6)]);
    assert!(nest::loops(&block).iter().all(|l| l.form == LoopForm::Affine && l.step == 1));

    let innermost = &nest::loops(&block)[2].body;
    let loads = innermost.iter().filter(|s| matches!(s, Stmt::Load { .. })).count();
    assert_eq!(loads, 3);
    assert!(matches!(innermost[3], Stmt::Compute { .. }));
    assert!(matches!(innermost.last(), Some(Stmt::Store { target, .. }) if *target == op.outputs()[0].id));
    verify_nest(&block).unwrap();
}

#[test]
fn test_generic_form() {
    let op = matmul(2, 3, 4);
    let block = lower_to_loops(&op, LoopForm::Generic).unwrap();
    assert!(nest::loops(&block).iter().all(|l| l.form == LoopForm::Generic));
    assert!(nest::render(&block).starts_with("for %i"));
}

#[test]
fn test_conv_loop_order_follows_layout() {
    // b, x0, x1, k, q, z0, z1
    let op = conv(2, &[6, 5], &[3, 2], 3, 4);
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    assert_eq!(trip_counts(&block), vec![Some(2), Some(4), Some(4), Some(4), Some(3), Some(3), Some(2)]);
}

#[test]
fn test_fill_of_scalar_has_no_loops() {
    let op = StructuredOp::fill(f32_view(&[]), ConstValue::Float(2.0));
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    assert!(nest::loops(&block).is_empty());
    assert_eq!(rewritten(&op, &block), vec![vec![2.0]]);
}

// =========================================================================
// Bounds
// =========================================================================

#[test]
fn test_dynamic_extents_are_affine_symbols() {
    let op = StructuredOp::matmul(dynamic_view(2), dynamic_view(2), dynamic_view(2));
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    assert_eq!(trip_counts(&block), vec![None, None, None]);
    assert!(nest::loops(&block).iter().all(|l| l.upper.is_affine()));
}

#[test]
fn test_bounded_extent_is_not_affine() {
    let partial = |d| view(DType::Float32, &[Dim::Bounded(Some(4)), Dim::Static(d)]);
    let op = StructuredOp::matmul(partial(3), f32_view(&[3, 5]), partial(5));

    let err = lower_to_loops(&op, LoopForm::Affine).unwrap_err();
    assert_eq!(err, TransformError::NonAffineBound { dim: 0 });
    assert!(err.is_recoverable());

    let block = lower_preferred(&op, &TransformConfig::default()).unwrap();
    assert!(nest::loops(&block).iter().all(|l| l.form == LoopForm::Generic));
}

#[test]
fn test_configured_generic_form() {
    let config = TransformConfig::builder().loop_form(LoopForm::Generic).build();
    let block = lower_preferred(&matmul(2, 2, 2), &config).unwrap();
    assert!(nest::loops(&block).iter().all(|l| l.form == LoopForm::Generic));
}

// =========================================================================
// Failures
// =========================================================================

#[test]
fn test_invalid_op_fails_verification() {
    let op = StructuredOp::matmul(f32_view(&[4]), f32_view(&[4, 5]), f32_view(&[4, 5]));
    let err = lower_to_loops(&op, LoopForm::Affine).unwrap_err();
    assert!(err.is_verification());
    assert!(!err.is_recoverable());
}

#[test]
fn test_extent_mismatch() {
    let op = StructuredOp::matmul(f32_view(&[4, 6]), f32_view(&[5, 3]), f32_view(&[4, 3]));
    let err = lower_to_loops(&op, LoopForm::Affine).unwrap_err();
    assert!(matches!(err, TransformError::Ir { source: tessera_ir::Error::ExtentMismatch { dim: 2, .. } }));
}

#[test]
fn test_conv_window_past_input_is_refused() {
    let op = StructuredOp::conv(f32_view(&[3, 1, 1]), f32_view(&[1, 3, 1]), f32_view(&[1, 5, 1]));
    let err = lower_to_loops(&op, LoopForm::Affine).unwrap_err();
    assert!(matches!(
        err,
        TransformError::Ir { source: tessera_ir::Error::CoordinateOutOfBounds { operand: 1, extent: 3, .. } }
    ));
    assert!(!err.is_recoverable());
}

// =========================================================================
// Semantics
// =========================================================================

#[test]
fn test_lowered_matmul_computes_product() {
    let op = matmul(2, 2, 2);
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    let a = sample_data(4, 1);
    let b = sample_data(4, 2);
    let c = sample_data(4, 3);
    let expected: Vec<f64> = (0..4)
        .map(|idx| {
            let (i, j) = (idx / 2, idx % 2);
            c[idx] + (0..2).map(|k| a[i * 2 + k] * b[k * 2 + j]).sum::<f64>()
        })
        .collect();
    assert_eq!(rewritten(&op, &block), vec![expected]);
}

#[test]
fn test_permuted_copy_transposes() {
    let op = StructuredOp::copy_permuted(
        f32_view(&[3, 2]),
        f32_view(&[2, 3]),
        Some(Permutation::new([1, 0]).unwrap()),
        None,
    );
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    let input = sample_data(6, 1);
    let expected: Vec<f64> = (0..6).map(|idx| input[(idx % 3) * 2 + idx / 3]).collect();
    assert_eq!(rewritten(&op, &block), vec![expected]);
}

#[test]
fn test_indexed_generic_receives_coordinates() {
    let g = GenericOp::builder()
        .operands(vec![f32_view(&[2, 3]), f32_view(&[2, 3])])
        .args_in(1)
        .args_out(1)
        .indexing_maps(vec![AffineMap::identity(2), AffineMap::identity(2)])
        .iterator_kinds(SmallVec::from_elem(IteratorKind::Parallel, 2))
        .region(Region::opaque(
            "index_sum",
            [DType::Index, DType::Index, DType::Float32, DType::Float32],
            [DType::Float32],
        ))
        .build();
    let op = StructuredOp::try_indexed_generic(g).unwrap();
    let block = lower_to_loops(&op, LoopForm::Affine).unwrap();
    let input = sample_data(6, 1);
    let expected: Vec<f64> = (0..6).map(|idx| ((idx / 3) * 10 + idx % 3) as f64 + input[idx]).collect();
    assert_eq!(rewritten(&op, &block), vec![expected]);
}

// =========================================================================
// Library Calls
// =========================================================================

#[test]
fn test_library_call_uses_derived_name() {
    let op = matmul(4, 5, 6);
    let Stmt::LibraryCall { callee, operands } = lower_to_library_call(&op).unwrap() else {
        panic!("expected a library call");
    };
    assert_eq!(callee.as_str(), "matmul_viewsxsxf32_viewsxsxf32_viewsxsxf32");
    assert_eq!(operands.len(), 3);
}

#[test]
fn test_library_call_uses_explicit_symbol() {
    let op = elementwise_generic("add", &[4]);
    let Some(g) = op.op().as_generic() else { unreachable!() };
    let named = StructuredOp::generic(GenericOp { library_call: Some("vadd".into()), ..g.clone() });
    let Stmt::LibraryCall { callee, .. } = lower_to_library_call(&named).unwrap() else {
        panic!("expected a library call");
    };
    assert_eq!(callee.as_str(), "vadd");
}
