//! Iteration-space derivation for every variant.

use smallvec::smallvec;
use tessera_dtype::DType;

use crate::affine::{AffineExpr, AffineMap, Permutation};
use crate::error::Error;
use crate::op::StructuredOp;
use crate::test::fixtures::*;
use crate::types::{ConstValue, Dim, IteratorKind::*};

#[test]
fn test_matmul_maps_and_kinds() {
    let op = matmul(4, 5, 6);
    assert_eq!(op.num_loops(), 3);
    assert_eq!(op.iterator_kinds().as_slice(), &[Parallel, Parallel, Reduction]);
    let maps = op.indexing_maps();
    assert_eq!(maps[0], AffineMap::projection(3, &[0, 2]).unwrap());
    assert_eq!(maps[1], AffineMap::projection(3, &[2, 1]).unwrap());
    assert_eq!(maps[2], AffineMap::projection(3, &[0, 1]).unwrap());
}

#[test]
fn test_matvec_and_dot_layouts() {
    let matvec = StructuredOp::matvec(f32_view(&[4, 6]), f32_view(&[6]), f32_view(&[4]));
    assert_eq!(matvec.iterator_kinds().as_slice(), &[Parallel, Reduction]);
    assert_eq!(matvec.indexing_maps()[1], AffineMap::projection(2, &[1]).unwrap());

    let dot = StructuredOp::dot(f32_view(&[8]), f32_view(&[8]), f32_view(&[]));
    assert_eq!(dot.iterator_kinds().as_slice(), &[Reduction]);
    assert_eq!(dot.indexing_maps()[2].num_results(), 0);
}

#[test]
fn test_fill_and_copy_are_parallel() {
    let fill = StructuredOp::fill(f32_view(&[2, 3, 4]), ConstValue::Float(0.0));
    assert_eq!(fill.iterator_kinds().as_slice(), &[Parallel; 3]);
    assert!(fill.indexing_maps()[0].is_identity());

    let copy = StructuredOp::copy_permuted(
        f32_view(&[3, 2]),
        f32_view(&[2, 3]),
        Some(Permutation::new([1, 0]).unwrap()),
        None,
    );
    let maps = copy.indexing_maps();
    assert_eq!(maps[0], AffineMap::projection(2, &[1, 0]).unwrap());
    assert!(maps[1].is_identity());
}

#[test]
fn test_conv_layout_2d() {
    // input (b, x0, x1, q), filter (z0, z1, q, k), output (b, y0, y1, k)
    let op = StructuredOp::conv_with(
        f32_view(&[3, 3, 2, 8]),
        f32_view(&[1, 10, 10, 2]),
        f32_view(&[1, 4, 4, 8]),
        Some(smallvec![2, 2]),
        Some(smallvec![1, 1]),
    );
    assert_eq!(op.num_loops(), 7);
    assert_eq!(op.iterator_kinds().as_slice(), &[Parallel, Parallel, Parallel, Parallel, Reduction, Window, Window]);

    let maps = op.indexing_maps();
    assert_eq!(maps[0], AffineMap::projection(7, &[5, 6, 4, 3]).unwrap());
    let input = AffineMap::new(
        7,
        [
            AffineExpr::dim(0),
            AffineExpr::linear([(1, 2), (5, 1)], 0),
            AffineExpr::linear([(2, 2), (6, 1)], 0),
            AffineExpr::dim(4),
        ],
    )
    .unwrap();
    assert_eq!(maps[1], input);
    assert_eq!(maps[2], AffineMap::projection(7, &[0, 1, 2, 3]).unwrap());
}

#[test]
fn test_conv_defaults_to_unit_strides() {
    let op = conv(1, &[6], &[3], 2, 4);
    let input_map = &op.indexing_maps()[1];
    assert_eq!(input_map.result(1), Some(&AffineExpr::linear([(1, 1), (4, 1)], 0)));
}

#[test]
fn test_iteration_domain_static() {
    let op = matmul(4, 5, 6);
    let domain = op.iteration_domain().unwrap();
    let extents: Vec<Dim> = domain.iter().map(|e| e.dim).collect();
    assert_eq!(extents, vec![Dim::Static(4), Dim::Static(5), Dim::Static(6)]);
}

#[test]
fn test_iteration_domain_prefers_static_extent() {
    let op = StructuredOp::matmul(
        dynamic_view(2),
        view(DType::Float32, &[Dim::Static(6), Dim::Dynamic]),
        view(DType::Float32, &[Dim::Dynamic, Dim::Static(5)]),
    );
    let domain = op.iteration_domain().unwrap();
    assert_eq!(domain[0].dim, Dim::Dynamic);
    assert_eq!(domain[1].dim, Dim::Static(5));
    assert_eq!(domain[2].dim, Dim::Static(6));
    assert_eq!(domain[2].operand, 1);
}

#[test]
fn test_iteration_domain_extent_mismatch() {
    let op = StructuredOp::matmul(f32_view(&[4, 6]), f32_view(&[7, 5]), f32_view(&[4, 5]));
    let err = op.iteration_domain().unwrap_err();
    assert!(matches!(err, Error::ExtentMismatch { dim: 2, extent: 6, other_extent: 7, .. }));
}

#[test]
fn test_conv_window_past_input_extent() {
    // Five output positions with a three-wide window need an input of seven.
    let op = StructuredOp::conv(f32_view(&[3, 1, 1]), f32_view(&[1, 3, 1]), f32_view(&[1, 5, 1]));
    let err = op.iteration_domain().unwrap_err();
    assert_eq!(err, Error::CoordinateOutOfBounds { operand: 1, coordinate: 1, min: 0, max: 6, extent: 3 });

    let fits = StructuredOp::conv(f32_view(&[3, 1, 1]), f32_view(&[1, 7, 1]), f32_view(&[1, 5, 1]));
    assert!(fits.iteration_domain().is_ok());
}

#[test]
fn test_strided_window_bounds() {
    let strides = Some(smallvec![2]);
    let dilations = Some(smallvec![2]);
    // (4 - 1) * 2 + (2 - 1) * 2 = 8
    let tight = StructuredOp::conv_with(f32_view(&[2, 1, 1]), f32_view(&[1, 9, 1]), f32_view(&[1, 4, 1]), strides.clone(), dilations.clone());
    assert!(tight.iteration_domain().is_ok());
    let short = StructuredOp::conv_with(f32_view(&[2, 1, 1]), f32_view(&[1, 8, 1]), f32_view(&[1, 4, 1]), strides, dilations);
    assert!(matches!(short.iteration_domain(), Err(Error::CoordinateOutOfBounds { max: 8, extent: 8, .. })));
}

#[test]
fn test_dynamic_input_skips_window_bounds() {
    let op = StructuredOp::conv(
        f32_view(&[3, 1, 1]),
        view(DType::Float32, &[Dim::Static(1), Dim::Dynamic, Dim::Static(1)]),
        f32_view(&[1, 5, 1]),
    );
    assert!(op.iteration_domain().is_ok());
}

#[test]
fn test_iteration_domain_rank_mismatch() {
    let op = StructuredOp::matmul(f32_view(&[4]), f32_view(&[6, 5]), f32_view(&[4, 5]));
    assert!(matches!(op.iteration_domain(), Err(Error::CoordinateRankMismatch { operand: 0, .. })));
}

#[test]
fn test_loop_extent_bound() {
    let op = StructuredOp::fill(view(DType::Float32, &[Dim::Static(3), Dim::Dynamic]), ConstValue::Float(1.0));
    let domain = op.iteration_domain().unwrap();
    assert_eq!(domain[0].bound().as_const(), Some(3));
    assert!(domain[1].bound().as_const().is_none());
    assert!(domain[1].bound().is_affine());
}
