//! Verifier tests: one failing case per invariant plus the valid constructors.

use std::collections::HashSet;

use smallvec::{SmallVec, smallvec};
use tessera_dtype::DType;

use crate::affine::{AffineMap, Permutation};
use crate::error::{Error, Invariant, Site};
use crate::op::{GenericOp, StructuredOp};
use crate::region::Region;
use crate::test::fixtures::*;
use crate::types::{ConstValue, IteratorKind};
use crate::value::{Operand, ViewType};

fn invariant_of(result: crate::Result<StructuredOp>) -> (Invariant, Site) {
    match result {
        Err(Error::Verification { invariant, site, .. }) => (invariant, site),
        other => panic!("expected verification failure, got {other:?}"),
    }
}

fn identity_generic(args_in: usize, args_out: usize, shape: &[usize]) -> GenericOp {
    let rank = shape.len();
    let count = args_in + args_out;
    GenericOp::builder()
        .operands((0..count).map(|_| f32_view(shape)).collect::<SmallVec<[Operand; 4]>>())
        .args_in(args_in)
        .args_out(args_out)
        .indexing_maps((0..count).map(|_| AffineMap::identity(rank)).collect::<SmallVec<[AffineMap; 4]>>())
        .iterator_kinds(SmallVec::from_elem(IteratorKind::Parallel, rank))
        .region(Region::opaque("body", vec![DType::Float32; count], vec![DType::Float32; args_out]))
        .build()
}

// =========================================================================
// Valid Constructions
// =========================================================================

#[test]
fn test_valid_named_ops_verify() {
    assert!(StructuredOp::try_matmul(f32_view(&[4, 6]), f32_view(&[6, 5]), f32_view(&[4, 5])).is_ok());
    assert!(StructuredOp::try_matvec(f32_view(&[4, 6]), f32_view(&[6]), f32_view(&[4])).is_ok());
    assert!(StructuredOp::try_dot(f32_view(&[6]), f32_view(&[6]), f32_view(&[])).is_ok());
    assert!(StructuredOp::try_fill(f32_view(&[2, 2]), ConstValue::Float(1.5)).is_ok());
    assert!(StructuredOp::try_copy(f32_view(&[2, 3]), f32_view(&[2, 3])).is_ok());
    assert!(conv(1, &[8, 8], &[3, 3], 2, 4).verify().is_ok());
    assert!(StructuredOp::try_generic(identity_generic(2, 1, &[3, 4])).is_ok());
}

#[test]
fn test_valid_indexed_generic() {
    let mut g = identity_generic(1, 1, &[3, 4]);
    g.region = Region::opaque("indexed", [DType::Index, DType::Index, DType::Float32, DType::Float32], [DType::Float32]);
    assert!(StructuredOp::try_indexed_generic(g).is_ok());
}

// =========================================================================
// Arity and Maps
// =========================================================================

#[test]
fn test_operand_count_mismatch() {
    let mut g = identity_generic(1, 1, &[3]);
    g.args_in = 2;
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::OperandCount, Site::Op));
}

#[test]
fn test_map_count_mismatch() {
    let mut g = identity_generic(1, 1, &[3]);
    g.indexing_maps.pop();
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::MapCount, Site::Op));
}

#[test]
fn test_map_domain_mismatch() {
    let mut g = identity_generic(1, 1, &[3, 3]);
    g.indexing_maps[1] = AffineMap::projection(3, &[0, 1]).unwrap();
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::MapDomain, Site::Operand(1)));
}

#[test]
fn test_matmul_rank_mismatch() {
    let result = StructuredOp::try_matmul(f32_view(&[4, 6]), f32_view(&[6]), f32_view(&[4, 5]));
    assert_eq!(invariant_of(result), (Invariant::OperandRank, Site::Operand(1)));
}

#[test]
fn test_iterator_count_mismatch() {
    let mut g = identity_generic(1, 1, &[3, 3]);
    g.iterator_kinds.push(IteratorKind::Reduction);
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::IteratorCount, Site::Op));
}

// =========================================================================
// Regions
// =========================================================================

#[test]
fn test_region_param_type_mismatch() {
    let mut g = identity_generic(1, 1, &[3]);
    g.region = Region::opaque("body", [DType::Int32, DType::Float32], [DType::Float32]);
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::RegionSignature, Site::Operand(0)));
}

#[test]
fn test_indexed_region_missing_index_params() {
    let g = identity_generic(1, 1, &[3, 4]);
    assert_eq!(invariant_of(StructuredOp::try_indexed_generic(g)), (Invariant::RegionSignature, Site::Op));
}

#[test]
fn test_region_result_count_mismatch() {
    let mut g = identity_generic(1, 1, &[3]);
    g.region = Region::opaque("body", [DType::Float32, DType::Float32], []);
    assert_eq!(invariant_of(StructuredOp::try_generic(g)), (Invariant::RegionResults, Site::Op));
}

// =========================================================================
// Conv Attributes
// =========================================================================

#[test]
fn test_conv_stride_count_mismatch() {
    let result = StructuredOp::try_conv(
        f32_view(&[3, 3, 2, 4]),
        f32_view(&[1, 8, 8, 2]),
        f32_view(&[1, 6, 6, 4]),
        Some(smallvec![1]),
        None,
    );
    assert_eq!(invariant_of(result), (Invariant::WindowAttributes, Site::Op));
}

#[test]
fn test_conv_non_positive_dilation() {
    let result = StructuredOp::try_conv(
        f32_view(&[3, 2, 4]),
        f32_view(&[1, 8, 2]),
        f32_view(&[1, 6, 4]),
        None,
        Some(smallvec![0]),
    );
    assert_eq!(invariant_of(result), (Invariant::WindowAttributes, Site::Dim(0)));
}

#[test]
fn test_conv_requires_rank_three() {
    let result = StructuredOp::try_conv(f32_view(&[3, 4]), f32_view(&[8, 2]), f32_view(&[6, 4]), None, None);
    assert_eq!(invariant_of(result), (Invariant::OperandRank, Site::Operand(2)));
}

// =========================================================================
// Element Types, Fill, Copy
// =========================================================================

#[test]
fn test_fill_value_out_of_range() {
    let out = Operand::new(ViewType::from_static(DType::Int8, &[4]));
    let result = StructuredOp::try_fill(out, ConstValue::Int(300));
    assert_eq!(invariant_of(result), (Invariant::FillValue, Site::Operand(0)));
}

#[test]
fn test_matmul_narrowing_accumulator() {
    let lhs = Operand::new(ViewType::from_static(DType::Float64, &[2, 2]));
    let result = StructuredOp::try_matmul(lhs, f32_view(&[2, 2]), f32_view(&[2, 2]));
    assert_eq!(invariant_of(result), (Invariant::ElementType, Site::Operand(0)));
}

#[test]
fn test_copy_permutation_length() {
    let result = StructuredOp::try_copy_permuted(
        f32_view(&[2, 3]),
        f32_view(&[3, 2]),
        Some(Permutation::new([2, 0, 1]).unwrap()),
        None,
    );
    assert_eq!(invariant_of(result), (Invariant::CopyPermutation, Site::Operand(0)));
}

#[test]
fn test_copy_permuted_shapes_must_agree() {
    let perm = Some(Permutation::new([1, 0]).unwrap());
    assert!(StructuredOp::try_copy_permuted(f32_view(&[3, 2]), f32_view(&[2, 3]), perm.clone(), None).is_ok());

    let result = StructuredOp::try_copy_permuted(f32_view(&[2, 3]), f32_view(&[2, 3]), perm, None);
    assert!(matches!(invariant_of(result), (Invariant::CopyShape, Site::OperandDim { operand: 1, .. })));
}

// =========================================================================
// Library Calls
// =========================================================================

#[test]
fn test_library_call_resolution() {
    let mut g = identity_generic(1, 1, &[3]);
    g.library_call = Some("external_add".into());
    let op = StructuredOp::generic(g);

    let mut symbols: HashSet<String> = HashSet::new();
    assert!(op.verify().is_ok());
    assert!(matches!(
        op.verify_with_symbols(&symbols),
        Err(Error::Verification { invariant: Invariant::LibraryCall, .. })
    ));
    symbols.insert("external_add".to_string());
    assert!(op.verify_with_symbols(&symbols).is_ok());
}

#[test]
fn test_verification_error_names_op() {
    let err = StructuredOp::try_matmul(f32_view(&[4]), f32_view(&[6, 5]), f32_view(&[4, 5])).unwrap_err();
    assert!(err.is_verification());
    assert_eq!(err.to_string(), "'matmul' failed verification: operand_rank at operand #0");
}
