//! Permutation, promotion, fusion and vectorization properties.

use proptest::prelude::*;
use tessera_ir::nest::{self, verify_nest};
use tessera_ir::test::fixtures::f32_view;
use tessera_ir::test::property::generators::*;
use tessera_ir::{Permutation, Stmt, StructuredOp};

use crate::config::TransformConfig;
use crate::fuse::fuse;
use crate::permute::permute;
use crate::promote::promote;
use crate::test::helpers::*;
use crate::tile::tile;
use crate::vectorize::vectorize;

fn arb_permuted() -> impl Strategy<Value = (StructuredOp, Permutation)> {
    arb_structured_op().prop_flat_map(|op| {
        let n = op.num_loops();
        (Just(op), arb_permutation(n))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The identity permutation changes neither maps nor kinds.
    #[test]
    fn identity_permutation_is_a_no_op(op in arb_structured_op()) {
        let identity: Vec<usize> = (0..op.num_loops()).collect();
        let permuted = permute(&op, &identity).unwrap();
        prop_assert_eq!(permuted.name(), op.name());
        prop_assert_eq!(permuted.indexing_maps(), op.indexing_maps());
        prop_assert_eq!(permuted.iterator_kinds(), op.iterator_kinds());
    }

    /// Permuting the loops reorders iterations without changing results.
    #[test]
    fn permutation_preserves_results((op, perm) in arb_permuted()) {
        let permuted = permute(&op, perm.as_slice()).unwrap();
        prop_assert!(permuted.verify().is_ok());
        prop_assert_eq!(permuted.num_loops(), op.num_loops());
        prop_assert_eq!(reference(&permuted), reference(&op));
    }

    /// Promoting every operand into local buffers preserves results.
    #[test]
    fn promotion_preserves_results(op in arb_structured_op(), zero_fill in any::<bool>()) {
        let operands: Vec<usize> = (0..op.num_operands()).collect();
        let config = TransformConfig::builder().promote_zero_fill(zero_fill).build();
        let block = promote(&op, &operands, &config).unwrap();
        prop_assert!(verify_nest(&block).is_ok(), "{}", nest::render(&block));
        prop_assert_eq!(nest::local_buffers(&block).len(), operands.len());
        prop_assert_eq!(rewritten(&op, &block), reference(&op));
    }

    /// Fusing a matmul producer into a row-tiled matmul consumer keeps one tile-sized
    /// temporary live at a time.
    #[test]
    fn fused_matmul_chain_matches(
        m in 1usize..=12,
        k in 1usize..=5,
        t in 1usize..=5,
        n in 1usize..=5,
    ) {
        let temp = f32_view(&[m, t]);
        let producer = StructuredOp::matmul(f32_view(&[m, k]), f32_view(&[k, t]), temp.clone());
        let consumer = StructuredOp::matmul(temp, f32_view(&[t, n]), f32_view(&[m, n]));
        let tiled = tile(&consumer, &[4], None).unwrap();
        let block = fuse(&tiled, 0, &producer).unwrap().into_stmts();
        prop_assert!(verify_nest(&block).is_ok());
        prop_assert_eq!(nest::local_buffers(&block).len(), 1);

        let ops = [&producer, &consumer];
        let mut fused = interp();
        bind_ops(&mut fused, &ops);
        fused.run(&block);
        prop_assert!(fused.peak_local <= 4 * t);

        let original = [Stmt::Op(producer.clone()), Stmt::Op(consumer.clone())];
        let outputs = consumer.outputs();
        prop_assert_eq!(
            outputs.iter().map(|o| fused.read(o)).collect::<Vec<_>>(),
            run_block(&ops, &original, &outputs)
        );
    }

    /// Vectorized matmuls compute the same products.
    #[test]
    fn vectorized_matmul_matches(op in arb_matmul()) {
        let stmt = vectorize(&op).unwrap();
        prop_assert_eq!(rewritten(&op, &[stmt]), reference(&op));
    }
}
