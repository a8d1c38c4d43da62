//! Structured operations.
//!
//! [`Op`] is the closed set of structured linear-algebra variants. Named variants carry only
//! their operands (and a few attributes); their indexing maps and iterator kinds follow from
//! fixed rules (see [`crate::indexing`]). `Generic` and `IndexedGeneric` carry everything
//! explicitly in a [`GenericOp`].
//!
//! [`StructuredOp`] attaches an identity to an [`Op`]. Identities are what the rewrite
//! driver keys its marker side-table on; every rewrite that produces a new op produces a
//! new identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bon::bon;
use smallvec::SmallVec;

use crate::affine::{AffineMap, Permutation};
use crate::error::Result;
use crate::library::Symbol;
use crate::region::Region;
use crate::types::{ConstValue, IteratorKind};
use crate::value::{Operand, join_operands};

static OP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    pub fn fresh() -> Self {
        Self(OP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of `Generic` and `IndexedGeneric`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericOp {
    /// Inputs first, then outputs.
    pub operands: SmallVec<[Operand; 4]>,
    pub args_in: usize,
    pub args_out: usize,
    /// One map per operand, in operand order.
    pub indexing_maps: SmallVec<[AffineMap; 4]>,
    pub iterator_kinds: SmallVec<[IteratorKind; 6]>,
    pub region: Region,
    pub library_call: Option<Symbol>,
    pub doc: Option<String>,
}

#[bon]
impl GenericOp {
    #[builder]
    pub fn builder(
        #[builder(into)] operands: SmallVec<[Operand; 4]>,
        args_in: usize,
        args_out: usize,
        #[builder(into)] indexing_maps: SmallVec<[AffineMap; 4]>,
        #[builder(into)] iterator_kinds: SmallVec<[IteratorKind; 6]>,
        region: Region,
        #[builder(into)] library_call: Option<Symbol>,
        #[builder(into)] doc: Option<String>,
    ) -> Self {
        Self { operands, args_in, args_out, indexing_maps, iterator_kinds, region, library_call, doc }
    }

    pub fn num_loops(&self) -> usize {
        self.iterator_kinds.len()
    }

    pub fn inputs(&self) -> &[Operand] {
        &self.operands[..self.args_in.min(self.operands.len())]
    }

    pub fn outputs(&self) -> &[Operand] {
        &self.operands[self.args_in.min(self.operands.len())..]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Element-wise copy; permutations reorder the loop dims each side reads.
    Copy {
        input: Operand,
        output: Operand,
        input_permutation: Option<Permutation>,
        output_permutation: Option<Permutation>,
    },
    Fill {
        output: Operand,
        value: ConstValue,
    },
    /// `result[] += lhs[k] * rhs[k]`.
    Dot {
        lhs: Operand,
        rhs: Operand,
        result: Operand,
    },
    /// `result[m] += matrix[m, k] * vector[k]`.
    Matvec {
        matrix: Operand,
        vector: Operand,
        result: Operand,
    },
    /// `result[m, n] += lhs[m, k] * rhs[k, n]`.
    Matmul {
        lhs: Operand,
        rhs: Operand,
        result: Operand,
    },
    /// N-d convolution with `(b, spatial.., feature)` input/output layout.
    Conv {
        filter: Operand,
        input: Operand,
        output: Operand,
        strides: Option<SmallVec<[i64; 3]>>,
        dilations: Option<SmallVec<[i64; 3]>>,
    },
    Generic(GenericOp),
    /// As `Generic`; the region additionally receives the loop coordinates first.
    IndexedGeneric(GenericOp),
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Copy { .. } => "copy",
            Op::Fill { .. } => "fill",
            Op::Dot { .. } => "dot",
            Op::Matvec { .. } => "matvec",
            Op::Matmul { .. } => "matmul",
            Op::Conv { .. } => "conv",
            Op::Generic(_) => "generic",
            Op::IndexedGeneric(_) => "indexed_generic",
        }
    }

    pub fn is_named(&self) -> bool {
        !matches!(self, Op::Generic(_) | Op::IndexedGeneric(_))
    }

    pub fn as_generic(&self) -> Option<&GenericOp> {
        match self {
            Op::Generic(g) | Op::IndexedGeneric(g) => Some(g),
            _ => None,
        }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            Op::Copy { .. } => 1,
            Op::Fill { .. } => 0,
            Op::Dot { .. } | Op::Matvec { .. } | Op::Matmul { .. } | Op::Conv { .. } => 2,
            Op::Generic(g) | Op::IndexedGeneric(g) => g.args_in,
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            Op::Generic(g) | Op::IndexedGeneric(g) => g.args_out,
            _ => 1,
        }
    }

    /// All operands, inputs first.
    pub fn operands(&self) -> SmallVec<[&Operand; 4]> {
        match self {
            Op::Copy { input, output, .. } => SmallVec::from_iter([input, output]),
            Op::Fill { output, .. } => SmallVec::from_iter([output]),
            Op::Dot { lhs, rhs, result } => SmallVec::from_iter([lhs, rhs, result]),
            Op::Matvec { matrix, vector, result } => SmallVec::from_iter([matrix, vector, result]),
            Op::Matmul { lhs, rhs, result } => SmallVec::from_iter([lhs, rhs, result]),
            Op::Conv { filter, input, output, .. } => SmallVec::from_iter([filter, input, output]),
            Op::Generic(g) | Op::IndexedGeneric(g) => g.operands.iter().collect(),
        }
    }

    fn operands_mut(&mut self) -> SmallVec<[&mut Operand; 4]> {
        match self {
            Op::Copy { input, output, .. } => SmallVec::from_iter([input, output]),
            Op::Fill { output, .. } => SmallVec::from_iter([output]),
            Op::Dot { lhs, rhs, result } => SmallVec::from_iter([lhs, rhs, result]),
            Op::Matvec { matrix, vector, result } => SmallVec::from_iter([matrix, vector, result]),
            Op::Matmul { lhs, rhs, result } => SmallVec::from_iter([lhs, rhs, result]),
            Op::Conv { filter, input, output, .. } => SmallVec::from_iter([filter, input, output]),
            Op::Generic(g) | Op::IndexedGeneric(g) => g.operands.iter_mut().collect(),
        }
    }

    pub fn region(&self) -> Option<&Region> {
        self.as_generic().map(|g| &g.region)
    }
}

/// A structured operation with an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOp {
    id: OpId,
    op: Op,
}

impl StructuredOp {
    /// Wrap without verifying. Use [`StructuredOp::try_new`] for untrusted input.
    pub fn new(op: Op) -> Self {
        Self { id: OpId::fresh(), op }
    }

    pub fn try_new(op: Op) -> Result<Self> {
        Self::new(op).verified()
    }

    /// Verify and pass through.
    pub fn verified(self) -> Result<Self> {
        self.verify()?;
        Ok(self)
    }

    pub fn copy(input: Operand, output: Operand) -> Self {
        Self::new(Op::Copy { input, output, input_permutation: None, output_permutation: None })
    }

    pub fn copy_permuted(
        input: Operand,
        output: Operand,
        input_permutation: Option<Permutation>,
        output_permutation: Option<Permutation>,
    ) -> Self {
        Self::new(Op::Copy { input, output, input_permutation, output_permutation })
    }

    pub fn fill(output: Operand, value: ConstValue) -> Self {
        Self::new(Op::Fill { output, value })
    }

    pub fn dot(lhs: Operand, rhs: Operand, result: Operand) -> Self {
        Self::new(Op::Dot { lhs, rhs, result })
    }

    pub fn matvec(matrix: Operand, vector: Operand, result: Operand) -> Self {
        Self::new(Op::Matvec { matrix, vector, result })
    }

    pub fn matmul(lhs: Operand, rhs: Operand, result: Operand) -> Self {
        Self::new(Op::Matmul { lhs, rhs, result })
    }

    pub fn conv(filter: Operand, input: Operand, output: Operand) -> Self {
        Self::new(Op::Conv { filter, input, output, strides: None, dilations: None })
    }

    pub fn conv_with(
        filter: Operand,
        input: Operand,
        output: Operand,
        strides: Option<SmallVec<[i64; 3]>>,
        dilations: Option<SmallVec<[i64; 3]>>,
    ) -> Self {
        Self::new(Op::Conv { filter, input, output, strides, dilations })
    }

    pub fn generic(op: GenericOp) -> Self {
        Self::new(Op::Generic(op))
    }

    pub fn indexed_generic(op: GenericOp) -> Self {
        Self::new(Op::IndexedGeneric(op))
    }

    pub fn try_copy(input: Operand, output: Operand) -> Result<Self> {
        Self::copy(input, output).verified()
    }

    pub fn try_copy_permuted(
        input: Operand,
        output: Operand,
        input_permutation: Option<Permutation>,
        output_permutation: Option<Permutation>,
    ) -> Result<Self> {
        Self::copy_permuted(input, output, input_permutation, output_permutation).verified()
    }

    pub fn try_fill(output: Operand, value: ConstValue) -> Result<Self> {
        Self::fill(output, value).verified()
    }

    pub fn try_dot(lhs: Operand, rhs: Operand, result: Operand) -> Result<Self> {
        Self::dot(lhs, rhs, result).verified()
    }

    pub fn try_matvec(matrix: Operand, vector: Operand, result: Operand) -> Result<Self> {
        Self::matvec(matrix, vector, result).verified()
    }

    pub fn try_matmul(lhs: Operand, rhs: Operand, result: Operand) -> Result<Self> {
        Self::matmul(lhs, rhs, result).verified()
    }

    pub fn try_conv(
        filter: Operand,
        input: Operand,
        output: Operand,
        strides: Option<SmallVec<[i64; 3]>>,
        dilations: Option<SmallVec<[i64; 3]>>,
    ) -> Result<Self> {
        Self::conv_with(filter, input, output, strides, dilations).verified()
    }

    pub fn try_generic(op: GenericOp) -> Result<Self> {
        Self::generic(op).verified()
    }

    pub fn try_indexed_generic(op: GenericOp) -> Result<Self> {
        Self::indexed_generic(op).verified()
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn into_op(self) -> Op {
        self.op
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn num_inputs(&self) -> usize {
        self.op.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.op.num_outputs()
    }

    pub fn num_operands(&self) -> usize {
        self.op.operands().len()
    }

    pub fn operands(&self) -> SmallVec<[&Operand; 4]> {
        self.op.operands()
    }

    pub fn operand(&self, idx: usize) -> Option<&Operand> {
        self.op.operands().get(idx).copied()
    }

    pub fn inputs(&self) -> SmallVec<[&Operand; 4]> {
        let n = self.num_inputs();
        self.op.operands().into_iter().take(n).collect()
    }

    pub fn outputs(&self) -> SmallVec<[&Operand; 4]> {
        let n = self.num_inputs();
        self.op.operands().into_iter().skip(n).collect()
    }

    /// Position of the operand holding `id`, if any.
    pub fn operand_position(&self, id: crate::value::ValueId) -> Option<usize> {
        self.op.operands().iter().position(|o| o.id == id)
    }

    pub fn is_output(&self, idx: usize) -> bool {
        idx >= self.num_inputs() && idx < self.num_operands()
    }

    pub fn region(&self) -> Option<&Region> {
        self.op.region()
    }

    /// Same op over different operand views, with a fresh identity.
    ///
    /// `operands` must have the original operand count; ranks and types are re-checked by
    /// the verifier, not here.
    pub fn with_operands(&self, operands: impl IntoIterator<Item = Operand>) -> Self {
        let mut op = self.op.clone();
        for (slot, new) in op.operands_mut().into_iter().zip(operands) {
            *slot = new;
        }
        Self::new(op)
    }

    /// Same op with a fresh identity.
    pub fn renewed(&self) -> Self {
        Self::new(self.op.clone())
    }
}

impl fmt::Display for StructuredOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = join_operands(self.inputs());
        let outputs = join_operands(self.outputs());
        write!(f, "{}{} ins({inputs}) outs({outputs})", self.name(), self.id)?;
        match &self.op {
            Op::Fill { value, .. } => write!(f, " value({value})"),
            Op::Copy { input_permutation, output_permutation, .. } => {
                if let Some(p) = input_permutation {
                    write!(f, " in_perm{p}")?;
                }
                if let Some(p) = output_permutation {
                    write!(f, " out_perm{p}")?;
                }
                Ok(())
            }
            Op::Conv { strides, dilations, .. } => {
                if let Some(s) = strides {
                    write!(f, " strides{s:?}")?;
                }
                if let Some(d) = dilations {
                    write!(f, " dilations{d:?}")?;
                }
                Ok(())
            }
            Op::Generic(g) | Op::IndexedGeneric(g) => {
                write!(f, " {}", g.region)?;
                if let Some(call) = &g.library_call {
                    write!(f, " library_call({call})")?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
