use snafu::Snafu;
use tessera_ir::{IteratorKind, OpId, ValueId};

pub type Result<T, E = TransformError> = std::result::Result<T, E>;

/// Rewrite failures. The input of a failed rewrite is never modified.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// Model or verifier error from the IR layer.
    #[snafu(display("{source}"), context(false))]
    Ir { source: tessera_ir::Error },

    #[snafu(display("cannot tile loop #{dim} ({kind}) with size {size}"))]
    IllegalTileDimension { dim: usize, kind: IteratorKind, size: usize },

    #[snafu(display("{given} tile sizes for an op with {loops} loops"))]
    TileSizeCount { given: usize, loops: usize },

    #[snafu(display("producer cannot be fused: {reason}"))]
    UnfusableIndexing { reason: String },

    #[snafu(display("op {producer} does not write {value}"))]
    NotAProducer { producer: OpId, value: ValueId },

    #[snafu(display("loop #{dim} has no static extent"))]
    NonStaticShape { dim: usize },

    #[snafu(display("'{op}' is not a contraction: {reason}"))]
    NotAContraction { op: &'static str, reason: &'static str },

    #[snafu(display("bound of loop #{dim} is not affine"))]
    NonAffineBound { dim: usize },

    #[snafu(display("'{op}' is not supported here: {reason}"))]
    UnsupportedOp { op: &'static str, reason: &'static str },

    #[snafu(display("rewrite limit of {limit} reached without a fixpoint"))]
    RewriteLimitExceeded { limit: usize },

    #[snafu(display("no op {target} in the rewritten block"))]
    UnknownTarget { target: OpId },
}

impl TransformError {
    /// Match failures a pattern driver may skip. Everything else indicates a malformed
    /// program or driver and is surfaced.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IllegalTileDimension { .. }
                | Self::TileSizeCount { .. }
                | Self::UnfusableIndexing { .. }
                | Self::NotAProducer { .. }
                | Self::NonStaticShape { .. }
                | Self::NotAContraction { .. }
                | Self::NonAffineBound { .. }
                | Self::UnsupportedOp { .. }
        )
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Ir { source } if source.is_verification())
    }
}
