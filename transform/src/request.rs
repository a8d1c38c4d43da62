//! Rewrite requests and their dispatch.

use smallvec::SmallVec;
use tessera_ir::{LoopForm, OpId, Stmt, StructuredOp};

use crate::config::TransformConfig;
use crate::error::*;
use crate::fuse::fuse;
use crate::lower::{lower_preferred, lower_to_library_call, lower_to_loops};
use crate::marker::Marker;
use crate::permute::permute;
use crate::promote::promote;
use crate::tile::{TileNest, TiledOp, tile};
use crate::vectorize::vectorize;

/// Transform kind with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RewriteKind {
    Tile {
        sizes: SmallVec<[usize; 6]>,
        interchange: Option<SmallVec<[usize; 6]>>,
    },
    /// Tile the consumer, then fuse the producer of operand `operand` into the tile loop.
    /// Without an explicit `producer` the nearest preceding writer is used.
    Fuse {
        tile_sizes: SmallVec<[usize; 6]>,
        interchange: Option<SmallVec<[usize; 6]>>,
        operand: usize,
        producer: Option<OpId>,
    },
    Permute {
        perm: SmallVec<[usize; 6]>,
    },
    Promote {
        operands: SmallVec<[usize; 4]>,
    },
    Vectorize,
    /// Lower with the given form, or with the configured one (falling back to generic
    /// loops) when unset.
    LowerToLoops {
        form: Option<LoopForm>,
    },
    LowerToLibraryCall,
}

impl RewriteKind {
    pub fn tile(sizes: impl IntoIterator<Item = usize>) -> Self {
        Self::Tile { sizes: sizes.into_iter().collect(), interchange: None }
    }

    pub fn tile_and_fuse(sizes: impl IntoIterator<Item = usize>, operand: usize) -> Self {
        Self::Fuse { tile_sizes: sizes.into_iter().collect(), interchange: None, operand, producer: None }
    }

    pub fn permute(perm: impl IntoIterator<Item = usize>) -> Self {
        Self::Permute { perm: perm.into_iter().collect() }
    }

    pub fn promote(operands: impl IntoIterator<Item = usize>) -> Self {
        Self::Promote { operands: operands.into_iter().collect() }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Run on `op`. `producer` is consulted by `Fuse` only.
    pub fn apply(
        &self,
        op: &StructuredOp,
        producer: Option<&StructuredOp>,
        config: &TransformConfig,
    ) -> Result<Rewritten> {
        Ok(match self {
            Self::Tile { sizes, interchange } => Rewritten::Tiled(tile(op, sizes, interchange.as_deref())?),
            Self::Fuse { tile_sizes, interchange, operand, .. } => {
                let Some(producer) = producer else {
                    let value = op.operand(*operand).map(|o| o.id);
                    return match value {
                        Some(value) => NotAProducerSnafu { producer: op.id(), value }.fail(),
                        None => UnsupportedOpSnafu { op: op.name(), reason: "fused operand index out of range" }.fail(),
                    };
                };
                let tiled = tile(op, tile_sizes, interchange.as_deref())?;
                Rewritten::Nest(fuse(&tiled, *operand, producer)?)
            }
            Self::Permute { perm } => Rewritten::Op(permute(op, perm)?),
            Self::Promote { operands } => Rewritten::Block(promote(op, operands, config)?),
            Self::Vectorize => Rewritten::Block(vec![vectorize(op)?]),
            Self::LowerToLoops { form: Some(form) } => Rewritten::Block(lower_to_loops(op, *form)?),
            Self::LowerToLoops { form: None } => Rewritten::Block(lower_preferred(op, config)?),
            Self::LowerToLibraryCall => Rewritten::Block(vec![lower_to_library_call(op)?]),
        })
    }
}

/// One transform invocation on one op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRequest {
    pub target: OpId,
    pub kind: RewriteKind,
    /// Marker for the ops the rewrite produces.
    pub marker: Option<Marker>,
}

impl RewriteRequest {
    pub fn new(target: OpId, kind: RewriteKind) -> Self {
        Self { target, kind, marker: None }
    }

    pub fn with_marker(mut self, marker: impl Into<Marker>) -> Self {
        self.marker = Some(marker.into());
        self
    }
}

/// Replacement produced by a rewrite.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten {
    Op(StructuredOp),
    Tiled(TiledOp),
    Nest(TileNest),
    Block(Vec<Stmt>),
}

impl Rewritten {
    pub fn into_stmts(self) -> Vec<Stmt> {
        match self {
            Self::Op(op) => vec![Stmt::Op(op)],
            Self::Tiled(tiled) => tiled.into_stmts(),
            Self::Nest(nest) => nest.into_stmts(),
            Self::Block(block) => block,
        }
    }
}
