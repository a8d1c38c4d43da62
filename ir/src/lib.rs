//! Structured linear-algebra operations for the Tessera compiler.
//!
//! # Module Organization
//!
//! - [`affine`] - Affine maps from an iteration space to operand coordinates
//! - [`value`] - View handles: element type, extents, strides
//! - [`region`] - Typed computation bodies of generic ops
//! - [`op`] - The structured operation variants
//! - [`indexing`] - Iteration spaces (loops, kinds, maps, extents) of each variant
//! - [`verify`] - Structural verifier
//! - [`library`] - Library-call naming and symbol lookup
//! - [`nest`] - Explicit loop IR produced by the transforms
//! - [`error`] - Error types and result handling

pub mod affine;
pub mod error;
pub mod indexing;
pub mod library;
pub mod nest;
pub mod op;
pub mod prelude;
pub mod region;
pub mod types;
pub mod value;
pub mod verify;


pub use affine::{AffineExpr, AffineMap, Permutation};
pub use error::{Error, Invariant, Result, Site};
pub use indexing::LoopExtent;
pub use library::{Symbol, SymbolTable};
pub use nest::{Contraction, IndexExpr, Loop, LoopForm, LoopVar, ScalarArg, ScalarVar, Stmt};
pub use op::{GenericOp, Op, OpId, StructuredOp};
pub use region::{KnownBody, Region};
pub use types::{ConstValue, Dim, IteratorKind};
pub use value::{Operand, ValueId, ViewType};

pub use tessera_dtype::{DType, ScalarDType};
