//! Common imports for building and inspecting structured ops:
//!
//! ```rust,ignore
//! use tessera_ir::prelude::*;
//! ```

pub use crate::affine::{AffineExpr, AffineMap, Permutation};
pub use crate::nest::{IndexExpr, LoopForm, LoopVar, Stmt};
pub use crate::op::{GenericOp, Op, OpId, StructuredOp};
pub use crate::region::{KnownBody, Region};
pub use crate::types::{ConstValue, Dim, IteratorKind};
pub use crate::value::{Operand, ValueId, ViewType};

pub use tessera_dtype::{DType, ScalarDType};
