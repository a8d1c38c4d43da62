//! Rewrites over structured operations.
//!
//! # Module Organization
//!
//! - [`lower`] - Loop nests and library calls
//! - [`tile`] - Tile loops around narrowed ops
//! - [`fuse`] - Producer-consumer fusion into a tile loop
//! - [`permute`] - Loop permutation and generalization
//! - [`promote`] - Operand promotion into local buffers
//! - [`vectorize`] - Vector contractions
//! - [`marker`] - Transform markers and filters
//! - [`request`] - Rewrite requests and dispatch
//! - [`driver`] - Fixpoint pattern driver
//! - [`config`] - Transform configuration
//!
//! Every rewrite borrows its input and either returns a complete replacement or an error;
//! nothing is modified on failure.

pub mod config;
pub mod driver;
pub mod error;
pub mod fuse;
pub mod lower;
pub mod marker;
pub mod permute;
pub mod promote;
pub mod request;
pub mod tile;
pub mod vectorize;


pub use config::TransformConfig;
pub use driver::{Pattern, Rewriter};
pub use error::{Result, TransformError};
pub use fuse::fuse;
pub use lower::{lower_preferred, lower_to_library_call, lower_to_loops};
pub use marker::{Marker, MarkerFilter, MarkerTable};
pub use permute::{generalize, permute};
pub use promote::promote;
pub use request::{RewriteKind, RewriteRequest, Rewritten};
pub use tile::{OperandView, TileLoop, TileNest, TiledOp, tile};
pub use vectorize::vectorize;
