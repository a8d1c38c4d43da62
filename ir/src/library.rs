//! Library-call naming and symbol lookup.
//!
//! Structured ops can be lowered to calls into an external kernel library. The callee name
//! is derived deterministically from the op variant and its operand types, e.g.
//! `matmul_viewsxsxf32_viewsxsxf32_viewsxsxf32`. Symbols are validated against a host table
//! and never dereferenced.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::op::{Op, StructuredOp};
use crate::value::Operand;

/// Opaque symbol name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host symbol table consulted when verifying `library_call` attributes.
pub trait SymbolTable {
    fn contains_symbol(&self, name: &str) -> bool;
}

impl SymbolTable for HashSet<String> {
    fn contains_symbol(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl SymbolTable for BTreeSet<String> {
    fn contains_symbol(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// `f32` for rank 0, `viewsxsxf32` for a rank-2 view of `f32`.
fn mangle_operand(operand: &Operand) -> String {
    match operand.rank() {
        0 => operand.dtype().mangle(),
        rank => format!("view{}{}", "sx".repeat(rank), operand.dtype().mangle()),
    }
}

impl StructuredOp {
    /// Name of the external kernel implementing this op.
    ///
    /// A generic op with an explicit `library_call` uses it verbatim.
    pub fn library_call_name(&self) -> String {
        if let Some(call) = self.op().as_generic().and_then(|g| g.library_call.as_ref()) {
            return call.to_string();
        }
        let mut parts: Vec<String> = vec![self.name().to_string()];
        parts.extend(self.operands().iter().map(|o| mangle_operand(o)));
        if let Op::Fill { output, .. } = self.op() {
            parts.push(output.dtype().mangle());
        }
        parts.into_iter().join("_")
    }
}
