//! Explicit loop IR.
//!
//! Rewrites that leave the structured-op level (tiling, fusion, promotion, lowering,
//! vectorization) produce blocks of [`Stmt`]. A block may still embed structured ops
//! (`Stmt::Op`), e.g. the inner op of a tile loop, which later rewrites pick up again.

pub mod expr;
pub mod verify;

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use smallvec::SmallVec;
use tessera_dtype::DType;

use crate::affine::AffineMap;
use crate::library::Symbol;
use crate::op::StructuredOp;
use crate::region::Region;
use crate::types::IteratorKind;
use crate::value::{Operand, ValueId, join_operands};

pub use expr::{IndexExpr, LoopVar};
pub use verify::verify_nest;

static SCALAR_VAR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// SSA scalar produced by a load or a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScalarVar(u32);

impl ScalarVar {
    pub fn fresh() -> Self {
        Self(SCALAR_VAR_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScalarVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%s{}", self.0)
    }
}

/// How a loop is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LoopForm {
    /// Plain counted loop; any bound expression.
    #[strum(serialize = "loops", serialize = "generic")]
    Generic,
    /// Bounds affine in outer loop variables and function-level extents.
    #[default]
    Affine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub var: LoopVar,
    pub lower: IndexExpr,
    pub upper: IndexExpr,
    pub step: i64,
    pub form: LoopForm,
    pub body: Vec<Stmt>,
}

impl Loop {
    /// Number of iterations when both bounds are constant.
    pub fn trip_count(&self) -> Option<i64> {
        let (lo, hi) = (self.lower.as_const()?, self.upper.as_const()?);
        if self.step <= 0 {
            return None;
        }
        Some(((hi - lo).max(0) + self.step - 1) / self.step)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarArg {
    Value(ScalarVar),
    /// Loop coordinate passed to an indexed region.
    Index(IndexExpr),
}

impl fmt::Display for ScalarArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Index(e) => write!(f, "{e}"),
        }
    }
}

/// A bilinear reduction `acc += lhs * rhs` over a static iteration space.
#[derive(Debug, Clone, PartialEq)]
pub struct Contraction {
    pub lhs: Operand,
    pub rhs: Operand,
    pub acc: Operand,
    /// Maps for `lhs`, `rhs`, `acc`.
    pub indexing_maps: [AffineMap; 3],
    pub iterator_kinds: SmallVec<[IteratorKind; 6]>,
    pub shape: SmallVec<[usize; 6]>,
    pub compute_dtype: DType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Loop(Loop),
    /// `result` aliases `source[offsets.., +sizes..]`.
    SubView {
        result: Operand,
        source: ValueId,
        offsets: SmallVec<[IndexExpr; 4]>,
        sizes: SmallVec<[IndexExpr; 4]>,
    },
    /// `buffer` is allocated with `sizes` for the duration of `body` only.
    LocalBuffer {
        buffer: Operand,
        sizes: SmallVec<[IndexExpr; 4]>,
        body: Vec<Stmt>,
    },
    Op(StructuredOp),
    Load {
        result: ScalarVar,
        source: ValueId,
        indices: SmallVec<[IndexExpr; 4]>,
    },
    /// Apply a region to scalar arguments.
    Compute {
        results: SmallVec<[ScalarVar; 2]>,
        region: Region,
        args: SmallVec<[ScalarArg; 6]>,
    },
    Store {
        value: ScalarVar,
        target: ValueId,
        indices: SmallVec<[IndexExpr; 4]>,
    },
    Contract(Contraction),
    LibraryCall {
        callee: Symbol,
        operands: SmallVec<[Operand; 4]>,
    },
}

impl Stmt {
    pub fn as_loop(&self) -> Option<&Loop> {
        match self {
            Stmt::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&StructuredOp> {
        match self {
            Stmt::Op(op) => Some(op),
            _ => None,
        }
    }

    /// Nested statements, if this statement has a body.
    pub fn body(&self) -> Option<&[Stmt]> {
        match self {
            Stmt::Loop(l) => Some(&l.body),
            Stmt::LocalBuffer { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Vec<Stmt>> {
        match self {
            Stmt::Loop(l) => Some(&mut l.body),
            Stmt::LocalBuffer { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Values this statement reads directly (not through its body).
    pub fn reads(&self) -> SmallVec<[ValueId; 4]> {
        match self {
            Stmt::SubView { source, .. } | Stmt::Load { source, .. } => SmallVec::from_iter([*source]),
            Stmt::Op(op) => op.operands().iter().map(|o| o.id).collect(),
            Stmt::Contract(c) => SmallVec::from_iter([c.lhs.id, c.rhs.id, c.acc.id]),
            Stmt::LibraryCall { operands, .. } => operands.iter().map(|o| o.id).collect(),
            Stmt::Store { .. } | Stmt::Loop(_) | Stmt::LocalBuffer { .. } | Stmt::Compute { .. } => SmallVec::new(),
        }
    }
}

/// Pre-order visit of every statement in `block`, nested bodies included.
pub fn walk<'a>(block: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in block {
        f(stmt);
        if let Some(body) = stmt.body() {
            walk(body, f);
        }
    }
}

/// Every loop of `block` in pre-order.
pub fn loops(block: &[Stmt]) -> Vec<&Loop> {
    let mut out = Vec::new();
    walk(block, &mut |s| {
        if let Stmt::Loop(l) = s {
            out.push(l);
        }
    });
    out
}

/// Every structured op embedded in `block`.
pub fn ops(block: &[Stmt]) -> Vec<&StructuredOp> {
    let mut out = Vec::new();
    walk(block, &mut |s| {
        if let Stmt::Op(op) = s {
            out.push(op);
        }
    });
    out
}

/// Every local buffer allocated in `block`.
pub fn local_buffers(block: &[Stmt]) -> Vec<&Operand> {
    let mut out = Vec::new();
    walk(block, &mut |s| {
        if let Stmt::LocalBuffer { buffer, .. } = s {
            out.push(buffer);
        }
    });
    out
}

/// Textual dump of a block, two spaces per nesting level.
pub fn render(block: &[Stmt]) -> String {
    Rendered(block).to_string()
}

/// Display adapter over a block; see [`render`].
#[derive(Debug, Clone, Copy)]
pub struct Rendered<'a>(pub &'a [Stmt]);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_into(f, self.0, 0)
    }
}

fn render_into(out: &mut impl fmt::Write, block: &[Stmt], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for stmt in block {
        let written = match stmt {
            Stmt::Loop(l) => {
                let kw = match l.form {
                    LoopForm::Affine => "affine.for",
                    LoopForm::Generic => "for",
                };
                writeln!(out, "{pad}{kw} {} = {} to {} step {} {{", l.var, l.lower, l.upper, l.step)?;
                render_into(out, &l.body, depth + 1)?;
                writeln!(out, "{pad}}}")
            }
            Stmt::SubView { result, source, offsets, sizes } => writeln!(
                out,
                "{pad}{} = subview {source}[{}][{}] : {}",
                result.id,
                offsets.iter().join(", "),
                sizes.iter().join(", "),
                result.ty
            ),
            Stmt::LocalBuffer { buffer, sizes, body } => {
                writeln!(out, "{pad}{} = alloc({}) : {} {{", buffer.id, sizes.iter().join(", "), buffer.ty)?;
                render_into(out, body, depth + 1)?;
                writeln!(out, "{pad}}} dealloc {}", buffer.id)
            }
            Stmt::Op(op) => writeln!(out, "{pad}{op}"),
            Stmt::Load { result, source, indices } => {
                writeln!(out, "{pad}{result} = load {source}[{}]", indices.iter().join(", "))
            }
            Stmt::Compute { results, region, args } => {
                writeln!(out, "{pad}{} = apply {region}({})", results.iter().join(", "), args.iter().join(", "))
            }
            Stmt::Store { value, target, indices } => {
                writeln!(out, "{pad}store {value}, {target}[{}]", indices.iter().join(", "))
            }
            Stmt::Contract(c) => writeln!(
                out,
                "{pad}contract {}, {}, {} shape [{}] : {}",
                c.lhs.id,
                c.rhs.id,
                c.acc.id,
                c.shape.iter().join(", "),
                c.compute_dtype
            ),
            Stmt::LibraryCall { callee, operands } => writeln!(out, "{pad}call @{callee}({})", join_operands(operands)),
        };
        written?;
    }
    Ok(())
}
