//! Index expressions of the loop IR.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::affine::AffineExpr;
use crate::types::Dim;
use crate::value::ValueId;

static LOOP_VAR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Loop induction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopVar(u32);

impl LoopVar {
    pub fn fresh() -> Self {
        Self(LOOP_VAR_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LoopVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%i{}", self.0)
    }
}

/// Integer expression over loop variables and runtime view extents.
///
/// Smart constructors fold constants, so two expressions built from the same static inputs
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexExpr {
    Const(i64),
    Var(LoopVar),
    /// Runtime extent of dimension `dim` of view `value`; `extent` records what is known
    /// about it statically (never `Static`, those fold to `Const`).
    Extent { value: ValueId, dim: usize, extent: Dim },
    Add(Box<IndexExpr>, Box<IndexExpr>),
    Sub(Box<IndexExpr>, Box<IndexExpr>),
    Mul(Box<IndexExpr>, i64),
    Min(Box<IndexExpr>, Box<IndexExpr>),
}

impl IndexExpr {
    pub fn var(var: LoopVar) -> Self {
        Self::Var(var)
    }

    pub fn extent(value: ValueId, dim: usize, extent: Dim) -> Self {
        match extent {
            Dim::Static(n) => Self::Const(n as i64),
            _ => Self::Extent { value, dim, extent },
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: IndexExpr) -> Self {
        match (self, rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a + b),
            (Self::Const(0), e) | (e, Self::Const(0)) => e,
            (Self::Const(c), e) => e.add(Self::Const(c)),
            (Self::Add(a, b), Self::Const(c)) => match *b {
                Self::Const(k) => (*a).add(Self::Const(k + c)),
                b => Self::Add(Box::new(Self::Add(a, Box::new(b))), Box::new(Self::Const(c))),
            },
            (a, b) => Self::Add(Box::new(a), Box::new(b)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: IndexExpr) -> Self {
        match (self, rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a - b),
            (e, Self::Const(0)) => e,
            (a, b) if a == b => Self::Const(0),
            (a, b) => Self::Sub(Box::new(a), Box::new(b)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, coeff: i64) -> Self {
        match (self, coeff) {
            (_, 0) => Self::Const(0),
            (e, 1) => e,
            (Self::Const(a), c) => Self::Const(a * c),
            (Self::Mul(e, a), c) => Self::Mul(e, a * c),
            (e, c) => Self::Mul(Box::new(e), c),
        }
    }

    pub fn min(self, rhs: IndexExpr) -> Self {
        match (self, rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a.min(b)),
            (a, b) if a == b => a,
            (a, b) => Self::Min(Box::new(a), Box::new(b)),
        }
    }

    /// Substitute `d_j -> dims[j]` in an affine expression.
    pub fn from_affine(expr: &AffineExpr, dims: &[IndexExpr]) -> Self {
        expr.terms()
            .iter()
            .fold(Self::Const(expr.constant_term()), |acc, &(d, c)| acc.add(dims[d].clone().mul(c)))
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Smallest value the expression can take, assuming loop variables and extents are
    /// non-negative.
    pub fn lower_bound(&self) -> Option<i64> {
        match self {
            Self::Const(c) => Some(*c),
            Self::Var(_) | Self::Extent { .. } => Some(0),
            Self::Add(a, b) => Some(a.lower_bound()? + b.lower_bound()?),
            Self::Sub(a, b) => Some(a.lower_bound()? - b.upper_bound()?),
            Self::Mul(e, c) if *c >= 0 => Some(e.lower_bound()? * c),
            Self::Mul(e, c) => Some(e.upper_bound()? * c),
            Self::Min(a, b) => Some(a.lower_bound()?.min(b.lower_bound()?)),
        }
    }

    /// Largest value the expression can take, when it is statically known.
    pub fn upper_bound(&self) -> Option<i64> {
        match self {
            Self::Const(c) => Some(*c),
            Self::Var(_) => None,
            Self::Extent { extent, .. } => extent.upper_bound().map(|ub| ub as i64),
            Self::Add(a, b) => Some(a.upper_bound()? + b.upper_bound()?),
            Self::Sub(a, b) => Some(a.upper_bound()? - b.lower_bound()?),
            Self::Mul(e, c) if *c >= 0 => Some(e.upper_bound()? * c),
            Self::Mul(e, c) => Some(e.lower_bound()? * c),
            Self::Min(a, b) => match (a.upper_bound(), b.upper_bound()) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            },
        }
    }

    /// Representable as an affine bound: no `min`, extents are function-level symbols.
    pub fn is_affine(&self) -> bool {
        match self {
            Self::Const(_) | Self::Var(_) => true,
            Self::Extent { extent, .. } => extent.is_affine_symbol(),
            Self::Add(a, b) | Self::Sub(a, b) => a.is_affine() && b.is_affine(),
            Self::Mul(e, _) => e.is_affine(),
            Self::Min(..) => false,
        }
    }

    pub fn visit_vars(&self, f: &mut impl FnMut(LoopVar)) {
        match self {
            Self::Var(v) => f(*v),
            Self::Const(_) | Self::Extent { .. } => {}
            Self::Add(a, b) | Self::Sub(a, b) | Self::Min(a, b) => {
                a.visit_vars(f);
                b.visit_vars(f);
            }
            Self::Mul(e, _) => e.visit_vars(f),
        }
    }

    pub fn visit_values(&self, f: &mut impl FnMut(ValueId)) {
        match self {
            Self::Extent { value, .. } => f(*value),
            Self::Const(_) | Self::Var(_) => {}
            Self::Add(a, b) | Self::Sub(a, b) | Self::Min(a, b) => {
                a.visit_values(f);
                b.visit_values(f);
            }
            Self::Mul(e, _) => e.visit_values(f),
        }
    }

    /// Evaluate with the given variable and extent lookups.
    pub fn evaluate(&self, var: &impl Fn(LoopVar) -> Option<i64>, extent: &impl Fn(ValueId, usize) -> Option<i64>) -> Option<i64> {
        Some(match self {
            Self::Const(c) => *c,
            Self::Var(v) => var(*v)?,
            Self::Extent { value, dim, .. } => extent(*value, *dim)?,
            Self::Add(a, b) => a.evaluate(var, extent)? + b.evaluate(var, extent)?,
            Self::Sub(a, b) => a.evaluate(var, extent)? - b.evaluate(var, extent)?,
            Self::Mul(e, c) => e.evaluate(var, extent)? * c,
            Self::Min(a, b) => a.evaluate(var, extent)?.min(b.evaluate(var, extent)?),
        })
    }

    /// Static description of the extent this expression computes.
    pub fn as_dim(&self) -> Dim {
        match self {
            Self::Const(c) => Dim::Static((*c).max(0) as usize),
            Self::Extent { extent, .. } => *extent,
            other => Dim::Bounded(other.upper_bound().map(|ub| ub.max(0) as usize)),
        }
    }
}

impl From<LoopVar> for IndexExpr {
    fn from(var: LoopVar) -> Self {
        Self::Var(var)
    }
}

impl From<i64> for IndexExpr {
    fn from(c: i64) -> Self {
        Self::Const(c)
    }
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{c}"),
            Self::Var(v) => write!(f, "{v}"),
            Self::Extent { value, dim, .. } => write!(f, "dim({value}, {dim})"),
            Self::Add(a, b) => write!(f, "({a} + {b})"),
            Self::Sub(a, b) => write!(f, "({a} - {b})"),
            Self::Mul(e, c) => write!(f, "{e} * {c}"),
            Self::Min(a, b) => write!(f, "min({a}, {b})"),
        }
    }
}
