//! Type definitions shared across the IR: iterator kinds, scalar constants and view extents.

use std::fmt;

use tessera_dtype::{DType, ScalarDType};

/// Classification of one iteration-space dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum IteratorKind {
    /// Independent iterations; may run in any order or concurrently.
    Parallel,
    /// Accumulates across iterations.
    Reduction,
    /// Sliding-window accumulation. Never tiled or distributed.
    Window,
}

impl IteratorKind {
    pub const fn is_parallel(self) -> bool {
        matches!(self, Self::Parallel)
    }

    /// Reduction and Window both accumulate into the output.
    pub const fn accumulates(self) -> bool {
        matches!(self, Self::Reduction | Self::Window)
    }

    pub const fn is_tileable(self) -> bool {
        !matches!(self, Self::Window)
    }
}

/// Scalar constant used by `Fill` and known region bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl ConstValue {
    pub const fn dtype(&self) -> DType {
        match self {
            ConstValue::Int(_) => DType::Int64,
            ConstValue::UInt(_) => DType::UInt64,
            ConstValue::Float(_) => DType::Float64,
            ConstValue::Bool(_) => DType::Bool,
        }
    }

    pub const fn zero(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(false),
            Int8 | Int16 | Int32 | Int64 | Index => Self::Int(0),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(0),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(0.0),
        }
    }

    /// Check whether the value can be stored into an element of `dtype` without changing it.
    pub fn fits(&self, dtype: &DType) -> bool {
        let Some(scalar) = dtype.scalar() else {
            return false;
        };
        match *self {
            ConstValue::Bool(_) => true,
            ConstValue::Float(v) => scalar.is_float() || (scalar.is_int() && v.fract() == 0.0 && fits_int(v as i128, scalar)),
            ConstValue::Int(v) => scalar.is_float() || (scalar.is_int() && fits_int(v as i128, scalar)),
            ConstValue::UInt(v) => scalar.is_float() || (scalar.is_int() && fits_int(v as i128, scalar)),
        }
    }

    /// Numeric value as `f64` (booleans map to 0/1).
    pub fn as_f64(&self) -> f64 {
        match *self {
            ConstValue::Int(v) => v as f64,
            ConstValue::UInt(v) => v as f64,
            ConstValue::Float(v) => v,
            ConstValue::Bool(v) => v as u8 as f64,
        }
    }
}

fn fits_int(v: i128, scalar: ScalarDType) -> bool {
    let (min, max): (i128, i128) = match scalar {
        ScalarDType::Int8 => (i8::MIN.into(), i8::MAX.into()),
        ScalarDType::Int16 => (i16::MIN.into(), i16::MAX.into()),
        ScalarDType::Int32 => (i32::MIN.into(), i32::MAX.into()),
        ScalarDType::Int64 | ScalarDType::Index => (i64::MIN.into(), i64::MAX.into()),
        ScalarDType::UInt8 => (0, u8::MAX.into()),
        ScalarDType::UInt16 => (0, u16::MAX.into()),
        ScalarDType::UInt32 => (0, u32::MAX.into()),
        ScalarDType::UInt64 => (0, u64::MAX.into()),
        _ => return false,
    };
    (min..=max).contains(&v)
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::UInt(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v:?}"),
            ConstValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Extent of one view dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Known at construction time.
    Static(usize),
    /// Runtime extent of a function-level view; valid as an affine symbol.
    Dynamic,
    /// Runtime extent computed inside a tile loop (partial tiles), with its static
    /// upper bound when one is known. Not an affine symbol.
    Bounded(Option<usize>),
}

impl Dim {
    pub const fn as_static(self) -> Option<usize> {
        match self {
            Self::Static(n) => Some(n),
            _ => None,
        }
    }

    pub const fn is_static(self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// Largest value the extent can take, if known.
    pub const fn upper_bound(self) -> Option<usize> {
        match self {
            Self::Static(n) => Some(n),
            Self::Bounded(ub) => ub,
            Self::Dynamic => None,
        }
    }

    /// Extents usable as bounds of affine loops.
    pub const fn is_affine_symbol(self) -> bool {
        matches!(self, Self::Static(_) | Self::Dynamic)
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Self::Static(n)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(n) => write!(f, "{n}"),
            Self::Dynamic => write!(f, "?"),
            Self::Bounded(Some(ub)) => write!(f, "?<={ub}"),
            Self::Bounded(None) => write!(f, "?"),
        }
    }
}
