//! Operand/view handles.
//!
//! An [`Operand`] pairs an opaque [`ValueId`] (owned by the host's value system) with the
//! [`ViewType`] the structured ops need: element type, per-dimension extents and strides.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use smallvec::SmallVec;
use tessera_dtype::DType;

use crate::types::Dim;

static VALUE_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Identity of a view value. Compared, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub fn fresh() -> Self {
        Self(VALUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

/// Shape, strides and element type of a strided view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewType {
    pub dtype: DType,
    pub shape: SmallVec<[Dim; 4]>,
    pub strides: SmallVec<[Dim; 4]>,
}

impl ViewType {
    /// Row-major view. Strides are static as long as every inner extent is.
    pub fn new(dtype: DType, shape: impl IntoIterator<Item = Dim>) -> Self {
        let shape: SmallVec<[Dim; 4]> = shape.into_iter().collect();
        let mut strides: SmallVec<[Dim; 4]> = SmallVec::with_capacity(shape.len());
        let mut running = Some(1usize);
        for dim in shape.iter().rev() {
            strides.push(running.map_or(Dim::Dynamic, Dim::Static));
            running = running.zip(dim.as_static()).map(|(acc, d)| acc * d);
        }
        strides.reverse();
        Self { dtype, shape, strides }
    }

    pub fn from_static(dtype: DType, shape: &[usize]) -> Self {
        Self::new(dtype, shape.iter().copied().map(Dim::Static))
    }

    /// View of the given rank whose extents are all runtime values.
    pub fn dynamic(dtype: DType, rank: usize) -> Self {
        Self::new(dtype, std::iter::repeat_n(Dim::Dynamic, rank))
    }

    /// Rank-0 view holding a single element.
    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, [])
    }

    /// Same element type and strides, narrowed extents (a subview).
    pub fn narrowed(&self, shape: impl IntoIterator<Item = Dim>) -> Self {
        Self { dtype: self.dtype.clone(), shape: shape.into_iter().collect(), strides: self.strides.clone() }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, idx: usize) -> Option<Dim> {
        self.shape.get(idx).copied()
    }

    pub fn static_shape(&self) -> Option<SmallVec<[usize; 4]>> {
        self.shape.iter().map(|d| d.as_static()).collect()
    }

    pub fn has_static_shape(&self) -> bool {
        self.shape.iter().all(|d| d.is_static())
    }

    pub fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, d| d.as_static().map(|d| acc * d))
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view<")?;
        for dim in &self.shape {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.dtype)
    }
}

/// A view referenced by a structured operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    pub id: ValueId,
    pub ty: ViewType,
}

impl Operand {
    /// New value with a fresh identity.
    pub fn new(ty: ViewType) -> Self {
        Self { id: ValueId::fresh(), ty }
    }

    /// Reference an existing host value.
    pub fn with_id(id: ValueId, ty: ViewType) -> Self {
        Self { id, ty }
    }

    pub fn rank(&self) -> usize {
        self.ty.rank()
    }

    pub fn dtype(&self) -> &DType {
        &self.ty.dtype
    }

    pub fn shape(&self) -> &[Dim] {
        &self.ty.shape
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.ty)
    }
}

/// Render operands as a comma-separated list.
pub(crate) fn join_operands<'a>(operands: impl IntoIterator<Item = &'a Operand>) -> String {
    operands.into_iter().map(|o| o.to_string()).join(", ")
}
