//! Computation regions of `Generic` / `IndexedGeneric` ops.
//!
//! A region is an opaque, independently typed handle: parameter types in, result types out.
//! Its body belongs to the host. The only bodies this crate understands are the
//! [`KnownBody`] forms produced when named ops are generalized.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;
use tessera_dtype::DType;

use crate::types::ConstValue;

/// Scalar bodies with semantics known to the transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KnownBody {
    /// Yield the first input unchanged.
    Identity,
    /// Yield a constant.
    Constant(ConstValue),
    /// `acc + lhs * rhs` over parameters `(lhs, rhs, acc)`.
    MulAdd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: Arc<str>,
    params: SmallVec<[DType; 6]>,
    results: SmallVec<[DType; 2]>,
    known: Option<KnownBody>,
}

impl Region {
    /// Host-owned body identified by `name`.
    pub fn opaque(
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = DType>,
        results: impl IntoIterator<Item = DType>,
    ) -> Self {
        Self { name: name.into(), params: params.into_iter().collect(), results: results.into_iter().collect(), known: None }
    }

    /// Body with semantics this crate can reason about.
    pub fn known(
        body: KnownBody,
        params: impl IntoIterator<Item = DType>,
        results: impl IntoIterator<Item = DType>,
    ) -> Self {
        let name = match body {
            KnownBody::Identity => "identity",
            KnownBody::Constant(_) => "constant",
            KnownBody::MulAdd => "mul_add",
        };
        Self { known: Some(body), ..Self::opaque(name, params, results) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[DType] {
        &self.params
    }

    pub fn results(&self) -> &[DType] {
        &self.results
    }

    pub fn known_body(&self) -> Option<KnownBody> {
        self.known
    }

    /// Same body with a different parameter list.
    pub fn with_params(&self, params: impl IntoIterator<Item = DType>) -> Self {
        Self { params: params.into_iter().collect(), ..self.clone() }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{}({}) -> ({})", self.name, self.params.iter().join(", "), self.results.iter().join(", "))
    }
}
