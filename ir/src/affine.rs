//! Affine index model.
//!
//! An [`AffineMap`] sends a point of the shared iteration space (`d0 .. d{n-1}`) to one
//! operand's coordinates. Every result is an [`AffineExpr`]: an integer linear combination
//! of iteration dims plus a constant. Expressions are kept in canonical form (terms sorted
//! by dim, no zero coefficients), so structural equality is semantic equality.

use std::fmt;
use std::ops::{Add, Mul};

use itertools::Itertools;
use smallvec::{SmallVec, smallvec};
use snafu::OptionExt;

use crate::error::*;

/// Linear combination of iteration dims plus a constant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AffineExpr {
    terms: SmallVec<[(usize, i64); 2]>,
    constant: i64,
}

impl AffineExpr {
    pub fn dim(dim: usize) -> Self {
        Self { terms: smallvec![(dim, 1)], constant: 0 }
    }

    pub fn constant(value: i64) -> Self {
        Self { terms: SmallVec::new(), constant: value }
    }

    /// Build from `(dim, coefficient)` pairs; duplicates are merged.
    pub fn linear(terms: impl IntoIterator<Item = (usize, i64)>, constant: i64) -> Self {
        let mut expr = Self::constant(constant);
        for (dim, coeff) in terms {
            expr.add_term(dim, coeff);
        }
        expr
    }

    fn add_term(&mut self, dim: usize, coeff: i64) {
        match self.terms.binary_search_by_key(&dim, |&(d, _)| d) {
            Ok(pos) => {
                self.terms[pos].1 += coeff;
                if self.terms[pos].1 == 0 {
                    self.terms.remove(pos);
                }
            }
            Err(pos) if coeff != 0 => self.terms.insert(pos, (dim, coeff)),
            Err(_) => {}
        }
    }

    pub fn terms(&self) -> &[(usize, i64)] {
        &self.terms
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn coeff(&self, dim: usize) -> i64 {
        self.terms.iter().find(|&&(d, _)| d == dim).map_or(0, |&(_, c)| c)
    }

    /// The dim this expression reads verbatim (`d_k`), if it is exactly one.
    pub fn as_dim(&self) -> Option<usize> {
        match self.terms.as_slice() {
            [(dim, 1)] if self.constant == 0 => Some(*dim),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn dims(&self) -> impl Iterator<Item = usize> + '_ {
        self.terms.iter().map(|&(d, _)| d)
    }

    pub fn max_dim(&self) -> Option<usize> {
        self.terms.last().map(|&(d, _)| d)
    }

    /// Value at `point`, or `None` when `point` does not cover every referenced dim.
    pub fn evaluate(&self, point: &[i64]) -> Option<i64> {
        self.terms.iter().try_fold(self.constant, |acc, &(d, c)| Some(acc + c * point.get(d)?))
    }

    /// Replace every `d_j` with `replacements[j]`.
    pub fn substitute(&self, replacements: &[AffineExpr]) -> AffineExpr {
        self.terms
            .iter()
            .fold(Self::constant(self.constant), |acc, &(d, c)| acc + replacements[d].clone() * c)
    }

    /// Rename dims through `f`, keeping coefficients.
    pub fn rename_dims(&self, f: impl Fn(usize) -> usize) -> AffineExpr {
        Self::linear(self.terms.iter().map(|&(d, c)| (f(d), c)), self.constant)
    }
}

impl Add for AffineExpr {
    type Output = AffineExpr;

    fn add(mut self, rhs: AffineExpr) -> AffineExpr {
        for (dim, coeff) in rhs.terms {
            self.add_term(dim, coeff);
        }
        self.constant += rhs.constant;
        self
    }
}

impl Mul<i64> for AffineExpr {
    type Output = AffineExpr;

    fn mul(self, rhs: i64) -> AffineExpr {
        if rhs == 0 {
            return Self::constant(0);
        }
        Self { terms: self.terms.into_iter().map(|(d, c)| (d, c * rhs)).collect(), constant: self.constant * rhs }
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .terms
            .iter()
            .map(|&(d, c)| if c == 1 { format!("d{d}") } else { format!("d{d} * {c}") })
            .collect();
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        write!(f, "{}", parts.join(" + "))
    }
}

/// Bijection on `0..n`. `perm[i]` is the old position placed at new position `i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permutation(SmallVec<[usize; 6]>);

impl Permutation {
    pub fn new(perm: impl IntoIterator<Item = usize>) -> Result<Self> {
        let perm: SmallVec<[usize; 6]> = perm.into_iter().collect();
        let n = perm.len();
        let mut seen: SmallVec<[bool; 6]> = smallvec![false; n];
        for &p in &perm {
            if p >= n || std::mem::replace(&mut seen[p], true) {
                return InvalidPermutationSnafu { permutation: perm.to_vec(), expected: n }.fail();
            }
        }
        Ok(Self(perm))
    }

    pub fn identity(n: usize) -> Self {
        Self((0..n).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &p)| i == p)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// `inverse[old] = new`.
    pub fn inverse(&self) -> Self {
        let mut inv: SmallVec<[usize; 6]> = smallvec![0; self.0.len()];
        for (new, &old) in self.0.iter().enumerate() {
            inv[old] = new;
        }
        Self(inv)
    }

    /// Reorder `items` so that `result[i] = items[perm[i]]`.
    pub fn apply<T: Clone>(&self, items: &[T]) -> SmallVec<[T; 6]> {
        self.0.iter().map(|&p| items[p].clone()).collect()
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// Map from an `n`-dimensional iteration space to an operand's coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffineMap {
    num_dims: usize,
    results: SmallVec<[AffineExpr; 4]>,
}

impl AffineMap {
    /// Build a map, rejecting results that reference dims outside `0..num_dims`.
    pub fn new(num_dims: usize, results: impl IntoIterator<Item = AffineExpr>) -> Result<Self> {
        let results: SmallVec<[AffineExpr; 4]> = results.into_iter().collect();
        if let Some(max) = results.iter().filter_map(AffineExpr::max_dim).max()
            && max >= num_dims
        {
            return MapArityMismatchSnafu { map: None, expected: num_dims, actual: max + 1 }.fail();
        }
        Ok(Self { num_dims, results })
    }

    /// Build a map whose results are known to stay inside the domain.
    pub(crate) fn from_parts(num_dims: usize, results: impl IntoIterator<Item = AffineExpr>) -> Self {
        let map = Self { num_dims, results: results.into_iter().collect() };
        debug_assert!(map.results.iter().filter_map(AffineExpr::max_dim).all(|d| d < num_dims));
        map
    }

    /// Map whose results read the listed dims verbatim: `(d0..dn) -> (d[dims[0]], ..)`.
    pub fn projection(num_dims: usize, dims: &[usize]) -> Result<Self> {
        Self::new(num_dims, dims.iter().map(|&d| AffineExpr::dim(d)))
    }

    pub fn identity(num_dims: usize) -> Self {
        Self { num_dims, results: (0..num_dims).map(AffineExpr::dim).collect() }
    }

    /// `(d0..dn) -> (d[perm[0]], d[perm[1]], ..)`.
    pub fn permutation(perm: &Permutation) -> Self {
        Self { num_dims: perm.len(), results: perm.as_slice().iter().map(|&d| AffineExpr::dim(d)).collect() }
    }

    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn results(&self) -> &[AffineExpr] {
        &self.results
    }

    pub fn result(&self, idx: usize) -> Option<&AffineExpr> {
        self.results.get(idx)
    }

    /// The dim read verbatim by result `idx`.
    pub fn result_dim(&self, idx: usize) -> Option<usize> {
        self.results.get(idx).and_then(AffineExpr::as_dim)
    }

    pub fn is_identity(&self) -> bool {
        self.results.len() == self.num_dims && self.results.iter().enumerate().all(|(i, r)| r.as_dim() == Some(i))
    }

    /// Every result is a distinct plain dim.
    pub fn is_projected_permutation(&self) -> bool {
        let dims: Option<Vec<usize>> = self.results.iter().map(AffineExpr::as_dim).collect();
        dims.is_some_and(|dims| dims.iter().all_unique())
    }

    /// Sorted, de-duplicated dims referenced by any result.
    pub fn used_dims(&self) -> SmallVec<[usize; 6]> {
        self.results.iter().flat_map(AffineExpr::dims).sorted().dedup().collect()
    }

    /// Same domain rank.
    pub fn is_compatible(&self, other: &AffineMap) -> bool {
        self.num_dims == other.num_dims
    }

    /// Evaluate at one assignment of loop induction values.
    pub fn evaluate(&self, point: &[i64]) -> Result<SmallVec<[i64; 4]>> {
        if point.len() != self.num_dims {
            return MapArityMismatchSnafu { map: None, expected: self.num_dims, actual: point.len() }.fail();
        }
        let values: Option<SmallVec<[i64; 4]>> = self.results.iter().map(|r| r.evaluate(point)).collect();
        values.context(MapArityMismatchSnafu { map: None, expected: self.num_dims, actual: point.len() })
    }

    /// `self ∘ inner`: feeds the results of `inner` into `self`.
    pub fn compose(&self, inner: &AffineMap) -> Result<AffineMap> {
        if inner.num_results() != self.num_dims {
            return MapArityMismatchSnafu { map: None, expected: self.num_dims, actual: inner.num_results() }.fail();
        }
        Ok(AffineMap { num_dims: inner.num_dims, results: self.results.iter().map(|r| r.substitute(&inner.results)).collect() })
    }

    /// Rename the domain so that new dim `i` is old dim `perm[i]`.
    pub fn permute_dims(&self, perm: &Permutation) -> AffineMap {
        debug_assert_eq!(perm.len(), self.num_dims);
        let inverse = perm.inverse();
        AffineMap {
            num_dims: self.num_dims,
            results: self.results.iter().map(|r| r.rename_dims(|old| inverse.as_slice()[old])).collect(),
        }
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> ({})", (0..self.num_dims).map(|d| format!("d{d}")).join(", "), self.results.iter().join(", "))
    }
}

/// Number of distinct loop dims referenced across `maps`.
pub fn num_distinct_dims(maps: &[AffineMap]) -> usize {
    maps.iter().flat_map(|m| m.used_dims()).sorted().dedup().count()
}

/// Check a set of operand maps against an iteration-space rank and the operands' ranks.
pub fn check_operand_maps(num_loops: usize, maps: &[AffineMap], operand_ranks: &[usize]) -> Result<()> {
    for (idx, (map, &rank)) in maps.iter().zip(operand_ranks).enumerate() {
        if map.num_dims() != num_loops {
            return MapArityMismatchSnafu { map: Some(idx), expected: num_loops, actual: map.num_dims() }.fail();
        }
        if map.num_results() != rank {
            return CoordinateRankMismatchSnafu { operand: idx, map_results: map.num_results(), operand_rank: rank }
                .fail();
        }
    }
    Ok(())
}
