use std::fmt;

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structural invariant named by a [`Error::Verification`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Invariant {
    /// `args_in + args_out` disagrees with the operand list.
    OperandCount,
    /// Number of indexing maps disagrees with the operand count.
    MapCount,
    /// An indexing map's domain rank differs from the iteration-space rank.
    MapDomain,
    /// An operand's rank differs from its map's result count.
    OperandRank,
    /// Iterator-kind list length differs from the iteration-space rank.
    IteratorCount,
    /// Region parameters disagree with index/operand element types.
    RegionSignature,
    /// Region results disagree with the outputs.
    RegionResults,
    /// Conv stride/dilation lists are malformed.
    WindowAttributes,
    /// A copy permutation does not match the operand rank.
    CopyPermutation,
    /// Permuted copy shapes disagree.
    CopyShape,
    /// An input element type cannot be accumulated into the output element type.
    ElementType,
    /// Fill value not representable in the output element type.
    FillValue,
    /// A library call names an unknown symbol.
    LibraryCall,
}

/// Where a verification failure was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    Op,
    Operand(usize),
    Dim(usize),
    OperandDim { operand: usize, dim: usize },
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op => write!(f, "op"),
            Self::Operand(operand) => write!(f, "operand #{operand}"),
            Self::Dim(dim) => write!(f, "dim #{dim}"),
            Self::OperandDim { operand, dim } => write!(f, "operand #{operand}, dim #{dim}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Structural invariant violated; never repaired.
    #[snafu(display("'{op}' failed verification: {invariant} at {site}"))]
    Verification { op: &'static str, invariant: Invariant, site: Site },

    /// Map domain rank disagrees with the declared iteration-space rank.
    #[snafu(display("indexing map {map:?} has domain rank {actual}, expected {expected}"))]
    MapArityMismatch { map: Option<usize>, expected: usize, actual: usize },

    /// Operand rank disagrees with its map's codomain rank.
    #[snafu(display("operand #{operand} has rank {operand_rank} but its indexing map produces {map_results} coordinates"))]
    CoordinateRankMismatch { operand: usize, map_results: usize, operand_rank: usize },

    /// Two operands disagree on the extent of a shared loop dimension.
    #[snafu(display(
        "loop dim #{dim}: operand #{operand} has extent {extent} but operand #{other_operand} has extent {other_extent}"
    ))]
    ExtentMismatch { dim: usize, operand: usize, extent: usize, other_operand: usize, other_extent: usize },

    /// A computed coordinate (e.g. a conv window read) leaves its operand's static extent.
    #[snafu(display("operand #{operand} coordinate #{coordinate} spans [{min}, {max}] outside extent {extent}"))]
    CoordinateOutOfBounds { operand: usize, coordinate: usize, min: i64, max: i64, extent: usize },

    /// No operand pins a loop dimension to a plain coordinate.
    #[snafu(display("loop dim #{dim} has no operand coordinate to derive its extent from"))]
    MissingExtent { dim: usize },

    /// Not a bijection on `0..expected`.
    #[snafu(display("invalid permutation {permutation:?}: expected permutation of 0..{expected}"))]
    InvalidPermutation { permutation: Vec<usize>, expected: usize },

    /// Loop structure failed its own consistency checks.
    #[snafu(display("malformed loop nest: {reason}"))]
    MalformedNest { reason: String },
}

impl Error {
    /// True for [`Error::Verification`], which always indicates a malformed operation.
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }
}
