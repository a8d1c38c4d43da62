use super::*;
use enumset::EnumSet;

impl ScalarDType {
    const fn promotion_lattice(self) -> &'static [Self] {
        use ScalarDType::*;
        match self {
            Bool => &[Int8, UInt8],
            Int8 => &[Int16],
            Int16 => &[Int32],
            Int32 => &[Int64],
            Int64 => &[Float16, BFloat16],
            UInt8 => &[Int16, UInt16],
            UInt16 => &[Int32, UInt32],
            UInt32 => &[Int64, UInt64],
            UInt64 => &[Float16, BFloat16],
            Float16 => &[Float32],
            BFloat16 => &[Float32],
            Float32 => &[Float64],
            Float64 | Index => &[],
        }
    }

    fn get_recursive_parents(self) -> EnumSet<Self> {
        self.promotion_lattice()
            .iter()
            .fold(EnumSet::only(self), |dtypes, &parent| dtypes.union(parent.get_recursive_parents()))
    }

    /// Check if converting `self` to `to` preserves every value.
    ///
    /// Structured ops accumulate inputs into their output element type, so this is
    /// the rule for mixed-precision operands (e.g. `i8 * i8 -> i32`).
    pub fn can_safe_cast(self, to: Self) -> bool {
        if self == to || matches!(self, Self::Bool) {
            return true;
        }

        if matches!(to, Self::Index) {
            return self.is_int();
        }

        let from_bytes = self.bytes();
        let to_bytes = to.bytes();
        match (self.is_unsigned(), self.is_signed(), self.is_float(), to.is_unsigned(), to.is_signed(), to.is_float()) {
            // Unsigned -> Unsigned: only if target is larger
            (true, _, _, true, _, _) => from_bytes < to_bytes,
            // Signed -> Signed: only if target is same size or larger
            (_, true, _, _, true, _) => from_bytes <= to_bytes,
            // Unsigned -> Signed: only if target is strictly larger
            (true, _, _, _, true, _) => from_bytes < to_bytes,
            // Integer -> Float: safe if integer is Int32 or smaller
            (_, _, false, _, _, true) => from_bytes <= Self::Int32.bytes(),
            // Float -> Float: only if target is larger
            (_, _, true, _, _, true) => from_bytes < to_bytes,
            _ => false,
        }
    }
}

impl DType {
    /// Check if casting from `from` to `to` is safe (preserves value).
    pub fn can_safe_cast(from: &Self, to: &Self) -> bool {
        if !from.base().can_safe_cast(to.base()) {
            return false;
        }

        // Vector counts must match (or broadcast from scalar)
        from.count() == to.count() || from.count() == 1
    }

    /// Find the least upper bound type for a set of dtypes.
    ///
    /// Returns the most specific scalar type all inputs safely promote to, or `None`
    /// when the lattice has no common parent (e.g. `Float64` with `Index`).
    pub fn least_upper_dtype(dtypes: &[Self]) -> Option<Self> {
        let scalar_result = dtypes
            .iter()
            .map(|d| d.base().get_recursive_parents())
            .reduce(|lhs, rhs| lhs.intersection(rhs))?
            .iter()
            .min()?;

        Some(DType::Scalar(scalar_result))
    }
}
