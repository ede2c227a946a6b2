//! IL type system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Types in the IL
///
/// The set is closed: no aggregates, no element types behind `Ptr`. Runtime
/// objects are reached through opaque `Ptr`/`Str` handles and manipulated via
/// runtime calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Ptr,
    Str,
    Error,
    ResumeTok,
}

impl Type {
    /// Parse a type name as it appears in textual IL
    pub fn from_name(name: &str) -> Option<Type> {
        Some(match name {
            "void" => Type::Void,
            "i1" => Type::I1,
            "i8" => Type::I8,
            "i16" => Type::I16,
            "i32" => Type::I32,
            "i64" => Type::I64,
            "u8" => Type::U8,
            "u16" => Type::U16,
            "u32" => Type::U32,
            "u64" => Type::U64,
            "f32" => Type::F32,
            "f64" => Type::F64,
            "ptr" => Type::Ptr,
            "str" => Type::Str,
            "error" => Type::Error,
            "resume_tok" => Type::ResumeTok,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::U8 => "u8",
            Type::U16 => "u16",
            Type::U32 => "u32",
            Type::U64 => "u64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
            Type::Str => "str",
            Type::Error => "error",
            Type::ResumeTok => "resume_tok",
        }
    }

    /// Bit width of integer and float types; `None` for the opaque types
    pub fn bit_width(&self) -> Option<u32> {
        Some(match self {
            Type::I1 => 1,
            Type::I8 | Type::U8 => 8,
            Type::I16 | Type::U16 => 16,
            Type::I32 | Type::U32 => 32,
            Type::I64 | Type::U64 => 64,
            Type::F32 => 32,
            Type::F64 => 64,
            _ => return None,
        })
    }

    /// Storage size in bytes. Fixed, not target-dependent; pointer-width
    /// types are 8 bytes everywhere the toolchain runs.
    pub fn size_bytes(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::I1 | Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 => 2,
            Type::I32 | Type::U32 | Type::F32 => 4,
            Type::I64 | Type::U64 | Type::F64 => 8,
            Type::Ptr | Type::Str => 8,
            Type::Error => 24,
            Type::ResumeTok => 8,
        }
    }

    pub fn align_bytes(&self) -> usize {
        match self {
            Type::Error => 8,
            other => other.size_bytes().max(1),
        }
    }

    pub fn is_signed_int(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_unsigned_int(&self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::U32 | Type::U64)
    }

    /// Any integer type, including `i1`
    pub fn is_int(&self) -> bool {
        matches!(self, Type::I1) || self.is_signed_int() || self.is_unsigned_int()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_scalar(&self) -> bool {
        self.is_int() || self.is_float()
    }

    /// Whether a value of `other` may flow where `self` is expected.
    ///
    /// IL typing is exact: there are no implicit conversions between distinct
    /// types; widening goes through explicit cast opcodes.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        self == other
    }

    /// Rank in the numeric promotion lattice `i16 < i32 < i64 < f32 < f64`.
    ///
    /// Frontends use this when lowering mixed-type arithmetic; the IL itself
    /// never promotes implicitly.
    pub fn promotion_rank(&self) -> Option<u8> {
        Some(match self {
            Type::I16 => 0,
            Type::I32 => 1,
            Type::I64 => 2,
            Type::F32 => 3,
            Type::F64 => 4,
            _ => return None,
        })
    }

    /// Common promoted type of two numeric types, per the lattice
    pub fn promote(a: Type, b: Type) -> Option<Type> {
        let (ra, rb) = (a.promotion_rank()?, b.promotion_rank()?);
        Some(if ra >= rb { a } else { b })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for ty in [
            Type::Void,
            Type::I1,
            Type::I8,
            Type::I16,
            Type::I32,
            Type::I64,
            Type::U8,
            Type::U16,
            Type::U32,
            Type::U64,
            Type::F32,
            Type::F64,
            Type::Ptr,
            Type::Str,
            Type::Error,
            Type::ResumeTok,
        ] {
            assert_eq!(Type::from_name(ty.name()), Some(ty));
        }
        assert_eq!(Type::from_name("i128"), None);
    }

    #[test]
    fn test_size_oracle() {
        assert_eq!(Type::I1.size_bytes(), 1);
        assert_eq!(Type::U16.size_bytes(), 2);
        assert_eq!(Type::F64.size_bytes(), 8);
        assert_eq!(Type::Error.size_bytes(), 24);
        assert_eq!(Type::Error.align_bytes(), 8);
        assert_eq!(Type::Void.size_bytes(), 0);
    }

    #[test]
    fn test_predicates() {
        assert!(Type::I32.is_signed_int());
        assert!(!Type::U32.is_signed_int());
        assert!(Type::U32.is_unsigned_int());
        assert!(Type::I1.is_int());
        assert!(Type::F32.is_float());
        assert!(!Type::Ptr.is_scalar());
    }

    #[test]
    fn test_promotion_lattice() {
        assert_eq!(Type::promote(Type::I16, Type::I64), Some(Type::I64));
        assert_eq!(Type::promote(Type::I64, Type::F32), Some(Type::F32));
        assert_eq!(Type::promote(Type::F32, Type::F64), Some(Type::F64));
        assert_eq!(Type::promote(Type::I32, Type::Ptr), None);
    }
}
