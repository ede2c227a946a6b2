//! IL values: typed constants and operands

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id of an SSA temporary within its function
///
/// Block parameters and instruction results share one flat numbering per
/// function; the id indexes the function's temp table and the VM frame's
/// register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(pub u32);

/// Id of a basic block within its function (index into `Function::blocks`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Id of a function within its module (index into `Module::functions`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

/// Id of an extern declaration within its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternId(pub u32);

/// Id of a global within its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// Id of an interned string literal (index into `Module::strings`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrId(pub u32);

impl TempId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A typed constant
///
/// Integers are stored sign-extended into `i64`; unsigned values keep their
/// bit pattern (`u64` reinterpreted). Floats are stored as `f64` uniformly,
/// including `f32` constants — the documented internal widening.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Int { ty: Type, bits: i64 },
    Float { ty: Type, value: f64 },
    Str(StrId),
    Null,
}

impl Const {
    pub fn int(ty: Type, bits: i64) -> Self {
        Const::Int { ty, bits }
    }

    pub fn i32(v: i32) -> Self {
        Const::Int { ty: Type::I32, bits: v as i64 }
    }

    pub fn i64(v: i64) -> Self {
        Const::Int { ty: Type::I64, bits: v }
    }

    pub fn bool(v: bool) -> Self {
        Const::Int { ty: Type::I1, bits: v as i64 }
    }

    pub fn f64(v: f64) -> Self {
        Const::Float { ty: Type::F64, value: v }
    }

    pub fn ty(&self) -> Type {
        match self {
            Const::Int { ty, .. } => *ty,
            Const::Float { ty, .. } => *ty,
            Const::Str(_) => Type::Str,
            Const::Null => Type::Ptr,
        }
    }
}

/// An instruction operand
///
/// Cross-references are by id, never by name; names exist only in the temp
/// table and the module symbol tables for printing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Const(Const),
    Temp(TempId),
    Func(FuncId),
    Extern(ExternId),
    Global(GlobalId),
}

impl Operand {
    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Operand::Temp(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Operand::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Const(_))
    }
}

impl From<Const> for Operand {
    fn from(c: Const) -> Self {
        Operand::Const(c)
    }
}

impl From<TempId> for Operand {
    fn from(id: TempId) -> Self {
        Operand::Temp(id)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_types() {
        assert_eq!(Const::i32(42).ty(), Type::I32);
        assert_eq!(Const::bool(true).ty(), Type::I1);
        assert_eq!(Const::f64(3.14).ty(), Type::F64);
        assert_eq!(Const::Str(StrId(0)).ty(), Type::Str);
        assert_eq!(Const::Null.ty(), Type::Ptr);
    }

    #[test]
    fn test_operand_accessors() {
        let op = Operand::Temp(TempId(3));
        assert_eq!(op.as_temp(), Some(TempId(3)));
        assert!(!op.is_constant());

        let op: Operand = Const::i64(-1).into();
        assert!(op.is_constant());
        assert_eq!(op.as_const().unwrap().ty(), Type::I64);
    }

    #[test]
    fn test_unsigned_bit_pattern() {
        // u64::MAX survives the i64 bit store
        let c = Const::int(Type::U64, u64::MAX as i64);
        match c {
            Const::Int { bits, .. } => assert_eq!(bits as u64, u64::MAX),
            _ => panic!("expected int"),
        }
    }
}
