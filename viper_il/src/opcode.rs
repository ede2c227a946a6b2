//! Declarative opcode schema
//!
//! The `opcodes!` table below is the single source of truth for every opcode:
//! mnemonic, numeric id, operand typing rules, result rule, flags and the trap
//! kinds the op may raise. The verifier, the textual parser/serializer and the
//! VM dispatch all consume this table; adding an opcode means adding one row
//! here, and every consumer that matches on `Opcode` exhaustively fails to
//! compile until it handles the new row.

use crate::trap::TrapKind;
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typing rule for one operand position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRule {
    /// Exactly this type
    Exact(Type),
    /// Same type as operand 0
    SameAsFirst,
    /// Same type as operand 1
    SameAsSecond,
    /// Any integer type (including `i1`)
    AnyInt,
    /// Any of `i8`/`i16`/`i32`/`i64`
    AnySignedInt,
    /// Any of `u8`/`u16`/`u32`/`u64`
    AnyUnsignedInt,
    /// `f32` or `f64`
    AnyFloat,
    /// Any scalar (integer or float)
    AnyScalar,
    /// Any value type (scalar, `ptr`, `str`, `error`, `resume_tok`)
    AnyValue,
}

/// Rule deriving an instruction's result type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultRule {
    /// The op produces no result
    None,
    Exact(Type),
    /// Same type as operand 0
    SameAsFirst,
    /// Same type as operand 1
    SameAsSecond,
    /// Always `i1`
    Bool,
    /// Taken from the instruction's explicit type attribute (casts, `load`,
    /// `call.indirect`)
    FromTypeAttr,
}

/// Opcode flag bits
pub mod flags {
    /// No side effects, no memory dependence; freely movable
    pub const PURE: u8 = 1 << 0;
    /// Observable side effect (memory write, allocation, handler stack)
    pub const SIDE_EFFECT: u8 = 1 << 1;
    /// May raise a trap
    pub const MAY_TRAP: u8 = 1 << 2;
    /// Must appear last in a block
    pub const TERMINATOR: u8 = 1 << 3;
    /// Only valid inside a handler region
    pub const EH_ONLY: u8 = 1 << 4;
    /// Checked variant with trap-on-failure semantics
    pub const CHECKED: u8 = 1 << 5;
    /// Operand count is not fixed by the schema row (`call`, `ret`, `switch`)
    pub const VARIADIC: u8 = 1 << 6;
}

/// One schema row
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub mnemonic: &'static str,
    /// Typing rules for the fixed operand prefix
    pub operands: &'static [OperandRule],
    pub result: ResultRule,
    pub flags: u8,
    /// Trap kinds this op may raise; empty for dynamically determined kinds
    /// (`call`, `trap.from_err`)
    pub traps: &'static [TrapKind],
}

impl OpInfo {
    pub fn is_pure(&self) -> bool {
        self.flags & flags::PURE != 0
    }

    pub fn has_side_effect(&self) -> bool {
        self.flags & flags::SIDE_EFFECT != 0
    }

    pub fn may_trap(&self) -> bool {
        self.flags & flags::MAY_TRAP != 0
    }

    pub fn is_terminator(&self) -> bool {
        self.flags & flags::TERMINATOR != 0
    }

    pub fn is_eh_only(&self) -> bool {
        self.flags & flags::EH_ONLY != 0
    }

    pub fn is_checked(&self) -> bool {
        self.flags & flags::CHECKED != 0
    }

    pub fn is_variadic(&self) -> bool {
        self.flags & flags::VARIADIC != 0
    }

    pub fn has_result(&self) -> bool {
        self.result != ResultRule::None
    }
}

macro_rules! opcodes {
    (
        $(
            $variant:ident = $id:literal, $mnemonic:literal,
                ops: [$($rule:expr),*],
                res: $result:expr,
                flags: $flags:expr,
                traps: [$($trap:ident),*];
        )*
    ) => {
        /// Every opcode in the IL, in stable id order
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant = $id,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];
            pub const COUNT: usize = Opcode::ALL.len();

            /// Schema row for this opcode
            pub fn info(self) -> &'static OpInfo {
                static INFOS: &[OpInfo] = &[
                    $(
                        OpInfo {
                            mnemonic: $mnemonic,
                            operands: &[$($rule),*],
                            result: $result,
                            flags: $flags,
                            traps: &[$(TrapKind::$trap),*],
                        },
                    )*
                ];
                &INFOS[self as usize]
            }

            pub fn mnemonic(self) -> &'static str {
                self.info().mnemonic
            }

            pub fn from_mnemonic(s: &str) -> Option<Opcode> {
                match s {
                    $($mnemonic => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

use self::flags::*;
use self::OperandRule::*;
use self::ResultRule as Res;

opcodes! {
    // Integer arithmetic. Unchecked ops wrap per two's complement; unchecked
    // division by zero still traps (there is no wrap value to produce).
    Iadd = 0, "iadd", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Isub = 1, "isub", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Imul = 2, "imul", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Sdiv = 3, "sdiv", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP, traps: [DivideByZero];
    Udiv = 4, "udiv", ops: [AnyUnsignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP, traps: [DivideByZero];
    Srem = 5, "srem", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP, traps: [DivideByZero];
    Urem = 6, "urem", ops: [AnyUnsignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP, traps: [DivideByZero];
    Ineg = 7, "ineg", ops: [AnySignedInt], res: Res::SameAsFirst, flags: PURE, traps: [];

    IaddOvf = 8, "iadd.ovf", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [Overflow];
    IsubOvf = 9, "isub.ovf", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [Overflow];
    ImulOvf = 10, "imul.ovf", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [Overflow];
    SdivChk0 = 11, "sdiv.chk0", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [DivideByZero, Overflow];
    SremChk0 = 12, "srem.chk0", ops: [AnySignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [DivideByZero];
    UdivChk0 = 13, "udiv.chk0", ops: [AnyUnsignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [DivideByZero];
    UremChk0 = 14, "urem.chk0", ops: [AnyUnsignedInt, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP | CHECKED, traps: [DivideByZero];

    // Float arithmetic, IEEE-754 with NaN/Inf propagation
    Fadd = 15, "fadd", ops: [AnyFloat, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Fsub = 16, "fsub", ops: [AnyFloat, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Fmul = 17, "fmul", ops: [AnyFloat, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Fdiv = 18, "fdiv", ops: [AnyFloat, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Fneg = 19, "fneg", ops: [AnyFloat], res: Res::SameAsFirst, flags: PURE, traps: [];
    Pow = 20, "pow", ops: [AnyFloat, SameAsFirst], res: Res::SameAsFirst, flags: MAY_TRAP, traps: [DomainError, Overflow];

    // Bitwise and shifts; shift counts are masked modulo the bit width
    And = 21, "and", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Or = 22, "or", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Xor = 23, "xor", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Not = 24, "not", ops: [AnyInt], res: Res::SameAsFirst, flags: PURE, traps: [];
    Shl = 25, "shl", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Lshr = 26, "lshr", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];
    Ashr = 27, "ashr", ops: [AnyInt, SameAsFirst], res: Res::SameAsFirst, flags: PURE, traps: [];

    // Comparisons, all producing i1
    IcmpEq = 28, "icmp.eq", ops: [AnyInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    IcmpNe = 29, "icmp.ne", ops: [AnyInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    ScmpLt = 30, "scmp.lt", ops: [AnySignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    ScmpLe = 31, "scmp.le", ops: [AnySignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    ScmpGt = 32, "scmp.gt", ops: [AnySignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    ScmpGe = 33, "scmp.ge", ops: [AnySignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    UcmpLt = 34, "ucmp.lt", ops: [AnyUnsignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    UcmpLe = 35, "ucmp.le", ops: [AnyUnsignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    UcmpGt = 36, "ucmp.gt", ops: [AnyUnsignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    UcmpGe = 37, "ucmp.ge", ops: [AnyUnsignedInt, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOeq = 38, "fcmp.oeq", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOne = 39, "fcmp.one", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOlt = 40, "fcmp.olt", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOle = 41, "fcmp.ole", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOgt = 42, "fcmp.ogt", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpOge = 43, "fcmp.oge", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpUeq = 44, "fcmp.ueq", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];
    FcmpUne = 45, "fcmp.une", ops: [AnyFloat, SameAsFirst], res: Res::Bool, flags: PURE, traps: [];

    // Casts; the target type is the instruction's type attribute
    Trunc = 46, "trunc", ops: [AnyInt], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Sext = 47, "sext", ops: [AnySignedInt], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Zext = 48, "zext", ops: [AnyInt], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Fptosi = 49, "fptosi", ops: [AnyFloat], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Sitofp = 50, "sitofp", ops: [AnySignedInt], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Fptrunc = 51, "fptrunc", ops: [Exact(Type::F64)], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Fpext = 52, "fpext", ops: [Exact(Type::F32)], res: Res::FromTypeAttr, flags: PURE, traps: [];
    Bitcast = 53, "bitcast", ops: [AnyScalar], res: Res::FromTypeAttr, flags: PURE, traps: [];
    CastFpToSiRteChk = 54, "cast.fp_to_si.rte.chk", ops: [AnyFloat], res: Res::FromTypeAttr, flags: MAY_TRAP | CHECKED, traps: [InvalidCast, Overflow];
    CastFpToUiRteChk = 55, "cast.fp_to_ui.rte.chk", ops: [AnyFloat], res: Res::FromTypeAttr, flags: MAY_TRAP | CHECKED, traps: [InvalidCast, Overflow];
    CastSiNarrowChk = 56, "cast.si_narrow.chk", ops: [AnySignedInt], res: Res::FromTypeAttr, flags: MAY_TRAP | CHECKED, traps: [Overflow];
    CastUiNarrowChk = 57, "cast.ui_narrow.chk", ops: [AnyUnsignedInt], res: Res::FromTypeAttr, flags: MAY_TRAP | CHECKED, traps: [Overflow];

    // Memory
    Alloca = 58, "alloca", ops: [AnyInt, AnyInt], res: Res::Exact(Type::Ptr), flags: SIDE_EFFECT, traps: [];
    Load = 59, "load", ops: [Exact(Type::Ptr)], res: Res::FromTypeAttr, flags: 0, traps: [];
    Store = 60, "store", ops: [AnyScalar, Exact(Type::Ptr)], res: Res::None, flags: SIDE_EFFECT, traps: [];
    Gep = 61, "gep", ops: [Exact(Type::Ptr), AnyInt], res: Res::Exact(Type::Ptr), flags: PURE, traps: [];
    IdxChk = 62, "idx.chk", ops: [Exact(Type::Ptr), AnyInt, SameAsSecond, SameAsSecond], res: Res::Exact(Type::Ptr), flags: MAY_TRAP | CHECKED, traps: [Bounds];

    // Control
    Br = 63, "br", ops: [], res: Res::None, flags: TERMINATOR, traps: [];
    Cbr = 64, "cbr", ops: [Exact(Type::I1)], res: Res::None, flags: TERMINATOR, traps: [];
    Switch = 65, "switch", ops: [AnyInt], res: Res::None, flags: TERMINATOR | VARIADIC, traps: [];
    Ret = 66, "ret", ops: [], res: Res::None, flags: TERMINATOR | VARIADIC, traps: [];
    Call = 67, "call", ops: [], res: Res::None, flags: SIDE_EFFECT | MAY_TRAP | VARIADIC, traps: [];
    CallIndirect = 68, "call.indirect", ops: [Exact(Type::Ptr)], res: Res::FromTypeAttr, flags: SIDE_EFFECT | MAY_TRAP | VARIADIC, traps: [];
    Select = 69, "select", ops: [Exact(Type::I1), AnyValue, SameAsSecond], res: Res::SameAsSecond, flags: PURE, traps: [];

    // Exception handling
    Trap = 70, "trap", ops: [], res: Res::None, flags: TERMINATOR | MAY_TRAP, traps: [RuntimeError];
    TrapFromErr = 71, "trap.from_err", ops: [Exact(Type::I32), Exact(Type::I32)], res: Res::None, flags: TERMINATOR | MAY_TRAP, traps: [];
    TrapKindOp = 72, "trap.kind", ops: [], res: Res::Exact(Type::I32), flags: EH_ONLY, traps: [];
    TrapErr = 73, "trap.err", ops: [], res: Res::Exact(Type::Error), flags: EH_ONLY, traps: [];
    EhPush = 74, "eh.push", ops: [], res: Res::None, flags: SIDE_EFFECT, traps: [];
    EhPop = 75, "eh.pop", ops: [], res: Res::None, flags: SIDE_EFFECT, traps: [];
    ResumeSame = 76, "resume.same", ops: [Exact(Type::ResumeTok)], res: Res::None, flags: TERMINATOR | EH_ONLY, traps: [];
    ResumeNext = 77, "resume.next", ops: [Exact(Type::ResumeTok)], res: Res::None, flags: TERMINATOR | EH_ONLY, traps: [];
    ResumeLabel = 78, "resume.label", ops: [Exact(Type::ResumeTok)], res: Res::None, flags: TERMINATOR | EH_ONLY, traps: [];
}

impl Opcode {
    /// Whether the cast from `from` to `to` is well-formed for this opcode.
    ///
    /// The schema rows constrain the source operand; the width relations
    /// between source and target live here, next to the table.
    pub fn cast_target_ok(self, from: Type, to: Type) -> bool {
        let (fw, tw) = match (from.bit_width(), to.bit_width()) {
            (Some(f), Some(t)) => (f, t),
            _ => return false,
        };
        match self {
            Opcode::Trunc => to.is_int() && from.is_signed_int() == to.is_signed_int() && tw < fw,
            Opcode::Sext => to.is_signed_int() && tw > fw,
            Opcode::Zext => (to.is_unsigned_int() || to.is_signed_int()) && tw > fw,
            Opcode::Fptosi => to.is_signed_int(),
            Opcode::Sitofp => to.is_float(),
            Opcode::Fptrunc => to == Type::F32,
            Opcode::Fpext => to == Type::F64,
            Opcode::Bitcast => from.is_scalar() && to.is_scalar() && fw == tw && from != to,
            Opcode::CastFpToSiRteChk => to.is_signed_int(),
            Opcode::CastFpToUiRteChk => to.is_unsigned_int(),
            Opcode::CastSiNarrowChk => to.is_signed_int() && tw < fw,
            Opcode::CastUiNarrowChk => to.is_unsigned_int() && tw < fw,
            _ => false,
        }
    }

    /// Whether this opcode carries an explicit type attribute in textual form
    pub fn has_type_attr(self) -> bool {
        matches!(self.info().result, ResultRule::FromTypeAttr)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_contiguous() {
        for (index, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, index, "id gap at {}", op.mnemonic());
        }
    }

    #[test]
    fn test_mnemonic_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(Opcode::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn test_terminators() {
        for op in [Opcode::Br, Opcode::Cbr, Opcode::Switch, Opcode::Ret, Opcode::Trap, Opcode::ResumeSame] {
            assert!(op.info().is_terminator(), "{} must terminate", op);
        }
        assert!(!Opcode::Call.info().is_terminator());
        assert!(!Opcode::EhPush.info().is_terminator());
    }

    #[test]
    fn test_checked_ops_may_trap() {
        for op in Opcode::ALL {
            if op.info().is_checked() {
                assert!(op.info().may_trap(), "{} is checked but cannot trap", op);
                assert!(!op.info().traps.is_empty(), "{} has no trap kinds", op);
            }
        }
    }

    #[test]
    fn test_pure_and_side_effect_disjoint() {
        for op in Opcode::ALL {
            assert!(
                !(op.info().is_pure() && op.info().has_side_effect()),
                "{} is both pure and effectful",
                op
            );
        }
    }

    #[test]
    fn test_cast_targets() {
        assert!(Opcode::Trunc.cast_target_ok(Type::I64, Type::I8));
        assert!(!Opcode::Trunc.cast_target_ok(Type::I8, Type::I64));
        assert!(Opcode::Sext.cast_target_ok(Type::I8, Type::I64));
        assert!(Opcode::Bitcast.cast_target_ok(Type::F32, Type::U32));
        assert!(!Opcode::Bitcast.cast_target_ok(Type::F64, Type::U32));
        assert!(Opcode::CastSiNarrowChk.cast_target_ok(Type::I64, Type::I16));
        assert!(!Opcode::CastSiNarrowChk.cast_target_ok(Type::I16, Type::I64));
    }
}
