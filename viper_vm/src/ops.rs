//! Pure operation semantics
//!
//! Unchecked integer ops wrap per two's complement at the operand width
//! (including `sdiv i64::MIN, -1`); division by zero always traps because
//! there is no value to wrap to. Checked variants trap per the normative
//! table. Floats follow IEEE-754 with NaN/Inf propagation; `f32` arithmetic
//! rounds through `f32` even though values are stored widened.

use viper_il::{Opcode, TrapKind, Type};

/// Normalize a wide intermediate into the canonical register form for `ty`:
/// masked to the bit width, then sign-extended for signed types.
pub fn normalize(ty: Type, value: i128) -> i64 {
    let width = ty.bit_width().expect("integer type");
    if width == 64 {
        return value as i64;
    }
    let masked = (value as u64) & ((1u64 << width) - 1);
    if ty.is_signed_int() {
        // shift up and back down to sign-extend from `width`
        ((masked as i64) << (64 - width)) >> (64 - width)
    } else {
        masked as i64
    }
}

fn signed_range(ty: Type) -> (i128, i128) {
    let width = ty.bit_width().expect("integer type");
    let max = (1i128 << (width - 1)) - 1;
    (-(1i128 << (width - 1)), max)
}

fn unsigned_max(ty: Type) -> u128 {
    let width = ty.bit_width().expect("integer type");
    (1u128 << width) - 1
}

/// Unsigned view of a normalized register value
fn as_unsigned(ty: Type, bits: i64) -> u64 {
    let width = ty.bit_width().expect("integer type");
    if width == 64 {
        bits as u64
    } else {
        (bits as u64) & ((1u64 << width) - 1)
    }
}

pub fn int_binop(op: Opcode, ty: Type, a: i64, b: i64) -> Result<i64, TrapKind> {
    let width = ty.bit_width().expect("integer type");
    Ok(match op {
        Opcode::Iadd => normalize(ty, a as i128 + b as i128),
        Opcode::Isub => normalize(ty, a as i128 - b as i128),
        Opcode::Imul => normalize(ty, a as i128 * b as i128),
        Opcode::Sdiv => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            // i64::MIN / -1 wraps like every other overflow here
            normalize(ty, a as i128 / b as i128)
        }
        Opcode::Udiv => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            normalize(ty, (as_unsigned(ty, a) / as_unsigned(ty, b)) as i128)
        }
        Opcode::Srem => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            normalize(ty, a as i128 % b as i128)
        }
        Opcode::Urem => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            normalize(ty, (as_unsigned(ty, a) % as_unsigned(ty, b)) as i128)
        }

        Opcode::IaddOvf | Opcode::IsubOvf | Opcode::ImulOvf => {
            let wide = match op {
                Opcode::IaddOvf => a as i128 + b as i128,
                Opcode::IsubOvf => a as i128 - b as i128,
                _ => a as i128 * b as i128,
            };
            let (min, max) = signed_range(ty);
            if wide < min || wide > max {
                return Err(TrapKind::Overflow);
            }
            wide as i64
        }
        Opcode::SdivChk0 => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            let (min, _) = signed_range(ty);
            if a as i128 == min && b == -1 {
                return Err(TrapKind::Overflow);
            }
            normalize(ty, a as i128 / b as i128)
        }
        Opcode::SremChk0 => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            // INT_MIN % -1 is 0, not an overflow
            normalize(ty, a as i128 % b as i128)
        }
        Opcode::UdivChk0 => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            normalize(ty, (as_unsigned(ty, a) / as_unsigned(ty, b)) as i128)
        }
        Opcode::UremChk0 => {
            if b == 0 {
                return Err(TrapKind::DivideByZero);
            }
            normalize(ty, (as_unsigned(ty, a) % as_unsigned(ty, b)) as i128)
        }

        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => normalize(ty, (a ^ b) as i128),

        // Shift counts are masked modulo the bit width
        Opcode::Shl => {
            let count = (b as u64 % width as u64) as u32;
            normalize(ty, ((as_unsigned(ty, a) as u128) << count) as i128)
        }
        Opcode::Lshr => {
            let count = (b as u64 % width as u64) as u32;
            normalize(ty, (as_unsigned(ty, a) >> count) as i128)
        }
        Opcode::Ashr => {
            let count = (b as u64 % width as u64) as u32;
            // sign-extend from the operand width regardless of signedness
            let signed = ((as_unsigned(ty, a) as i64) << (64 - width)) >> (64 - width);
            normalize(ty, (signed >> count) as i128)
        }

        other => unreachable!("not an integer binop: {}", other),
    })
}

pub fn int_unop(op: Opcode, ty: Type, a: i64) -> i64 {
    match op {
        Opcode::Ineg => normalize(ty, -(a as i128)),
        Opcode::Not => normalize(ty, !a as i128),
        other => unreachable!("not an integer unop: {}", other),
    }
}

/// Round an f32-typed operation through f32 so stored-widened values behave
/// exactly like native f32 arithmetic
fn round_to(ty: Type, value: f64) -> f64 {
    if ty == Type::F32 {
        value as f32 as f64
    } else {
        value
    }
}

pub fn float_binop(op: Opcode, ty: Type, a: f64, b: f64) -> Result<f64, TrapKind> {
    let (a, b) = (round_to(ty, a), round_to(ty, b));
    Ok(match op {
        Opcode::Fadd => round_to(ty, a + b),
        Opcode::Fsub => round_to(ty, a - b),
        Opcode::Fmul => round_to(ty, a * b),
        Opcode::Fdiv => round_to(ty, a / b),
        Opcode::Pow => {
            if a < 0.0 && b.fract() != 0.0 {
                return Err(TrapKind::DomainError);
            }
            let result = round_to(ty, a.powf(b));
            if !result.is_finite() && a.is_finite() && b.is_finite() {
                return Err(TrapKind::Overflow);
            }
            result
        }
        other => unreachable!("not a float binop: {}", other),
    })
}

pub fn compare_int(op: Opcode, ty: Type, a: i64, b: i64) -> bool {
    match op {
        Opcode::IcmpEq => a == b,
        Opcode::IcmpNe => a != b,
        Opcode::ScmpLt => a < b,
        Opcode::ScmpLe => a <= b,
        Opcode::ScmpGt => a > b,
        Opcode::ScmpGe => a >= b,
        Opcode::UcmpLt => as_unsigned(ty, a) < as_unsigned(ty, b),
        Opcode::UcmpLe => as_unsigned(ty, a) <= as_unsigned(ty, b),
        Opcode::UcmpGt => as_unsigned(ty, a) > as_unsigned(ty, b),
        Opcode::UcmpGe => as_unsigned(ty, a) >= as_unsigned(ty, b),
        other => unreachable!("not an integer comparison: {}", other),
    }
}

pub fn compare_float(op: Opcode, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match op {
        Opcode::FcmpOeq => !unordered && a == b,
        Opcode::FcmpOne => !unordered && a != b,
        Opcode::FcmpOlt => !unordered && a < b,
        Opcode::FcmpOle => !unordered && a <= b,
        Opcode::FcmpOgt => !unordered && a > b,
        Opcode::FcmpOge => !unordered && a >= b,
        Opcode::FcmpUeq => unordered || a == b,
        Opcode::FcmpUne => unordered || a != b,
        other => unreachable!("not a float comparison: {}", other),
    }
}

/// Result of a cast: either an integer register value or a float one
pub enum CastOut {
    Int(i64),
    Float(f64),
}

pub fn cast(op: Opcode, from_ty: Type, bits: i64, float: f64, to: Type) -> Result<CastOut, TrapKind> {
    Ok(match op {
        Opcode::Trunc => CastOut::Int(normalize(to, bits as i128)),
        // Signed values are stored sign-extended already
        Opcode::Sext => CastOut::Int(bits),
        Opcode::Zext => CastOut::Int(as_unsigned(from_ty, bits) as i64),
        Opcode::Fptosi => {
            // NaN casts to 0, out-of-range saturates
            let value = round_to(from_ty, float);
            let wide = if value.is_nan() { 0 } else { value as i64 };
            CastOut::Int(clamp_signed(to, wide as i128))
        }
        Opcode::Sitofp => CastOut::Float(round_to(to, bits as f64)),
        Opcode::Fptrunc => CastOut::Float(float as f32 as f64),
        Opcode::Fpext => CastOut::Float(float),
        Opcode::Bitcast => match (from_ty.is_float(), to.is_float()) {
            (true, false) => {
                if from_ty == Type::F32 {
                    CastOut::Int((round_to(from_ty, float) as f32).to_bits() as i64)
                } else {
                    CastOut::Int(normalize(to, float.to_bits() as i128))
                }
            }
            (false, true) => {
                if to == Type::F32 {
                    CastOut::Float(f32::from_bits(as_unsigned(from_ty, bits) as u32) as f64)
                } else {
                    CastOut::Float(f64::from_bits(bits as u64))
                }
            }
            // int <-> int of equal width: the register form only changes
            // interpretation
            _ => CastOut::Int(normalize(to, as_unsigned(from_ty, bits) as i128)),
        },
        Opcode::CastFpToSiRteChk => {
            let value = round_to(from_ty, float);
            if value.is_nan() {
                return Err(TrapKind::InvalidCast);
            }
            let rounded = value.round_ties_even();
            let (min, max) = signed_range(to);
            if rounded < min as f64 || rounded > max as f64 {
                return Err(TrapKind::Overflow);
            }
            CastOut::Int(rounded as i64)
        }
        Opcode::CastFpToUiRteChk => {
            let value = round_to(from_ty, float);
            if value.is_nan() {
                return Err(TrapKind::InvalidCast);
            }
            let rounded = value.round_ties_even();
            if rounded < 0.0 || rounded > unsigned_max(to) as f64 {
                return Err(TrapKind::Overflow);
            }
            CastOut::Int(normalize(to, rounded as u64 as i128))
        }
        Opcode::CastSiNarrowChk => {
            let (min, max) = signed_range(to);
            if (bits as i128) < min || (bits as i128) > max {
                return Err(TrapKind::Overflow);
            }
            CastOut::Int(bits)
        }
        Opcode::CastUiNarrowChk => {
            if as_unsigned(from_ty, bits) as u128 > unsigned_max(to) {
                return Err(TrapKind::Overflow);
            }
            CastOut::Int(bits)
        }
        other => unreachable!("not a cast: {}", other),
    })
}

fn clamp_signed(ty: Type, value: i128) -> i64 {
    let (min, max) = signed_range(ty);
    value.clamp(min, max) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_wrapping_add() {
        assert_eq!(int_binop(Opcode::Iadd, Type::I8, 127, 1).unwrap(), -128);
        assert_eq!(int_binop(Opcode::Iadd, Type::U8, 255, 1).unwrap(), 0);
        assert_eq!(int_binop(Opcode::Iadd, Type::I64, i64::MAX, 1).unwrap(), i64::MIN);
    }

    #[test]
    fn test_checked_add_traps() {
        assert_eq!(int_binop(Opcode::IaddOvf, Type::I8, 127, 1), Err(TrapKind::Overflow));
        assert_eq!(int_binop(Opcode::IaddOvf, Type::I8, 100, 27).unwrap(), 127);
        // in-range checked equals unchecked
        assert_eq!(
            int_binop(Opcode::IaddOvf, Type::I32, 40, 2).unwrap(),
            int_binop(Opcode::Iadd, Type::I32, 40, 2).unwrap()
        );
    }

    #[test]
    fn test_divide_semantics() {
        assert_eq!(int_binop(Opcode::Sdiv, Type::I32, 10, 0), Err(TrapKind::DivideByZero));
        assert_eq!(int_binop(Opcode::SdivChk0, Type::I32, 10, 0), Err(TrapKind::DivideByZero));
        // checked INT_MIN / -1 traps Overflow, unchecked wraps
        assert_eq!(
            int_binop(Opcode::SdivChk0, Type::I32, i32::MIN as i64, -1),
            Err(TrapKind::Overflow)
        );
        assert_eq!(int_binop(Opcode::Sdiv, Type::I32, i32::MIN as i64, -1).unwrap(), i32::MIN as i64);
        // INT_MIN % -1 is 0 for the checked form
        assert_eq!(int_binop(Opcode::SremChk0, Type::I32, i32::MIN as i64, -1).unwrap(), 0);
    }

    #[test_case(Opcode::Sdiv, 7, 2, 3; "sdiv_pos")]
    #[test_case(Opcode::Sdiv, -7, 2, -3; "sdiv_neg")]
    #[test_case(Opcode::Srem, -7, 2, -1; "srem_neg")]
    #[test_case(Opcode::Udiv, 7, 2, 3; "udiv_pos")]
    fn test_division_values(op: Opcode, a: i64, b: i64, expected: i64) {
        assert_eq!(int_binop(op, Type::I64, a, b).unwrap(), expected);
    }

    #[test]
    fn test_shift_masking() {
        // count >= width is masked modulo width
        assert_eq!(int_binop(Opcode::Shl, Type::I32, 1, 32).unwrap(), 1);
        assert_eq!(int_binop(Opcode::Shl, Type::I32, 1, 33).unwrap(), 2);
        assert_eq!(int_binop(Opcode::Lshr, Type::U8, 0x80, 7).unwrap(), 1);
        assert_eq!(int_binop(Opcode::Ashr, Type::I8, -128, 7).unwrap(), -1);
    }

    #[test]
    fn test_unsigned_compare() {
        // -1 as u32 is u32::MAX
        assert!(compare_int(Opcode::UcmpGt, Type::U32, u32::MAX as i64, 1));
        assert!(compare_int(Opcode::ScmpLt, Type::I32, -1, 1));
    }

    #[test]
    fn test_float_nan_comparisons() {
        assert!(!compare_float(Opcode::FcmpOeq, f64::NAN, f64::NAN));
        assert!(compare_float(Opcode::FcmpUne, f64::NAN, 1.0));
        assert!(compare_float(Opcode::FcmpUeq, f64::NAN, 1.0));
        assert!(compare_float(Opcode::FcmpOlt, 1.0, 2.0));
    }

    #[test]
    fn test_pow_traps() {
        assert_eq!(float_binop(Opcode::Pow, Type::F64, -8.0, 0.5), Err(TrapKind::DomainError));
        assert_eq!(float_binop(Opcode::Pow, Type::F64, 1e300, 2.0), Err(TrapKind::Overflow));
        assert_eq!(float_binop(Opcode::Pow, Type::F64, 2.0, 10.0).unwrap(), 1024.0);
    }

    #[test]
    fn test_cast_round_trip_law() {
        // trunc(sext(n:i8, i64), i8) == n
        for n in [-128i64, -1, 0, 1, 127] {
            let wide = match cast(Opcode::Sext, Type::I8, n, 0.0, Type::I64).unwrap() {
                CastOut::Int(v) => v,
                _ => unreachable!(),
            };
            let back = match cast(Opcode::Trunc, Type::I64, wide, 0.0, Type::I8).unwrap() {
                CastOut::Int(v) => v,
                _ => unreachable!(),
            };
            assert_eq!(back, n);
        }
    }

    #[test]
    fn test_fptosi_nan_is_zero() {
        match cast(Opcode::Fptosi, Type::F64, 0, f64::NAN, Type::I32).unwrap() {
            CastOut::Int(v) => assert_eq!(v, 0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_checked_fp_casts() {
        assert_eq!(
            cast(Opcode::CastFpToSiRteChk, Type::F64, 0, f64::NAN, Type::I32).err(),
            Some(TrapKind::InvalidCast)
        );
        assert_eq!(
            cast(Opcode::CastFpToSiRteChk, Type::F64, 0, 1e10, Type::I32).err(),
            Some(TrapKind::Overflow)
        );
        // round-to-nearest-even at the halfway point
        match cast(Opcode::CastFpToSiRteChk, Type::F64, 0, 2.5, Type::I32).unwrap() {
            CastOut::Int(v) => assert_eq!(v, 2),
            _ => unreachable!(),
        }
        match cast(Opcode::CastFpToSiRteChk, Type::F64, 0, 3.5, Type::I32).unwrap() {
            CastOut::Int(v) => assert_eq!(v, 4),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_narrow_checks() {
        assert_eq!(
            cast(Opcode::CastSiNarrowChk, Type::I64, 300, 0.0, Type::I8).err(),
            Some(TrapKind::Overflow)
        );
        match cast(Opcode::CastSiNarrowChk, Type::I64, -100, 0.0, Type::I8).unwrap() {
            CastOut::Int(v) => assert_eq!(v, -100),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_bitcast_f32_round_trip() {
        let bits = match cast(Opcode::Bitcast, Type::F32, 0, 1.5, Type::U32).unwrap() {
            CastOut::Int(v) => v,
            _ => unreachable!(),
        };
        match cast(Opcode::Bitcast, Type::U32, bits, 0.0, Type::F32).unwrap() {
            CastOut::Float(v) => assert_eq!(v, 1.5),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_f32_arithmetic_rounds() {
        // 16777217 is not representable in f32
        let sum = float_binop(Opcode::Fadd, Type::F32, 16777216.0, 1.0).unwrap();
        assert_eq!(sum, 16777216.0);
        let sum64 = float_binop(Opcode::Fadd, Type::F64, 16777216.0, 1.0).unwrap();
        assert_eq!(sum64, 16777217.0);
    }
}
