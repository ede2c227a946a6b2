//! Checked math runtime functions

use crate::error::{RtError, RtResult};
use crate::{RtArg, RtState};

/// `pow` with domain checking: a negative base with a non-integer exponent
/// is a domain error, a non-finite result from finite inputs is an overflow.
pub fn rt_pow_f64_chkdom(_state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let base = args[0].as_float()?;
    let exponent = args[1].as_float()?;

    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(RtError::domain(format!("pow({}, {}) is undefined over the reals", base, exponent)));
    }
    let result = base.powf(exponent);
    if !result.is_finite() && base.is_finite() && exponent.is_finite() {
        return Err(RtError::overflow(format!("pow({}, {}) is not finite", base, exponent)));
    }
    Ok(RtArg::Float(result))
}

pub fn rt_sqrt_chkdom(_state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = args[0].as_float()?;
    if value < 0.0 {
        return Err(RtError::domain(format!("sqrt({}) is undefined over the reals", value)));
    }
    Ok(RtArg::Float(value.sqrt()))
}

pub fn rt_abs_i64_chk(_state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = args[0].as_int()?;
    match value.checked_abs() {
        Some(result) => Ok(RtArg::Int(result)),
        None => Err(RtError::overflow("abs(i64::MIN) overflows")),
    }
}
