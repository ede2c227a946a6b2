//! String runtime functions

use crate::error::{RtError, RtResult};
use crate::{RtArg, RtState};

pub fn rt_str_concat(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let left = state.str_value(args[0].as_str_handle()?)?.to_string();
    let right = state.str_value(args[1].as_str_handle()?)?;
    let joined = format!("{}{}", left, right);
    Ok(RtArg::Str(state.alloc_str(joined)))
}

pub fn rt_str_len(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = state.str_value(args[0].as_str_handle()?)?;
    Ok(RtArg::Int(value.chars().count() as i64))
}

pub fn rt_str_eq(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let left = state.str_value(args[0].as_str_handle()?)?;
    let right = state.str_value(args[1].as_str_handle()?)?;
    Ok(RtArg::Int((left == right) as i64))
}

pub fn rt_str_gt(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let left = state.str_value(args[0].as_str_handle()?)?;
    let right = state.str_value(args[1].as_str_handle()?)?;
    Ok(RtArg::Int((left > right) as i64))
}

/// Substring by character positions `[start, start+len)`
pub fn rt_str_substr(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = state.str_value(args[0].as_str_handle()?)?;
    let start = args[1].as_int()?;
    let len = args[2].as_int()?;

    let char_count = value.chars().count() as i64;
    if start < 0 || len < 0 || start + len > char_count {
        return Err(RtError::bounds(format!(
            "substring [{}, {}+{}) of string with {} chars",
            start, start, len, char_count
        )));
    }
    let piece: String = value.chars().skip(start as usize).take(len as usize).collect();
    Ok(RtArg::Str(state.alloc_str(piece)))
}

pub fn rt_to_str_i64(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = args[0].as_int()?;
    Ok(RtArg::Str(state.alloc_str(value.to_string())))
}

pub fn rt_to_str_f64(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = args[0].as_float()?;
    Ok(RtArg::Str(state.alloc_str(format!("{:?}", value))))
}

pub fn rt_print_str(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let value = state.str_value(args[0].as_str_handle()?)?.to_string();
    state.write_out(&value)?;
    Ok(RtArg::Unit)
}
