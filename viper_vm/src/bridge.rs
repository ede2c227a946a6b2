//! Runtime-call bridge marshalling
//!
//! Converts VM register values to the C-ABI-shaped arguments runtime
//! functions take, and runtime results back into register values. The err-out
//! convention (allocating the slot, stripping the pointer argument, writing
//! the code back, translating to a trap) is handled by the runner, which owns
//! the frame memory.

use crate::error::{VmError, VmResult};
use crate::value::{Ptr, RtValue};
use viper_il::Type;
use viper_runtime::RtArg;

/// Marshal one argument for a runtime call
pub fn marshal(value: &RtValue) -> VmResult<RtArg> {
    match value {
        RtValue::Int { bits, .. } => Ok(RtArg::Int(*bits)),
        RtValue::Float { value, .. } => Ok(RtArg::Float(*value)),
        RtValue::Str(handle) => Ok(RtArg::Str(*handle)),
        RtValue::Ptr(Ptr::Handle(handle)) => Ok(RtArg::Handle(*handle)),
        RtValue::Ptr(Ptr::Null) => Ok(RtArg::Handle(0)),
        RtValue::Ptr(Ptr::Stack { .. }) => {
            Err(VmError::MemoryFault("stack pointer passed to runtime".to_string()))
        }
        RtValue::Ptr(Ptr::Func(_)) => {
            Err(VmError::MemoryFault("function pointer passed to runtime".to_string()))
        }
        RtValue::Err(_) | RtValue::Token(_) => {
            Err(VmError::Internal("EH value passed to runtime".to_string()))
        }
        RtValue::Uninit => Err(VmError::Internal("uninitialized value passed to runtime".to_string())),
    }
}

/// Marshal a runtime return value back into a register value of the declared
/// IL return type
pub fn unmarshal(ret: RtArg, ty: Type) -> VmResult<RtValue> {
    match (ret, ty) {
        (_, Type::Void) => Ok(RtValue::Uninit),
        (RtArg::Int(bits), ty) if ty.is_int() => {
            Ok(RtValue::Int { ty, bits: crate::ops::normalize(ty, bits as i128) })
        }
        (RtArg::Float(value), ty) if ty.is_float() => Ok(RtValue::Float { ty, value }),
        (RtArg::Str(handle), Type::Str) => Ok(RtValue::Str(handle)),
        (RtArg::Handle(0), Type::Ptr) => Ok(RtValue::Ptr(Ptr::Null)),
        (RtArg::Handle(handle), Type::Ptr) => Ok(RtValue::Ptr(Ptr::Handle(handle))),
        (ret, ty) => Err(VmError::Internal(format!("runtime returned {:?} for IL type {}", ret, ty))),
    }
}
