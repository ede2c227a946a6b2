//! Host runtime library for the Viper toolchain
//!
//! Strings, files and checked math live on the runtime's own heap; IL sees
//! them only as opaque `str`/`ptr` handles and reaches them through the VM's
//! runtime bridge. Every function here is registered twice: its IL-level
//! signature in the [`viper_il::Registry`] (consulted by the verifier) and
//! its implementation in the [`RtLibrary`] (resolved by the VM at module
//! load).

pub mod error;
pub mod files;
pub mod math;
pub mod strings;

pub use error::{map_rt_err, RtErrCode, RtError, RtResult};

use std::collections::HashMap;
use std::io::Write;
use viper_il::registry::{effects, Registry, RtSignature};
use viper_il::Type;

/// A C-ABI-shaped argument or return value crossing the bridge
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtArg {
    Int(i64),
    Float(f64),
    /// Handle into the runtime's string heap
    Str(u32),
    /// Opaque object handle (files, buffers); zero is the null handle
    Handle(u64),
    Unit,
}

impl RtArg {
    pub fn as_int(&self) -> RtResult<i64> {
        match self {
            RtArg::Int(v) => Ok(*v),
            _ => Err(RtError::invalid_operation("expected integer argument")),
        }
    }

    pub fn as_float(&self) -> RtResult<f64> {
        match self {
            RtArg::Float(v) => Ok(*v),
            _ => Err(RtError::invalid_operation("expected float argument")),
        }
    }

    pub fn as_str_handle(&self) -> RtResult<u32> {
        match self {
            RtArg::Str(h) => Ok(*h),
            _ => Err(RtError::invalid_operation("expected string argument")),
        }
    }

    pub fn as_handle(&self) -> RtResult<u64> {
        match self {
            RtArg::Handle(h) => Ok(*h),
            _ => Err(RtError::invalid_operation("expected handle argument")),
        }
    }
}

/// Signature every runtime function implementation has
pub type RtFn = fn(&mut RtState, &[RtArg]) -> RtResult<RtArg>;

/// The runtime's own heap and open resources
///
/// Single-threaded by contract: the VM that owns this state is the only
/// caller.
pub struct RtState {
    strings: Vec<String>,
    files: Vec<Option<files::FileEntry>>,
    out: Box<dyn Write>,
}

impl std::fmt::Debug for RtState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtState")
            .field("strings", &self.strings.len())
            .field("files", &self.files.len())
            .finish()
    }
}

impl RtState {
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// Route `rt_print_str` output somewhere else (tests use a buffer)
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self { strings: Vec::new(), files: Vec::new(), out }
    }

    pub fn alloc_str(&mut self, value: impl Into<String>) -> u32 {
        let handle = self.strings.len() as u32;
        self.strings.push(value.into());
        handle
    }

    pub fn str_value(&self, handle: u32) -> RtResult<&str> {
        self.strings
            .get(handle as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| RtError::invalid_operation(format!("dangling string handle {}", handle)))
    }

    pub(crate) fn write_out(&mut self, text: &str) -> RtResult<()> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| RtError::io(e.to_string()))
    }

    pub(crate) fn files_mut(&mut self) -> &mut Vec<Option<files::FileEntry>> {
        &mut self.files
    }
}

impl Default for RtState {
    fn default() -> Self {
        Self::new()
    }
}

/// Implementation table, resolved by name at module load
#[derive(Default)]
pub struct RtLibrary {
    functions: HashMap<&'static str, RtFn>,
}

impl RtLibrary {
    pub fn resolve(&self, name: &str) -> Option<RtFn> {
        self.functions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for RtLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtLibrary").field("functions", &self.functions.len()).finish()
    }
}

/// The standard runtime library implementations
pub fn standard_library() -> RtLibrary {
    let mut functions: HashMap<&'static str, RtFn> = HashMap::new();

    functions.insert("rt_str_concat", strings::rt_str_concat);
    functions.insert("rt_str_len", strings::rt_str_len);
    functions.insert("rt_str_eq", strings::rt_str_eq);
    functions.insert("rt_str_gt", strings::rt_str_gt);
    functions.insert("rt_str_substr", strings::rt_str_substr);
    functions.insert("rt_to_str_i64", strings::rt_to_str_i64);
    functions.insert("rt_to_str_f64", strings::rt_to_str_f64);
    functions.insert("rt_print_str", strings::rt_print_str);

    functions.insert("rt_file_open", files::rt_file_open);
    functions.insert("rt_file_create", files::rt_file_create);
    functions.insert("rt_file_read_line", files::rt_file_read_line);
    functions.insert("rt_file_write", files::rt_file_write);
    functions.insert("rt_file_close", files::rt_file_close);

    functions.insert("rt_pow_f64_chkdom", math::rt_pow_f64_chkdom);
    functions.insert("rt_sqrt_chkdom", math::rt_sqrt_chkdom);
    functions.insert("rt_abs_i64_chk", math::rt_abs_i64_chk);

    RtLibrary { functions }
}

/// The registry entries matching [`standard_library`]
///
/// Frozen before module load; the verifier checks every module extern
/// declaration against these signatures.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    let mut add = |sig: RtSignature| {
        registry.register(sig).expect("duplicate entry in default registry");
    };

    // Strings. Concat and substr allocate on the runtime heap; none of them
    // read or write IL-visible memory.
    add(RtSignature::new("rt_str_concat", [Type::Str, Type::Str], Type::Str));
    add(RtSignature::new("rt_str_len", [Type::Str], Type::I64));
    add(RtSignature::new("rt_str_eq", [Type::Str, Type::Str], Type::I1));
    add(RtSignature::new("rt_str_gt", [Type::Str, Type::Str], Type::I1));
    add(
        RtSignature::new("rt_str_substr", [Type::Str, Type::I64, Type::I64], Type::Str)
            .with_effects(effects::MAY_TRAP)
            .with_err_map(map_rt_err),
    );
    add(RtSignature::new("rt_to_str_i64", [Type::I64], Type::Str));
    add(RtSignature::new("rt_to_str_f64", [Type::F64], Type::Str));
    add(
        RtSignature::new("rt_print_str", [Type::Str], Type::Void)
            .with_effects(effects::WRITES_MEM | effects::MAY_TRAP)
            .with_err_map(map_rt_err),
    );

    // Files report failure through an err-out slot the IL passes explicitly
    add(
        RtSignature::new("rt_file_open", [Type::Str, Type::Ptr], Type::Ptr)
            .with_effects(effects::READS_MEM | effects::WRITES_MEM)
            .with_err_out(1)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_file_create", [Type::Str, Type::Ptr], Type::Ptr)
            .with_effects(effects::READS_MEM | effects::WRITES_MEM)
            .with_err_out(1)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_file_read_line", [Type::Ptr, Type::Ptr], Type::Str)
            .with_effects(effects::READS_MEM | effects::WRITES_MEM)
            .with_err_out(1)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_file_write", [Type::Ptr, Type::Str, Type::Ptr], Type::Void)
            .with_effects(effects::READS_MEM | effects::WRITES_MEM)
            .with_err_out(2)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_file_close", [Type::Ptr], Type::Void)
            .with_effects(effects::WRITES_MEM),
    );

    // Checked math reports failure by return convention
    add(
        RtSignature::new("rt_pow_f64_chkdom", [Type::F64, Type::F64], Type::F64)
            .with_effects(effects::MAY_TRAP)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_sqrt_chkdom", [Type::F64], Type::F64)
            .with_effects(effects::MAY_TRAP)
            .with_err_map(map_rt_err),
    );
    add(
        RtSignature::new("rt_abs_i64_chk", [Type::I64], Type::I64)
            .with_effects(effects::MAY_TRAP)
            .with_err_map(map_rt_err),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_and_library_agree() {
        let registry = default_registry();
        let library = standard_library();
        assert_eq!(registry.len(), library.len());
        for entry in registry.iter() {
            assert!(
                library.resolve(&entry.name).is_some(),
                "registry entry {} has no implementation",
                entry.name
            );
        }
    }

    #[test]
    fn test_state_string_heap() {
        let mut state = RtState::new();
        let a = state.alloc_str("alpha");
        let b = state.alloc_str("beta");
        assert_ne!(a, b);
        assert_eq!(state.str_value(a).unwrap(), "alpha");
        assert!(state.str_value(999).is_err());
    }
}
