//! Runtime signature registry
//!
//! Declares the external C-ABI functions IL may call: their IL-level
//! signatures, effect flags, error-out convention and the mapping from the
//! runtime's error codes to trap kinds. The registry is frozen before module
//! load; the verifier checks every extern declaration against it.

use crate::module::ExternSig;
use crate::trap::TrapKind;
use crate::types::Type;
use indexmap::IndexMap;
use thiserror::Error;

/// Effect flag bits for runtime functions
pub mod effects {
    pub const READS_MEM: u8 = 1 << 0;
    pub const WRITES_MEM: u8 = 1 << 1;
    pub const MAY_TRAP: u8 = 1 << 2;
}

/// Maps a runtime error code to the trap kind it raises
pub type ErrMapFn = fn(i32) -> TrapKind;

/// Conservative default: any nonzero runtime code is a RuntimeError
pub fn map_all_to_runtime_error(_code: i32) -> TrapKind {
    TrapKind::RuntimeError
}

/// One registered runtime function
#[derive(Debug, Clone)]
pub struct RtSignature {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub effects: u8,
    /// Index of the `ptr` parameter the runtime reports failure through;
    /// `None` when failure is reported by the return convention
    pub err_out: Option<usize>,
    pub map_err: ErrMapFn,
}

impl RtSignature {
    pub fn new(name: impl Into<String>, params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            ret,
            effects: 0,
            err_out: None,
            map_err: map_all_to_runtime_error,
        }
    }

    pub fn with_effects(mut self, effects: u8) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_err_out(mut self, index: usize) -> Self {
        self.err_out = Some(index);
        self.effects |= effects::MAY_TRAP;
        self
    }

    pub fn with_err_map(mut self, map_err: ErrMapFn) -> Self {
        self.map_err = map_err;
        self
    }

    pub fn reads_memory(&self) -> bool {
        self.effects & effects::READS_MEM != 0
    }

    pub fn writes_memory(&self) -> bool {
        self.effects & effects::WRITES_MEM != 0
    }

    pub fn may_trap(&self) -> bool {
        self.effects & effects::MAY_TRAP != 0
    }

    /// A call with neither memory effect nor trap may be moved or removed
    pub fn is_pure(&self) -> bool {
        self.effects == 0
    }

    /// Whether a module's extern declaration matches this entry
    pub fn matches(&self, sig: &ExternSig) -> bool {
        self.params == sig.params && self.ret == sig.ret
    }

    pub fn to_extern_sig(&self) -> ExternSig {
        ExternSig { params: self.params.clone(), ret: self.ret }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate runtime function: {0}")]
    Duplicate(String),
    #[error("err_out index {index} out of range for {name}")]
    ErrOutOutOfRange { name: String, index: usize },
    #[error("err_out parameter of {0} must have type ptr")]
    ErrOutNotPtr(String),
}

/// The frozen table of runtime functions known to the toolchain
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: IndexMap<String, RtSignature>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sig: RtSignature) -> Result<(), RegistryError> {
        if let Some(index) = sig.err_out {
            match sig.params.get(index) {
                None => {
                    return Err(RegistryError::ErrOutOutOfRange { name: sig.name, index });
                }
                Some(ty) if *ty != Type::Ptr => return Err(RegistryError::ErrOutNotPtr(sig.name)),
                Some(_) => {}
            }
        }
        if self.entries.contains_key(&sig.name) {
            return Err(RegistryError::Duplicate(sig.name));
        }
        self.entries.insert(sig.name.clone(), sig);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RtSignature> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RtSignature> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
