//! IL modules: the unit of verification and execution

use crate::function::Function;
use crate::types::Type;
use crate::value::{Const, ExternId, FuncId, GlobalId, StrId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Schema version carried on the first line of textual IL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

/// The version this library reads and writes
pub const CURRENT_VERSION: Version = Version { major: 0, minor: 1, patch: 0 };

impl Version {
    /// A reader accepts any module with its own major version
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    pub fn parse(s: &str) -> Option<Version> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version { major, minor, patch })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Signature of an external C-ABI function declared by the module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl ExternSig {
    pub fn new(params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self { params: params.into_iter().collect(), ret }
    }
}

/// A module-level global value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub ty: Type,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub init: Option<Const>,
    pub mutable: bool,
}

/// Error raised when module construction breaks a name invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("duplicate function name: @{0}")]
    DuplicateFunction(String),
    #[error("duplicate extern name: @{0}")]
    DuplicateExtern(String),
    #[error("duplicate global name: @{0}")]
    DuplicateGlobal(String),
    #[error("name @{0} is declared both as a function and as an extern")]
    FunctionExternClash(String),
}

/// An IL module
///
/// Owns all of its contents; functions do not outlive the module. Externs and
/// globals are kept sorted by name (the normalization the parser applies);
/// functions keep their declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub version: Version,
    /// Informational target triple
    pub triple: String,
    pub functions: IndexMap<String, Function>,
    pub externs: IndexMap<String, ExternSig>,
    pub globals: IndexMap<String, Global>,
    /// Interned string literals; `StrId` equality is byte equality
    pub strings: IndexSet<String>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION,
            triple: String::new(),
            functions: IndexMap::new(),
            externs: IndexMap::new(),
            globals: IndexMap::new(),
            strings: IndexSet::new(),
        }
    }

    pub fn with_triple(mut self, triple: impl Into<String>) -> Self {
        self.triple = triple.into();
        self
    }

    /// Intern a string literal; returns the canonical id
    pub fn intern_str(&mut self, s: impl Into<String>) -> StrId {
        let (index, _) = self.strings.insert_full(s.into());
        StrId(index as u32)
    }

    pub fn str_value(&self, id: StrId) -> Option<&str> {
        self.strings.get_index(id.0 as usize).map(|s| s.as_str())
    }

    pub fn add_function(&mut self, function: Function) -> Result<FuncId, ModuleError> {
        if self.functions.contains_key(&function.name) {
            return Err(ModuleError::DuplicateFunction(function.name.clone()));
        }
        if self.externs.contains_key(&function.name) {
            return Err(ModuleError::FunctionExternClash(function.name.clone()));
        }
        let (index, _) = self.functions.insert_full(function.name.clone(), function);
        Ok(FuncId(index as u32))
    }

    pub fn add_extern(&mut self, name: impl Into<String>, sig: ExternSig) -> Result<(), ModuleError> {
        let name = name.into();
        if self.externs.contains_key(&name) {
            return Err(ModuleError::DuplicateExtern(name));
        }
        if self.functions.contains_key(&name) {
            return Err(ModuleError::FunctionExternClash(name));
        }
        self.externs.insert(name, sig);
        self.externs.sort_keys();
        Ok(())
    }

    pub fn add_global(&mut self, name: impl Into<String>, global: Global) -> Result<(), ModuleError> {
        let name = name.into();
        if self.globals.contains_key(&name) {
            return Err(ModuleError::DuplicateGlobal(name));
        }
        self.globals.insert(name, global);
        self.globals.sort_keys();
        Ok(())
    }

    pub fn func_id(&self, name: &str) -> Option<FuncId> {
        self.functions.get_index_of(name).map(|i| FuncId(i as u32))
    }

    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get_index(id.0 as usize).map(|(_, f)| f)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn extern_id(&self, name: &str) -> Option<ExternId> {
        self.externs.get_index_of(name).map(|i| ExternId(i as u32))
    }

    pub fn extern_sig(&self, id: ExternId) -> Option<(&str, &ExternSig)> {
        self.externs.get_index(id.0 as usize).map(|(n, s)| (n.as_str(), s))
    }

    pub fn global_id(&self, name: &str) -> Option<GlobalId> {
        self.globals.get_index_of(name).map(|i| GlobalId(i as u32))
    }

    pub fn global(&self, id: GlobalId) -> Option<(&str, &Global)> {
        self.globals.get_index(id.0 as usize).map(|(n, g)| (n.as_str(), g))
    }

    pub fn iter_functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions.values().enumerate().map(|(i, f)| (FuncId(i as u32), f))
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;

    #[test]
    fn test_string_interning_is_canonical() {
        let mut module = Module::new();
        let a = module.intern_str("hello");
        let b = module.intern_str("world");
        let c = module.intern_str("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(module.str_value(a), Some("hello"));
    }

    #[test]
    fn test_name_invariants() {
        let mut module = Module::new();
        module.add_function(Function::new("main", Type::I32)).unwrap();

        let err = module.add_function(Function::new("main", Type::I32)).unwrap_err();
        assert_eq!(err, ModuleError::DuplicateFunction("main".to_string()));

        let err = module
            .add_extern("main", ExternSig::new([Type::Str], Type::Void))
            .unwrap_err();
        assert_eq!(err, ModuleError::FunctionExternClash("main".to_string()));
    }

    #[test]
    fn test_externs_sorted() {
        let mut module = Module::new();
        module.add_extern("rt_z", ExternSig::new([], Type::Void)).unwrap();
        module.add_extern("rt_a", ExternSig::new([], Type::Void)).unwrap();

        let names: Vec<&String> = module.externs.keys().collect();
        assert_eq!(names, vec!["rt_a", "rt_z"]);
        // ids track the sorted positions
        assert_eq!(module.extern_id("rt_a"), Some(ExternId(0)));
        assert_eq!(module.extern_id("rt_z"), Some(ExternId(1)));
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("0.1.0"), Some(CURRENT_VERSION));
        assert_eq!(Version::parse("1.2"), None);
        assert!(CURRENT_VERSION.is_compatible_with(&Version { major: 0, minor: 9, patch: 3 }));
        assert!(!CURRENT_VERSION.is_compatible_with(&Version { major: 1, minor: 0, patch: 0 }));
    }
}
