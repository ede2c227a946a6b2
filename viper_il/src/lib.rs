//! Typed SSA intermediate language for the Viper toolchain
//!
//! The IL is the contract between source-language frontends and execution
//! backends: a typed, block-parameter SSA form with explicit checked
//! operations and structured exception handling. This crate owns the data
//! model, the textual format, the verifier that gates every downstream
//! consumer, the runtime signature registry and the optimization pass driver.
//!
//! The usual pipeline:
//!
//! ```text
//! frontend -> Module (builder or .il text) -> verify -> { VM | passes | codegen }
//! ```

pub mod builder;
pub mod cfg;
pub mod dom;
pub mod function;
pub mod instr;
pub mod lexer;
pub mod module;
pub mod opcode;
pub mod parser;
pub mod passes;
pub mod printer;
pub mod registry;
pub mod trap;
pub mod types;
pub mod value;
pub mod verifier;

// Re-export the types that make up the public surface
pub use builder::{FunctionBuilder, ModuleBuilder};
pub use function::{FnAttrs, Function, Param};
pub use instr::{Block, BlockParam, BranchTarget, Instr};
pub use module::{ExternSig, Global, Module, ModuleError, Version, CURRENT_VERSION};
pub use opcode::{OpInfo, Opcode, OperandRule, ResultRule};
pub use parser::parse_module;
pub use printer::print_module;
pub use registry::{Registry, RtSignature};
pub use trap::{ErrorRecord, TrapKind};
pub use types::Type;
pub use value::{BlockId, Const, ExternId, FuncId, GlobalId, Operand, StrId, TempId};
pub use verifier::{verify_module, verify_ok};
