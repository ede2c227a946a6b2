//! Interpreter virtual machine for Viper IL
//!
//! Executes verified modules with deterministic trap semantics: a single
//! cooperative thread, an explicit frame stack, block-parameter edge copies,
//! per-frame handler stacks with resume tokens, and a bridge that translates
//! runtime-library failures into IL traps. Hosts drive execution through
//! [`Vm`] and observe pauses from polling, breakpoints and single-stepping.

pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod ops;
pub mod runner;
pub mod trap;
pub mod value;

pub use config::{BreakSpec, PollFn, RunConfig};
pub use error::{VmError, VmResult};
pub use runner::{PauseReason, RunState, Vm};
pub use trap::TrapInfo;
pub use value::{Ptr, ResumeToken, RtValue};
