//! Fatal VM errors
//!
//! These are host-level invariant violations, not traps: they abort the run
//! and cannot be caught by IL handlers. A verified module that stays within
//! its frame memory never produces one.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("unknown function @{0}")]
    UnknownFunction(String),

    #[error("extern @{0} has no implementation in the runtime library")]
    UnresolvedExtern(String),

    #[error("entry function @{name} expects {expected} argument(s), got {actual}")]
    ArgumentMismatch { name: String, expected: usize, actual: usize },

    #[error("memory fault: {0}")]
    MemoryFault(String),

    #[error("read of uninitialized register %{0}")]
    UninitRead(String),

    #[error("invalid resume token")]
    InvalidResumeToken,

    #[error("handler stack underflow")]
    HandlerUnderflow,

    #[error("run already finished; nothing to continue")]
    NotRunning,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type VmResult<T> = Result<T, VmError>;
