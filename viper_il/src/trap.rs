//! Trap kinds and the error record materialized at trap dispatch

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of runtime trap conditions
///
/// Numeric codes are part of the wire contract: `trap.from_err` carries the
/// kind as an `i32` constant and the runtime bridge reports kinds through the
/// same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TrapKind {
    DivideByZero = 1,
    Overflow = 2,
    InvalidCast = 3,
    DomainError = 4,
    Bounds = 5,
    FileNotFound = 6,
    Eof = 7,
    IOError = 8,
    InvalidOperation = 9,
    RuntimeError = 10,
}

impl TrapKind {
    pub const ALL: &'static [TrapKind] = &[
        TrapKind::DivideByZero,
        TrapKind::Overflow,
        TrapKind::InvalidCast,
        TrapKind::DomainError,
        TrapKind::Bounds,
        TrapKind::FileNotFound,
        TrapKind::Eof,
        TrapKind::IOError,
        TrapKind::InvalidOperation,
        TrapKind::RuntimeError,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<TrapKind> {
        TrapKind::ALL.iter().copied().find(|k| k.code() == code)
    }

    /// Name as it appears in textual IL and in the unhandled-trap diagnostic
    pub fn name(self) -> &'static str {
        match self {
            TrapKind::DivideByZero => "DivideByZero",
            TrapKind::Overflow => "Overflow",
            TrapKind::InvalidCast => "InvalidCast",
            TrapKind::DomainError => "DomainError",
            TrapKind::Bounds => "Bounds",
            TrapKind::FileNotFound => "FileNotFound",
            TrapKind::Eof => "EOF",
            TrapKind::IOError => "IOError",
            TrapKind::InvalidOperation => "InvalidOperation",
            TrapKind::RuntimeError => "RuntimeError",
        }
    }

    pub fn from_name(name: &str) -> Option<TrapKind> {
        TrapKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The error record bound to a handler block's first parameter
///
/// `ip` is an opaque VM instruction pointer captured at raise time; `line` is
/// the source line of the faulting instruction or -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: i32,
    pub code: i32,
    pub ip: u64,
    pub line: i32,
}

impl ErrorRecord {
    pub fn new(kind: TrapKind, code: i32, ip: u64, line: i32) -> Self {
        Self { kind: kind.code(), code, ip, line }
    }

    pub fn trap_kind(&self) -> Option<TrapKind> {
        TrapKind::from_code(self.kind)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trap_kind() {
            Some(kind) => write!(f, "error{{{}, code={}, line={}}}", kind, self.code, self.line),
            None => write!(f, "error{{kind={}, code={}, line={}}}", self.kind, self.code, self.line),
        }
    }
}
