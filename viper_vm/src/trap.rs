//! Unhandled-trap diagnostics

use std::fmt;
use viper_il::TrapKind;

/// Everything the host needs to report an unhandled trap
///
/// The `Display` form is the normative diagnostic block:
///
/// ```text
/// Trap: DivideByZero
/// Function: @main
/// IL: @main#entry#0
/// Source line: -1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapInfo {
    pub kind: TrapKind,
    /// Runtime sub-code; zero when the trap came from a checked op
    pub code: i32,
    pub function: String,
    pub block: String,
    /// 0-based instruction index of the faulting instruction
    pub index: usize,
    /// Source line or -1
    pub line: i32,
}

impl fmt::Display for TrapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trap: {}", self.kind)?;
        writeln!(f, "Function: @{}", self.function)?;
        writeln!(f, "IL: @{}#{}#{}", self.function, self.block, self.index)?;
        write!(f, "Source line: {}", self.line)
    }
}
