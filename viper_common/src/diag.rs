//! Diagnostics emitted by the parser, verifier and pass driver

use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in textual IL, as carried by parser diagnostics
///
/// Line and column are 1-based. This is a point, not a span: IL diagnostics
/// anchor on the token that made the module unusable, and the verifier's
/// diagnostics use function/block/instruction coordinates instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrcLoc {
    pub line: u32,
    pub column: u32,
}

impl SrcLoc {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SrcLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Severity level for diagnostic messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The module is unusable until this is fixed
    Error,
    /// The module is usable but likely wrong
    Warning,
    /// Informational message
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single diagnostic message with a stable code
///
/// Parser diagnostics carry a source position; verifier diagnostics carry the
/// function/block/instruction context of the violation instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable identifier, e.g. "PAR0003" or "VER0107"
    pub code: String,
    pub severity: Severity,
    pub message: String,
    /// Source position for textual input
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub position: Option<SrcLoc>,
    /// Function name for verifier diagnostics
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function: Option<String>,
    /// Block label for verifier diagnostics
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block: Option<String>,
    /// Instruction index within the block
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instruction: Option<usize>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            position: None,
            function: None,
            block: None,
            instruction: None,
        }
    }

    pub fn at(mut self, position: SrcLoc) -> Self {
        self.position = Some(position);
        self
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn in_block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    pub fn at_instruction(mut self, index: usize) -> Self {
        self.instruction = Some(index);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        if let Some(pos) = &self.position {
            write!(f, " at {}", pos)?;
        }
        if let Some(func) = &self.function {
            write!(f, " in @{}", func)?;
            if let Some(block) = &self.block {
                write!(f, "#{}", block)?;
                if let Some(index) = self.instruction {
                    write!(f, "#{}", index)?;
                }
            }
        }
        Ok(())
    }
}

/// Collection of diagnostics accumulated by a pipeline stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.messages.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.messages {
            writeln!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error("VER0001", "missing terminator")
            .in_function("main")
            .in_block("entry")
            .at_instruction(3);
        assert_eq!(
            diag.to_string(),
            "error[VER0001]: missing terminator in @main#entry#3"
        );
    }

    #[test]
    fn test_diagnostic_with_position() {
        let diag = Diagnostic::error("PAR0001", "unexpected token").at(SrcLoc::new(4, 9));
        assert_eq!(diag.to_string(), "error[PAR0001]: unexpected token at 4:9");
    }

    #[test]
    fn test_src_loc_display() {
        assert_eq!(SrcLoc::new(12, 3).to_string(), "12:3");
    }

    #[test]
    fn test_has_errors() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());

        diags.add(Diagnostic::warning("VER0900", "unreachable block"));
        assert!(!diags.has_errors());

        diags.add(Diagnostic::error("VER0001", "bad"));
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
    }
}
