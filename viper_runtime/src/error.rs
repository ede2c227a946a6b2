//! Runtime error codes and their normative trap-kind mapping

use thiserror::Error;
use viper_il::TrapKind;

/// Error codes reported by runtime functions
///
/// These are the runtime's own codes, carried as the sub-code of the trap
/// they raise; the mapping to `TrapKind` below is normative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RtErrCode {
    FileNotFound = 1,
    Eof = 2,
    IoError = 3,
    Overflow = 4,
    InvalidCast = 5,
    DomainError = 6,
    Bounds = 7,
    InvalidOperation = 8,
    Other = 99,
}

impl RtErrCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn to_trap_kind(self) -> TrapKind {
        match self {
            RtErrCode::FileNotFound => TrapKind::FileNotFound,
            RtErrCode::Eof => TrapKind::Eof,
            RtErrCode::IoError => TrapKind::IOError,
            RtErrCode::Overflow => TrapKind::Overflow,
            RtErrCode::InvalidCast => TrapKind::InvalidCast,
            RtErrCode::DomainError => TrapKind::DomainError,
            RtErrCode::Bounds => TrapKind::Bounds,
            RtErrCode::InvalidOperation => TrapKind::InvalidOperation,
            RtErrCode::Other => TrapKind::RuntimeError,
        }
    }

    pub fn from_code(code: i32) -> Option<RtErrCode> {
        Some(match code {
            1 => RtErrCode::FileNotFound,
            2 => RtErrCode::Eof,
            3 => RtErrCode::IoError,
            4 => RtErrCode::Overflow,
            5 => RtErrCode::InvalidCast,
            6 => RtErrCode::DomainError,
            7 => RtErrCode::Bounds,
            8 => RtErrCode::InvalidOperation,
            99 => RtErrCode::Other,
            _ => return None,
        })
    }
}

/// The registry's error-code-to-trap mapping for runtime functions
pub fn map_rt_err(code: i32) -> TrapKind {
    match RtErrCode::from_code(code) {
        Some(code) => code.to_trap_kind(),
        // Any other nonzero code degrades to a RuntimeError trap
        None => TrapKind::RuntimeError,
    }
}

/// A failure reported by a runtime function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {})", .code.code())]
pub struct RtError {
    pub code: RtErrCode,
    pub message: String,
}

impl RtError {
    pub fn new(code: RtErrCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::new(RtErrCode::FileNotFound, format!("file not found: {}", path))
    }

    pub fn eof() -> Self {
        Self::new(RtErrCode::Eof, "end of file")
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(RtErrCode::IoError, message)
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        Self::new(RtErrCode::Bounds, message)
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::new(RtErrCode::DomainError, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(RtErrCode::Overflow, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(RtErrCode::InvalidOperation, message)
    }
}

pub type RtResult<T> = Result<T, RtError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(RtErrCode::FileNotFound, TrapKind::FileNotFound)]
    #[test_case(RtErrCode::Eof, TrapKind::Eof)]
    #[test_case(RtErrCode::IoError, TrapKind::IOError)]
    #[test_case(RtErrCode::Overflow, TrapKind::Overflow)]
    #[test_case(RtErrCode::InvalidCast, TrapKind::InvalidCast)]
    #[test_case(RtErrCode::DomainError, TrapKind::DomainError)]
    #[test_case(RtErrCode::Bounds, TrapKind::Bounds)]
    #[test_case(RtErrCode::InvalidOperation, TrapKind::InvalidOperation)]
    #[test_case(RtErrCode::Other, TrapKind::RuntimeError)]
    fn test_normative_mapping(code: RtErrCode, kind: TrapKind) {
        assert_eq!(code.to_trap_kind(), kind);
        assert_eq!(map_rt_err(code.code()), kind);
    }

    #[test]
    fn test_unknown_codes_degrade() {
        assert_eq!(map_rt_err(1234), TrapKind::RuntimeError);
    }
}
