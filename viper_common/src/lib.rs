//! Common utilities and shared functionality for the Viper IL toolchain.
//!
//! This crate provides the pieces shared by every stage of the pipeline:
//! diagnostics with stable codes, the textual-IL source location they point
//! at, and the diagnostic collection handed back by the parser, verifier and
//! pass driver.

pub mod diag;

// Re-export common types for convenience
pub use diag::{Diagnostic, Diagnostics, Severity, SrcLoc};
