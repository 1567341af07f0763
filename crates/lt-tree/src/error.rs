//! Runtime error types.
//!
//! Render errors are surfaced to the caller; the connection keeps its
//! previous tree and survives. Diff problems are never errors at all:
//! the differ falls back to a full-tree send and records a diagnostic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Field access on a value that has no fields.
    #[error("cannot access field {field:?} on {kind} value")]
    FieldOnScalar { field: String, kind: &'static str },

    /// `range` over a value that is not a sequence or mapping.
    #[error("cannot iterate over {kind} value")]
    NotIterable { kind: &'static str },

    /// Reference to a variable that was never assigned.
    #[error("undefined variable ${0}")]
    UndefinedVariable(String),

    /// Pipeline stage names a function that is not registered.
    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    /// A registered function rejected its arguments.
    #[error("function {name:?}: {message}")]
    Function { name: String, message: String },
}

impl RenderError {
    /// Stable error-kind name used on the wire.
    pub fn kind(&self) -> &'static str {
        "RenderError"
    }
}

/// Diagnostics accumulated by a diff pass. A non-empty report means the
/// differ hit a malformed input and recovered with a full-tree send.
#[derive(Debug, Default)]
pub struct DiffReport {
    pub diagnostics: Vec<String>,
}

impl DiffReport {
    pub fn record(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_kind() {
        let err = RenderError::UndefinedVariable("x".into());
        assert_eq!(err.kind(), "RenderError");
    }

    #[test]
    fn test_report_records() {
        let mut report = DiffReport::default();
        assert!(report.is_clean());
        report.record("slot kind changed");
        assert!(!report.is_clean());
    }
}
