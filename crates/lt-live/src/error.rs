//! Runtime error kinds and their wire names.
//!
//! Compile-time failures (`ParseError`, `InvalidTemplate`) arrive via
//! lt-template and are fatal at startup. Everything else is a live
//! condition: the connection either survives (render and dispatch
//! errors) or receives a final close (`SessionExpired`).

use lt_template::TemplateError;
use lt_tree::RenderError;
use thiserror::Error;

use crate::action::FieldErrors;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// Action targeted a store that is not registered.
    #[error("unknown store {0:?}")]
    UnknownStore(String),

    /// Action data failed binding or validation.
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(FieldErrors),

    /// Malformed API call, e.g. an empty broadcast target list.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection's session group was evicted; the client must
    /// reconnect.
    #[error("session expired")]
    SessionExpired,
}

impl LiveError {
    /// Stable error-kind name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Template(err) => err.kind(),
            Self::Render(err) => err.kind(),
            Self::UnknownStore(_) => "UnknownStore",
            Self::Validation(_) => "ValidationError",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::SessionExpired => "SessionExpired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FieldError;

    #[test]
    fn test_kind_names() {
        assert_eq!(LiveError::UnknownStore("x".into()).kind(), "UnknownStore");
        assert_eq!(LiveError::SessionExpired.kind(), "SessionExpired");
        assert_eq!(LiveError::InvalidArgument("empty".into()).kind(), "InvalidArgument");
        let errors = FieldErrors::of(vec![FieldError::new("email", "required")]);
        assert_eq!(LiveError::Validation(errors).kind(), "ValidationError");
    }
}
