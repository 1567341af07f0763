//! Compiler error types.
//!
//! Both kinds are fatal at startup: a template that fails to parse or
//! references an undefined sub-template never becomes a `Template`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template source rejected by the lexer or parser.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Structurally valid source with an unresolvable reference, e.g. an
    /// undefined sub-template or a recursive definition chain.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
}

impl TemplateError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse { line, message: message.into() }
    }

    /// Stable error-kind name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::InvalidTemplate(_) => "InvalidTemplate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(TemplateError::parse(3, "x").kind(), "ParseError");
        assert_eq!(TemplateError::InvalidTemplate("y".into()).kind(), "InvalidTemplate");
    }
}
