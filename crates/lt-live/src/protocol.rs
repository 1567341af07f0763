//! # Wire Protocol
//!
//! The JSON messages exchanged with the client patcher.
//!
//! ```text
//! inbound   { "action": "store.name", "data": { … } }
//! outbound  full tree / update tree JSON (lt-tree wire shapes)
//! outbound  { "error": "<kind>", "fields": [{ "field", "message" }…] }
//! ```

use lt_tree::UpdateNode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::FieldErrors;
use crate::error::LiveError;

/// Client → server action message.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionMessage {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ActionMessage {
    pub fn parse(text: &str) -> Result<Self, LiveError> {
        serde_json::from_str(text)
            .map_err(|err| LiveError::InvalidArgument(format!("malformed action message: {}", err)))
    }
}

/// Server → client error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl ErrorMessage {
    pub fn from_error(err: &LiveError) -> Self {
        let fields = match err {
            LiveError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };
        Self { error: err.kind(), fields }
    }
}

/// One message bound for a connection's socket.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
}

impl OutboundMessage {
    pub fn update(update: &UpdateNode) -> Self {
        Self {
            text: serde_json::to_string(update).expect("update trees always serialize"),
        }
    }

    /// Update payload with readable context attached (dev mode only).
    pub fn dev_update(update: &UpdateNode, template: &str, diagnostics: &[String]) -> Self {
        let mut value = serde_json::to_value(update).expect("update trees always serialize");
        if let Value::Object(map) = &mut value {
            map.insert(
                "_dev".to_string(),
                serde_json::json!({ "template": template, "diagnostics": diagnostics }),
            );
        }
        Self { text: value.to_string() }
    }

    pub fn error(err: &LiveError) -> Self {
        Self {
            text: serde_json::to_string(&ErrorMessage::from_error(err))
                .expect("error envelopes always serialize"),
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{FieldError, FieldErrors};

    #[test]
    fn test_action_message_parses() {
        let msg = ActionMessage::parse(r#"{"action": "cart.add", "data": {"id": "7"}}"#).unwrap();
        assert_eq!(msg.action, "cart.add");
        assert_eq!(msg.data["id"], "7");
    }

    #[test]
    fn test_action_message_data_optional() {
        let msg = ActionMessage::parse(r#"{"action": "tick"}"#).unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_malformed_action_is_invalid_argument() {
        let err = ActionMessage::parse("not json").unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn test_error_envelope_shape() {
        let errors = FieldErrors::of(vec![FieldError::new("email", "required")]);
        let msg = OutboundMessage::error(&LiveError::Validation(errors));
        assert_eq!(
            msg.text,
            r#"{"error":"ValidationError","fields":[{"field":"email","message":"required"}]}"#
        );
    }

    #[test]
    fn test_error_envelope_without_fields() {
        let msg = OutboundMessage::error(&LiveError::UnknownStore("x".into()));
        assert_eq!(msg.text, r#"{"error":"UnknownStore"}"#);
    }
}
