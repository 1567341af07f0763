//! # Value Access
//!
//! The capability seam between the generator and application state. The
//! generator reads state exclusively through this trait (field lookup,
//! iteration, scalar conversion and truthiness) so the state carrier
//! can be swapped (reflection today, codegen or an interpreter later)
//! without touching the tree code.

use serde_json::Value;

pub trait ValueAccess: Sized {
    /// Named field lookup. `None` when the value has fields but not this
    /// one; fails only at the call site's discretion.
    fn get_field(&self, name: &str) -> Option<&Self>;

    /// Whether this value has fields at all.
    fn has_fields(&self) -> bool;

    /// Items for a `range`: `(key, value)` pairs. Sequences yield index
    /// keys in order; mappings yield their entries in sorted-key order
    /// (deterministic re-renders). `None` when the value is not
    /// iterable.
    fn iter_items(&self) -> Option<Vec<(String, &Self)>>;

    /// Text rendering of a leaf value.
    fn as_scalar(&self) -> String;

    /// Truthiness for conditionals: null, false, zero, empty string and
    /// empty collections are false.
    fn as_bool(&self) -> bool;

    /// Coarse type name for error messages.
    fn kind(&self) -> &'static str;
}

impl ValueAccess for Value {
    fn get_field(&self, name: &str) -> Option<&Self> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    fn has_fields(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    fn iter_items(&self) -> Option<Vec<(String, &Self)>> {
        match self {
            Value::Array(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            // serde_json's default map is ordered by key.
            Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }

    fn as_scalar(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            // Compound values render as their JSON text.
            other => other.to_string(),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// HTML-escape a rendered scalar. Interpolations pass through here
/// unless the pipeline ends in `raw`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
