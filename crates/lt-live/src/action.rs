//! # Action Context - Typed Access Over Untyped Data Bags
//!
//! An incoming action carries a dotted name plus a free-form data map of
//! form/input values. Stores read it through typed accessors, or bind the
//! whole bag onto one of their own structs in a single step. Binding
//! failures surface as an ordered field-error collection so UIs can map
//! each message back to its input.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Split a dotted action name into `(store, action)`. No dot targets the
/// unnamed store.
pub fn split_action(action: &str) -> (&str, &str) {
    match action.split_once('.') {
        Some((store, rest)) => (store, rest),
        None => ("", action),
    }
}

/// One validation failure, keyed by the offending field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// An ordered, non-empty collection of field errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn of(errors: Vec<FieldError>) -> Self {
        debug_assert!(!errors.is_empty(), "field-error collections are non-empty");
        Self(errors)
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }
}

/// Builder for stores that validate field-by-field.
#[derive(Debug, Default)]
pub struct FieldErrorList {
    errors: Vec<FieldError>,
}

impl FieldErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// `Ok(())` when nothing was recorded, the collection otherwise.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FieldErrors(self.errors))
        }
    }
}

/// The context a store's `change` receives: the resolved action name and
/// typed views over the data bag.
#[derive(Debug, Clone)]
pub struct ActionContext {
    action: String,
    data: Map<String, Value>,
}

impl ActionContext {
    pub fn new(action: impl Into<String>, data: Map<String, Value>) -> Self {
        Self { action: action.into(), data }
    }

    /// The action name with any store prefix already stripped.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn has(&self, field: &str) -> bool {
        self.data.contains_key(field)
    }

    /// Raw value access.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn string(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Integer access; numeric strings (form inputs) coerce.
    pub fn int(&self, field: &str) -> Option<i64> {
        match self.data.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn float(&self, field: &str) -> Option<f64> {
        match self.data.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean access; checkbox-style strings coerce.
    pub fn bool_(&self, field: &str) -> Option<bool> {
        match self.data.get(field)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Bind the whole data bag onto a caller struct. Deserialization
    /// failures come back as a field-error collection keyed by the path
    /// serde reports.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, FieldErrors> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|err| {
            let message = err.to_string();
            let field = message
                .split_once("field `")
                .and_then(|(_, rest)| rest.split_once('`'))
                .map(|(name, _)| name.to_string())
                .unwrap_or_else(|| "_".to_string());
            FieldErrors(vec![FieldError { field, message }])
        })
    }
}
