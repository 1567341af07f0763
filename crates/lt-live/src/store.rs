//! # Stores - Application State Behind the Change Capability
//!
//! A store owns one slice of application state and mutates it in
//! response to named actions. A session group holds one `Stores` map
//! shared by every connection in the group; the unnamed store answers
//! undotted actions, named stores answer their `name.*` prefix.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::action::{ActionContext, FieldErrors};
use crate::error::LiveError;

/// The change capability. `init` runs once when the store's group is
/// created; `state` snapshots the store for rendering; `replace` adopts
/// broadcast state wholesale.
pub trait Store: Send + 'static {
    /// One-time setup at group creation.
    fn init(&mut self) {}

    /// Mutate in response to an action. Validation failures come back as
    /// a field-error collection for the UI.
    fn change(&mut self, ctx: &ActionContext) -> Result<(), FieldErrors>;

    /// Snapshot of this store's state for tree generation.
    fn state(&self) -> Value;

    /// Adopt externally provided state (broadcasts).
    fn replace(&mut self, state: Value);
}

/// Named store map for one session group.
#[derive(Default)]
pub struct Stores {
    stores: BTreeMap<String, Box<dyn Store>>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("names", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single unnamed store (undotted actions).
    pub fn unnamed(mut self, store: impl Store) -> Self {
        self.stores.insert(String::new(), Box::new(store));
        self
    }

    /// Register a named store (`name.*` actions).
    pub fn named(mut self, name: impl Into<String>, store: impl Store) -> Self {
        self.stores.insert(name.into(), Box::new(store));
        self
    }

    /// Run every store's `init`, once per group.
    pub fn init_all(&mut self) {
        for store in self.stores.values_mut() {
            store.init();
        }
    }

    /// Route an action to its store and invoke `change`.
    pub fn dispatch(&mut self, store_name: &str, ctx: &ActionContext) -> Result<(), LiveError> {
        let Some(store) = self.stores.get_mut(store_name) else {
            return Err(LiveError::UnknownStore(store_name.to_string()));
        };
        store.change(ctx).map_err(LiveError::Validation)
    }

    /// Merged render state: the unnamed store's fields at the root,
    /// named stores under their names. A lone unnamed store is the root
    /// verbatim, whatever its shape.
    pub fn state(&self) -> Value {
        if self.stores.len() == 1 {
            if let Some(store) = self.stores.get("") {
                return store.state();
            }
        }
        let mut root = Map::new();
        for (name, store) in &self.stores {
            let state = store.state();
            if name.is_empty() {
                if let Value::Object(fields) = state {
                    root.extend(fields);
                }
            } else {
                root.insert(name.clone(), state);
            }
        }
        Value::Object(root)
    }

    /// Adopt broadcast state: the unnamed store receives the whole
    /// value; named stores receive the field matching their name, when
    /// present.
    pub fn replace_state(&mut self, state: &Value) {
        for (name, store) in self.stores.iter_mut() {
            if name.is_empty() {
                store.replace(state.clone());
            } else if let Some(slice) = state.get(name.as_str()) {
                store.replace(slice.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Shared handle: one per session group, locked for the duration of a
/// mutation and released before any I/O.
pub type SharedStores = Arc<std::sync::Mutex<Stores>>;

/// Builds a fresh `Stores` for each new session group.
pub type StoresFactory = Arc<dyn Fn() -> Stores + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter {
        n: i64,
        initialized: bool,
    }

    impl Store for Counter {
        fn init(&mut self) {
            self.initialized = true;
        }

        fn change(&mut self, ctx: &ActionContext) -> Result<(), FieldErrors> {
            match ctx.action() {
                "increment" => {
                    self.n += 1;
                    Ok(())
                }
                "set" => match ctx.int("value") {
                    Some(value) => {
                        self.n = value;
                        Ok(())
                    }
                    None => Err(FieldErrors::single("value", "must be an integer")),
                },
                _ => Ok(()),
            }
        }

        fn state(&self) -> Value {
            json!({"Counter": self.n})
        }

        fn replace(&mut self, state: Value) {
            if let Some(n) = state.get("Counter").and_then(Value::as_i64) {
                self.n = n;
            }
        }
    }

    fn counter() -> Counter {
        Counter { n: 0, initialized: false }
    }

    fn ctx(action: &str, data: Value) -> ActionContext {
        let Value::Object(map) = data else { panic!() };
        ActionContext::new(action, map)
    }

    #[test]
    fn test_dispatch_unnamed() {
        let mut stores = Stores::new().unnamed(counter());
        stores.dispatch("", &ctx("increment", json!({}))).unwrap();
        assert_eq!(stores.state(), json!({"Counter": 1}));
    }

    #[test]
    fn test_dispatch_unknown_store() {
        let mut stores = Stores::new().unnamed(counter());
        let err = stores.dispatch("ghost", &ctx("x", json!({}))).unwrap_err();
        assert_eq!(err.kind(), "UnknownStore");
    }

    #[test]
    fn test_validation_surfaces_field_errors() {
        let mut stores = Stores::new().unnamed(counter());
        let err = stores.dispatch("", &ctx("set", json!({"value": "abc"}))).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_named_store_state_nests() {
        let stores = Stores::new().unnamed(counter()).named("cart", counter());
        assert_eq!(
            stores.state(),
            json!({"Counter": 0, "cart": {"Counter": 0}})
        );
    }

    #[test]
    fn test_init_all_runs_once_per_store() {
        let mut stores = Stores::new().unnamed(counter());
        stores.init_all();
        assert_eq!(stores.state(), json!({"Counter": 0}));
    }

    #[test]
    fn test_replace_state() {
        let mut stores = Stores::new().unnamed(counter()).named("cart", counter());
        stores.replace_state(&json!({"Counter": 7, "cart": {"Counter": 3}}));
        assert_eq!(
            stores.state(),
            json!({"Counter": 7, "cart": {"Counter": 3}})
        );
    }
}
