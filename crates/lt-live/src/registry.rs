//! # Connection Registry
//!
//! Thread-safe index of live connections: by connection id, by user id
//! and by group id (both many-to-many). Reads dominate: broadcasts
//! iterate while registrations trickle, so each index is a `DashMap`
//! and callers never take an external lock.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{Connection, ConnectionId};

#[derive(Default)]
pub struct Registry {
    by_id: DashMap<ConnectionId, Arc<Connection>>,
    by_user: DashMap<String, HashSet<ConnectionId>>,
    by_group: DashMap<String, HashSet<ConnectionId>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("connections", &self.by_id.len()).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<Connection>) {
        self.by_user
            .entry(conn.user_id().to_string())
            .or_default()
            .insert(conn.id());
        self.by_group
            .entry(conn.group_id().to_string())
            .or_default()
            .insert(conn.id());
        self.by_id.insert(conn.id(), conn);
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, conn) = self.by_id.remove(&id)?;
        prune(&self.by_user, conn.user_id(), id);
        prune(&self.by_group, conn.group_id(), id);
        Some(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.by_id.get(&id).map(|entry| Arc::clone(&entry))
    }

    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Whether any connection still references the group.
    pub fn group_in_use(&self, group_id: &str) -> bool {
        self.by_group
            .get(group_id)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot every connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.by_id.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Snapshot the connections of one user.
    pub fn for_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.collect_ids(self.by_user.get(user_id).map(|ids| ids.clone()))
    }

    /// Snapshot the connections of one group.
    pub fn for_group(&self, group_id: &str) -> Vec<Arc<Connection>> {
        self.collect_ids(self.by_group.get(group_id).map(|ids| ids.clone()))
    }

    /// Snapshot the connections matching a predicate.
    pub fn filter(&self, predicate: impl Fn(&Connection) -> bool) -> Vec<Arc<Connection>> {
        self.by_id
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn collect_ids(&self, ids: Option<HashSet<ConnectionId>>) -> Vec<Arc<Connection>> {
        let Some(ids) = ids else { return Vec::new() };
        let mut ids: Vec<ConnectionId> = ids.into_iter().collect();
        // Deterministic iteration order for broadcasts and tests.
        ids.sort();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }
}

fn prune(index: &DashMap<String, HashSet<ConnectionId>>, key: &str, id: ConnectionId) {
    if let Some(mut ids) = index.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            drop(ids);
            index.remove_if(key, |_, ids| ids.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundMessage;
    use crate::store::Stores;
    use lt_template::Template;
    use lt_tree::Renderer;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn conn(user: &str, group: &str) -> (Arc<Connection>, mpsc::Receiver<OutboundMessage>) {
        let template = Template::parse("t", "{{.X}}").unwrap();
        let (tx, rx) = mpsc::channel(8);
        let conn = Connection::new(
            ConnectionId::next(),
            user.to_string(),
            group.to_string(),
            Renderer::mount(&template),
            Arc::new(Mutex::new(Stores::new())),
            tx,
        );
        (Arc::new(conn), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        let (a, _rx_a) = conn("ada", "g1");
        let (b, _rx_b) = conn("ada", "g2");
        let (c, _rx_c) = conn("bob", "g1");
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        registry.register(Arc::clone(&c));

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.for_user("ada").len(), 2);
        assert_eq!(registry.for_group("g1").len(), 2);
        assert!(registry.get(a.id()).is_some());
    }

    #[test]
    fn test_unregister_prunes_indexes() {
        let registry = Registry::new();
        let (a, _rx) = conn("ada", "g1");
        registry.register(Arc::clone(&a));
        assert!(registry.group_in_use("g1"));

        registry.unregister(a.id());
        assert_eq!(registry.count(), 0);
        assert!(registry.for_user("ada").is_empty());
        assert!(!registry.group_in_use("g1"));
    }

    #[test]
    fn test_filter_predicate() {
        let registry = Registry::new();
        let (a, _rx_a) = conn("ada", "g1");
        let (b, _rx_b) = conn("bob", "g1");
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        let admins = registry.filter(|c| c.user_id() == "ada");
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].id(), a.id());
    }
}
