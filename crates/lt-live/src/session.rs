//! # Session Store
//!
//! Maps group identity to its shared `Stores`, stamped with a
//! last-access time on every read and write. A single janitor task wakes
//! every cleanup interval and evicts groups idle past the TTL; shutdown
//! drains it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::{SharedStores, Stores, StoresFactory};

struct SessionEntry {
    stores: SharedStores,
    last_access: Instant,
}

#[derive(Default)]
pub struct SessionStore {
    groups: DashMap<String, SessionEntry>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("groups", &self.groups.len()).finish()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a group's stores, refreshing its last-access stamp.
    pub fn get(&self, group_id: &str) -> Option<SharedStores> {
        self.groups.get_mut(group_id).map(|mut entry| {
            entry.last_access = Instant::now();
            Arc::clone(&entry.stores)
        })
    }

    /// Fetch or create a group. Returns the stores and whether they were
    /// just created; the caller runs `init` exactly once on creation.
    pub fn get_or_create(&self, group_id: &str, factory: &StoresFactory) -> (SharedStores, bool) {
        let mut created = false;
        let entry = self.groups.entry(group_id.to_string()).or_insert_with(|| {
            created = true;
            let mut stores = factory();
            stores.init_all();
            SessionEntry {
                stores: Arc::new(std::sync::Mutex::new(stores)),
                last_access: Instant::now(),
            }
        });
        let stores = Arc::clone(&entry.stores);
        drop(entry);
        if !created {
            if let Some(mut entry) = self.groups.get_mut(group_id) {
                entry.last_access = Instant::now();
            }
        }
        (stores, created)
    }

    /// Install stores for a group explicitly.
    pub fn set(&self, group_id: impl Into<String>, stores: Stores) {
        self.groups.insert(
            group_id.into(),
            SessionEntry {
                stores: Arc::new(std::sync::Mutex::new(stores)),
                last_access: Instant::now(),
            },
        );
    }

    pub fn remove(&self, group_id: &str) -> bool {
        self.groups.remove(group_id).is_some()
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Evict groups idle past `ttl`, keeping any the filter protects
    /// (groups with live connections). Returns the evicted ids.
    pub fn sweep(&self, ttl: Duration, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .groups
            .iter()
            .filter(|entry| {
                now.duration_since(entry.value().last_access) >= ttl && !keep(entry.key())
            })
            .map(|entry| entry.key().clone())
            .collect();
        let mut evicted = Vec::new();
        for group_id in stale {
            // Re-check under the removal: an access may have refreshed it.
            let removed = self
                .groups
                .remove_if(&group_id, |_, entry| now.duration_since(entry.last_access) >= ttl);
            if removed.is_some() {
                evicted.push(group_id);
            }
        }
        evicted
    }
}

/// Handle to the background janitor; dropping without `shutdown` aborts.
pub struct Janitor {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor").finish()
    }
}

impl Janitor {
    /// Spawn the eviction loop.
    pub fn spawn(
        sessions: Arc<SessionStore>,
        ttl: Duration,
        interval: Duration,
        keep: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = sessions.sweep(ttl, &keep);
                        if !evicted.is_empty() {
                            tracing::info!("evicted {} idle session group(s)", evicted.len());
                        }
                    }
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { stop, task }
    }

    /// Stop the janitor and wait for it to drain.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn factory() -> StoresFactory {
        Arc::new(Stores::new)
    }

    #[test]
    fn test_get_or_create_inits_once() {
        let sessions = SessionStore::new();
        let factory = factory();
        let (_, created) = sessions.get_or_create("g1", &factory);
        assert!(created);
        let (_, created) = sessions.get_or_create("g1", &factory);
        assert!(!created);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_get_missing_group() {
        let sessions = SessionStore::new();
        assert!(sessions.get("ghost").is_none());
    }

    #[test]
    fn test_list_sorted() {
        let sessions = SessionStore::new();
        let factory = factory();
        sessions.get_or_create("b", &factory);
        sessions.get_or_create("a", &factory);
        assert_eq!(sessions.list(), vec!["a", "b"]);
    }

    #[test]
    fn test_sweep_evicts_idle_only() {
        let sessions = SessionStore::new();
        let factory = factory();
        sessions.get_or_create("idle", &factory);
        sessions.get_or_create("busy", &factory);

        // Zero TTL makes everything stale; the keep filter protects
        // groups that still have connections.
        let evicted = sessions.sweep(Duration::ZERO, |group| group == "busy");
        assert_eq!(evicted, vec!["idle"]);
        assert!(sessions.contains("busy"));
        assert!(!sessions.contains("idle"));
    }

    #[test]
    fn test_access_refreshes_ttl() {
        let sessions = SessionStore::new();
        let factory = factory();
        sessions.get_or_create("g", &factory);
        sessions.get("g");
        let evicted = sessions.sweep(Duration::from_secs(60), |_| false);
        assert!(evicted.is_empty());
    }

    #[tokio::test]
    async fn test_janitor_shutdown_drains() {
        let sessions = Arc::new(SessionStore::new());
        let janitor = Janitor::spawn(
            Arc::clone(&sessions),
            Duration::from_secs(60),
            Duration::from_millis(10),
            |_| false,
        );
        janitor.shutdown().await;
    }
}
