//! # Connection - One Live Client Link
//!
//! A connection owns its template mount, the last tree it was sent, and
//! a bounded outbound queue drained by a writer task. The
//! read-diff-update-send window runs under the connection's own lock so
//! its handler task and broadcast workers never interleave mid-update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lt_tree::{Renderer, TreeNode, UpdateNode};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::LiveError;
use crate::protocol::OutboundMessage;
use crate::store::SharedStores;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct Connection {
    id: ConnectionId,
    user_id: String,
    group_id: String,
    renderer: Renderer,
    stores: SharedStores,
    /// The tree most recently enqueued to this client, the diff base for
    /// the next update.
    last_tree: Mutex<Option<TreeNode>>,
    outbound: mpsc::Sender<OutboundMessage>,
    /// Template name to attach to payloads in dev mode; `None` outside it.
    dev_tag: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("group_id", &self.group_id)
            .finish()
    }
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user_id: String,
        group_id: String,
        renderer: Renderer,
        stores: SharedStores,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            id,
            user_id,
            group_id,
            renderer,
            stores,
            last_tree: Mutex::new(None),
            outbound,
            dev_tag: None,
        }
    }

    pub fn with_dev_tag(mut self, tag: impl Into<String>) -> Self {
        self.dev_tag = Some(tag.into());
        self
    }

    /// First render: transmit the full tree and retain it as the diff
    /// base. The caller serializes (and may decorate) the update.
    pub fn render_initial(&self, state: &Value) -> Result<UpdateNode, LiveError> {
        let tree = self.renderer.render(state)?;
        let update = lt_tree::diff(None, &tree);
        *self.last_tree.lock().expect("last-tree lock") = Some(tree);
        Ok(update)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn stores(&self) -> &SharedStores {
        &self.stores
    }

    /// Snapshot the group state under the store lock, released before
    /// any rendering or I/O.
    pub fn snapshot_state(&self) -> Value {
        self.stores.lock().expect("stores lock").state()
    }

    /// Render against `state`, diff against the last sent tree, retain
    /// the new tree and enqueue the update. Returns the update that was
    /// enqueued, or `None` when nothing changed.
    pub fn render_and_push(&self, state: &Value) -> Result<Option<UpdateNode>, LiveError> {
        let tree = self.renderer.render(state)?;
        let mut last = self.last_tree.lock().expect("last-tree lock");
        let mut report = lt_tree::DiffReport::default();
        let update = lt_tree::diff_with(last.as_ref(), &tree, &mut report);
        for diagnostic in &report.diagnostics {
            tracing::warn!(connection = %self.id, "diff diagnostic: {}", diagnostic);
        }
        if last.is_some() && update.is_empty() {
            *last = Some(tree);
            return Ok(None);
        }
        *last = Some(tree);
        drop(last);
        let message = match &self.dev_tag {
            None => OutboundMessage::update(&update),
            Some(tag) => OutboundMessage::dev_update(&update, tag, &report.diagnostics),
        };
        self.enqueue(message);
        Ok(Some(update))
    }

    /// Enqueue a wire message without blocking. A full queue means the
    /// client is too slow; the message is dropped and logged, and the
    /// writer's send deadline decides the connection's fate.
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(connection = %self.id, "outbound queue rejected message: {}", err);
                false
            }
        }
    }
}
