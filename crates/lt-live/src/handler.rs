//! # Live Handler
//!
//! Composes the compiler, generator, differ, stores, registry and
//! session store behind the external request/stream surface.
//!
//! ```text
//! GET /        one-shot render, plain HTML
//! GET /live    WebSocket upgrade → mount, then the serve loop
//! ```
//!
//! Mount clones the template, resolves the group's stores (running
//! `init` once on creation), sends the full tree and registers with the
//! registry. The serve loop reads action messages, dispatches to stores
//! under the group lock, re-renders, diffs against the connection's last
//! tree and pushes the update. Broadcasts fan the same
//! read-diff-update-send window out across the registry, one worker per
//! connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lt_template::Template;
use lt_tree::{FuncRegistry, Renderer, UpdateNode};

use crate::action::{split_action, ActionContext};
use crate::config::LiveConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::LiveError;
use crate::protocol::{ActionMessage, OutboundMessage};
use crate::registry::Registry;
use crate::session::{Janitor, SessionStore};
use crate::store::{Stores, StoresFactory};

/// The engine's public face: cheap to clone, internally synchronized.
#[derive(Clone)]
pub struct LiveHandler {
    shared: Arc<LiveShared>,
}

struct LiveShared {
    template: Template,
    registry: Registry,
    sessions: Arc<SessionStore>,
    factory: StoresFactory,
    /// Pipeline function table; behind a lock so it can be replaced
    /// after the handler has been cloned. Connections snapshot it at
    /// mount time.
    funcs: Mutex<FuncRegistry>,
    config: LiveConfig,
    janitor: Mutex<Option<Janitor>>,
    janitor_started: AtomicBool,
}

/// Caller-supplied identity, opaque to the engine.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub group_id: Option<String>,
}

impl Identity {
    /// Resolve identity from headers, falling back to query parameters.
    fn resolve(headers: &HeaderMap, params: &HashMap<String, String>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let user_id = header("x-lt-user")
            .or_else(|| params.get("user").cloned())
            .unwrap_or_else(|| "anonymous".to_string());
        let group_id = header("x-lt-group").or_else(|| params.get("group").cloned());
        Self { user_id, group_id }
    }
}

impl LiveHandler {
    pub fn new(template: Template, factory: impl Fn() -> Stores + Send + Sync + 'static) -> Self {
        Self::with_config(template, factory, LiveConfig::default())
    }

    pub fn with_config(
        template: Template,
        factory: impl Fn() -> Stores + Send + Sync + 'static,
        config: LiveConfig,
    ) -> Self {
        Self {
            shared: Arc::new(LiveShared {
                template,
                registry: Registry::new(),
                sessions: Arc::new(SessionStore::new()),
                factory: Arc::new(factory),
                funcs: Mutex::new(FuncRegistry::default()),
                config,
                janitor: Mutex::new(None),
                janitor_started: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the pipeline function table (builtins included by
    /// default). Takes effect for connections mounted afterwards, on
    /// every clone of this handler; existing mounts keep the table they
    /// snapshot at mount time.
    pub fn with_funcs(self, funcs: FuncRegistry) -> Self {
        *self.shared.funcs.lock().expect("funcs lock") = funcs;
        self
    }

    fn funcs(&self) -> FuncRegistry {
        self.shared.funcs.lock().expect("funcs lock").clone()
    }

    pub fn config(&self) -> &LiveConfig {
        &self.shared.config
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.count()
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// The axum router exposing the one-shot and live endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(page))
            .route("/live", get(live))
            .with_state(self.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Stop the background janitor and wait for it to drain.
    pub async fn shutdown(&self) {
        let janitor = self.shared.janitor.lock().expect("janitor lock").take();
        if let Some(janitor) = janitor {
            janitor.shutdown().await;
        }
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    /// Push `state` to every live connection. Succeeds once every
    /// connection has been enqueued; individual failures are logged.
    pub async fn broadcast(&self, state: Value) -> Result<(), LiveError> {
        let targets = self.shared.registry.all();
        self.broadcast_targets(targets, state).await
    }

    /// Push `state` to every connection of the given users.
    pub async fn broadcast_to_users(
        &self,
        user_ids: &[String],
        state: Value,
    ) -> Result<(), LiveError> {
        if user_ids.is_empty() {
            return Err(LiveError::InvalidArgument("empty user list".into()));
        }
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for user_id in user_ids {
            for conn in self.shared.registry.for_user(user_id) {
                if seen.insert(conn.id()) {
                    targets.push(conn);
                }
            }
        }
        self.broadcast_targets(targets, state).await
    }

    /// Push `state` to every connection of one group.
    pub async fn broadcast_to_group(
        &self,
        group_id: &str,
        state: Value,
    ) -> Result<(), LiveError> {
        if group_id.is_empty() {
            return Err(LiveError::InvalidArgument("empty group id".into()));
        }
        let targets = self.shared.registry.for_group(group_id);
        self.broadcast_targets(targets, state).await
    }

    async fn broadcast_targets(
        &self,
        targets: Vec<Arc<Connection>>,
        state: Value,
    ) -> Result<(), LiveError> {
        // Adopt the state once per distinct group, under that group's
        // lock, before any rendering.
        let mut groups = HashSet::new();
        for conn in &targets {
            if groups.insert(conn.group_id().to_string()) {
                conn.stores().lock().expect("stores lock").replace_state(&state);
                self.shared.sessions.get(conn.group_id());
            }
        }

        // One worker per connection: a slow recipient delays only
        // itself. Enqueueing never blocks; the join is CPU-bound.
        let mut workers = JoinSet::new();
        for conn in targets {
            workers.spawn(async move {
                let state = conn.snapshot_state();
                if let Err(err) = conn.render_and_push(&state) {
                    tracing::warn!(connection = %conn.id(), "broadcast render failed: {}", err);
                }
            });
        }
        while workers.join_next().await.is_some() {}
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mount & serve
    // ------------------------------------------------------------------

    fn ensure_janitor(&self) {
        if self.shared.janitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let janitor = Janitor::spawn(
            Arc::clone(&self.shared.sessions),
            self.shared.config.session_ttl,
            self.shared.config.cleanup_interval,
            move |group_id| {
                shared
                    .upgrade()
                    .map(|shared| shared.registry.group_in_use(group_id))
                    .unwrap_or(false)
            },
        );
        *self.shared.janitor.lock().expect("janitor lock") = Some(janitor);
    }

    /// Create and register a connection, run the initial render and
    /// enqueue the full tree.
    fn mount_connection(
        &self,
        identity: Identity,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<OutboundMessage>), LiveError> {
        let id = ConnectionId::next();
        let group_id = identity.group_id.unwrap_or_else(|| format!("solo-{}", id));
        let (stores, created) = self
            .shared
            .sessions
            .get_or_create(&group_id, &self.shared.factory);
        if created {
            tracing::debug!(group = %group_id, "session group created");
        }

        let renderer =
            Renderer::mount(&self.shared.template).with_funcs(self.funcs());
        let (tx, rx) = mpsc::channel(self.shared.config.outbound_queue_depth);
        let mut conn = Connection::new(id, identity.user_id, group_id, renderer, stores, tx);
        if self.shared.config.dev_mode {
            conn = conn.with_dev_tag(self.shared.template.name());
        }
        let conn = Arc::new(conn);

        let state = conn.snapshot_state();
        let mut update = conn.render_initial(&state)?;
        if self.shared.config.loading_indicator {
            inject_loading_marker(&mut update);
        }
        conn.enqueue(self.outbound(&update));
        self.shared.registry.register(Arc::clone(&conn));
        tracing::info!(connection = %conn.id(), user = %conn.user_id(), group = %conn.group_id(), "mounted");
        Ok((conn, rx))
    }

    /// Handle one inbound action message: dispatch, re-render, push.
    /// Returns `false` when the connection must close.
    fn process_action(&self, conn: &Arc<Connection>, text: &str) -> bool {
        let message = match ActionMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                conn.enqueue(OutboundMessage::error(&err));
                return true;
            }
        };

        // Touching the session refreshes its TTL stamp; a missing group
        // was evicted while this connection was idle.
        if self.shared.sessions.get(conn.group_id()).is_none() {
            conn.enqueue(OutboundMessage::error(&LiveError::SessionExpired));
            return false;
        }

        let (store_name, action) = split_action(&message.action);
        let ctx = ActionContext::new(action, message.data);
        let result = {
            let mut stores = conn.stores().lock().expect("stores lock");
            stores.dispatch(store_name, &ctx)
        };

        match result {
            Ok(()) => {
                let state = conn.snapshot_state();
                match conn.render_and_push(&state) {
                    Ok(_) => {}
                    Err(err) => {
                        // The previous tree stays intact; the client
                        // keeps its last consistent view.
                        tracing::warn!(connection = %conn.id(), "render failed: {}", err);
                        conn.enqueue(OutboundMessage::error(&err));
                    }
                }
            }
            Err(err) => {
                conn.enqueue(OutboundMessage::error(&err));
            }
        }
        true
    }

    fn outbound(&self, update: &UpdateNode) -> OutboundMessage {
        if !self.shared.config.dev_mode {
            return OutboundMessage::update(update);
        }
        // Dev mode: attach readable context alongside the tree.
        let mut value = serde_json::to_value(update).expect("update trees always serialize");
        if let Value::Object(map) = &mut value {
            map.insert(
                "_dev".to_string(),
                serde_json::json!({ "template": self.shared.template.name() }),
            );
        }
        OutboundMessage::raw(value.to_string())
    }

    /// Own a socket for its whole life: mount, serve, teardown.
    async fn run_connection(self, socket: WebSocket, identity: Identity) {
        self.ensure_janitor();
        let (conn, mut outbound) = match self.mount_connection(identity) {
            Ok(mounted) => mounted,
            Err(err) => {
                tracing::warn!("mount failed: {}", err);
                return;
            }
        };

        let mut socket = socket;
        let send_timeout = self.shared.config.send_timeout;
        loop {
            tokio::select! {
                inbound = socket.recv() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if !self.process_action(&conn, &text) {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {} // ping/pong/binary: ignored
                        Some(Err(err)) => {
                            tracing::debug!(connection = %conn.id(), "socket error: {}", err);
                            break;
                        }
                    }
                }
                queued = outbound.recv() => {
                    let Some(message) = queued else { break };
                    let send = socket.send(Message::Text(message.text));
                    match tokio::time::timeout(send_timeout, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::debug!(connection = %conn.id(), "send failed: {}", err);
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(connection = %conn.id(), "send deadline exceeded; closing");
                            break;
                        }
                    }
                }
            }
        }

        self.shared.registry.unregister(conn.id());
        tracing::info!(connection = %conn.id(), "unmounted");
    }

    /// One-shot render for plain HTTP paths: fresh stores, full HTML.
    fn render_page(&self) -> Result<String, LiveError> {
        let mut stores = (self.shared.factory)();
        stores.init_all();
        let renderer =
            Renderer::mount(&self.shared.template).with_funcs(self.funcs());
        let tree = renderer.render(&stores.state())?;
        let mut html = tree.to_html();
        if self.shared.config.loading_indicator {
            html = inject_loading_marker_html(&html);
        }
        Ok(html)
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

async fn page(State(handler): State<LiveHandler>) -> Response {
    match handler.render_page() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!("one-shot render failed: {}", err);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response()
        }
    }
}

async fn live(
    State(handler): State<LiveHandler>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let identity = Identity::resolve(&headers, &params);
    ws.on_upgrade(move |socket| handler.run_connection(socket, identity))
}

// ============================================================================
// LOADING INDICATOR
// ============================================================================

/// Mark the first render's outer wrapper; the client patcher strips the
/// attribute after initial synchronization. Only the serialized payload
/// is marked; the retained diff base stays clean.
fn inject_loading_marker(update: &mut UpdateNode) {
    if let Some(statics) = &mut update.statics {
        if let Some(first) = statics.first_mut() {
            *first = inject_loading_marker_html(first);
        }
    }
}

fn inject_loading_marker_html(html: &str) -> String {
    let Some(open) = html.find('<') else { return html.to_string() };
    match html[open..].find('>').map(|i| open + i) {
        Some(mut close) => {
            if html[..close].ends_with('/') {
                close -= 1;
            }
            let mut out = String::with_capacity(html.len() + 24);
            out.push_str(&html[..close]);
            out.push_str(" data-lt-loading=\"true\"");
            out.push_str(&html[close..]);
            out
        }
        None => html.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FieldErrors;
    use crate::store::Store;
    use serde_json::json;
    use std::time::Duration;

    struct Counter {
        n: i64,
    }

    impl Store for Counter {
        fn change(&mut self, ctx: &ActionContext) -> Result<(), FieldErrors> {
            if ctx.action() == "increment" {
                self.n += ctx.int("by").unwrap_or(1);
            }
            Ok(())
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

    fn handler() -> LiveHandler {
        let template =
            Template::parse("counter", "<div>Count: {{.Counter}}</div>").unwrap();
        LiveHandler::with_config(
            template,
            || Stores::new().unnamed(Counter { n: 0 }),
            LiveConfig::default().loading_indicator(false),
        )
    }

    fn identity(user: &str, group: &str) -> Identity {
        Identity { user_id: user.into(), group_id: Some(group.into()) }
    }

    #[tokio::test]
    async fn test_mount_sends_full_tree() {
        let handler = handler();
        let (_conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, r#"{"s":["<div>Count: ","</div>"],"0":"0"}"#);
        assert_eq!(handler.connection_count(), 1);
        assert_eq!(handler.session_count(), 1);
    }

    #[tokio::test]
    async fn test_loading_indicator_marks_first_render_only() {
        let template = Template::parse("t", "<div>{{.Counter}}</div>").unwrap();
        let handler = LiveHandler::new(template, || Stores::new().unnamed(Counter { n: 0 }));
        let (conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        let first = rx.recv().await.unwrap();
        assert!(first.text.contains(r#"data-lt-loading="true""#));

        assert!(handler.process_action(&conn, r#"{"action": "increment"}"#));
        let second = rx.recv().await.unwrap();
        assert!(!second.text.contains("data-lt-loading"));
    }

    #[tokio::test]
    async fn test_action_dispatch_pushes_diff() {
        let handler = handler();
        let (conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        rx.recv().await.unwrap();

        assert!(handler.process_action(&conn, r#"{"action": "increment", "data": {"by": 2}}"#));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.text, r#"{"0":"2"}"#);
    }

    #[tokio::test]
    async fn test_unknown_store_error_keeps_connection() {
        let handler = handler();
        let (conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        rx.recv().await.unwrap();

        assert!(handler.process_action(&conn, r#"{"action": "ghost.increment"}"#));
        let err = rx.recv().await.unwrap();
        assert_eq!(err.text, r#"{"error":"UnknownStore"}"#);
        assert_eq!(handler.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_group_state() {
        let handler = handler();
        let (a, mut rx_a) = handler.mount_connection(identity("ada", "shared")).unwrap();
        let (_b, mut rx_b) = handler.mount_connection(identity("bob", "shared")).unwrap();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        // ada's action mutates the group; only ada's connection pushes
        // (bob re-renders on broadcast or his own next action).
        assert!(handler.process_action(&a, r#"{"action": "increment"}"#));
        assert_eq!(rx_a.recv().await.unwrap().text, r#"{"0":"1"}"#);
        assert_eq!(a.snapshot_state(), json!({"Counter": 1}));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_in_order() {
        let handler = handler();
        let (one, mut rx1) = handler.mount_connection(identity("ada", "room")).unwrap();
        let (_two, mut rx2) = handler.mount_connection(identity("bob", "room")).unwrap();
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();

        handler.broadcast(json!({"Counter": 10})).await.unwrap();
        // A local action follows the broadcast on connection one.
        assert!(handler.process_action(&one, r#"{"action": "increment"}"#));

        // Connection one observes broadcast then local update, in order.
        assert_eq!(rx1.recv().await.unwrap().text, r#"{"0":"10"}"#);
        assert_eq!(rx1.recv().await.unwrap().text, r#"{"0":"11"}"#);
        // Connection two observes the broadcast.
        assert_eq!(rx2.recv().await.unwrap().text, r#"{"0":"10"}"#);
    }

    #[tokio::test]
    async fn test_broadcast_to_users_filters() {
        let handler = handler();
        let (_a, mut rx_a) = handler.mount_connection(identity("ada", "g1")).unwrap();
        let (_b, mut rx_b) = handler.mount_connection(identity("bob", "g2")).unwrap();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        handler
            .broadcast_to_users(&["ada".to_string()], json!({"Counter": 5}))
            .await
            .unwrap();
        assert_eq!(rx_a.recv().await.unwrap().text, r#"{"0":"5"}"#);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_empty_targets_invalid() {
        let handler = handler();
        let err = handler.broadcast_to_users(&[], json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        let err = handler.broadcast_to_group("", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[tokio::test]
    async fn test_evicted_session_closes_connection() {
        let handler = handler();
        let (conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        rx.recv().await.unwrap();

        handler.shared.sessions.remove("g1");
        assert!(!handler.process_action(&conn, r#"{"action": "increment"}"#));
        assert_eq!(rx.recv().await.unwrap().text, r#"{"error":"SessionExpired"}"#);
    }

    #[tokio::test]
    async fn test_janitor_keeps_live_groups() {
        let template = Template::parse("t", "{{.Counter}}").unwrap();
        let handler = LiveHandler::with_config(
            template,
            || Stores::new().unnamed(Counter { n: 0 }),
            LiveConfig::default()
                .session_ttl(Duration::ZERO)
                .loading_indicator(false),
        );
        let (_conn, _rx) = handler.mount_connection(identity("ada", "live-group")).unwrap();
        let evicted = handler
            .shared
            .sessions
            .sweep(Duration::ZERO, |group| handler.shared.registry.group_in_use(group));
        assert!(evicted.is_empty());
        assert!(handler.shared.sessions.contains("live-group"));
    }

    #[tokio::test]
    async fn test_dev_mode_attaches_diagnostics() {
        let template = Template::parse("t", "<i>{{.Counter}}</i>").unwrap();
        let handler = LiveHandler::with_config(
            template,
            || Stores::new().unnamed(Counter { n: 0 }),
            LiveConfig::default().dev_mode(true).loading_indicator(false),
        );
        let (conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        let first = rx.recv().await.unwrap();
        assert!(first.text.contains("_dev"));
        assert!(handler.process_action(&conn, r#"{"action": "increment"}"#));
        let update = rx.recv().await.unwrap();
        assert!(update.text.contains("_dev"));
        assert!(update.text.contains(r#""0":"1""#));
    }

    #[tokio::test]
    async fn test_with_funcs_after_clone() {
        let template = Template::parse("t", "<b>{{.Counter | double}}</b>").unwrap();
        let handler = LiveHandler::with_config(
            template,
            || Stores::new().unnamed(Counter { n: 3 }),
            LiveConfig::default().loading_indicator(false),
        );

        // Clone first (e.g. for a second router), then install the
        // table: both handles must see it, without panicking.
        let earlier_clone = handler.clone();

        let mut funcs = FuncRegistry::default();
        funcs.register("double", |args| {
            let n = args.last().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::from(n * 2))
        });
        let handler = handler.with_funcs(funcs);

        let (_conn, mut rx) = handler.mount_connection(identity("ada", "g1")).unwrap();
        assert_eq!(rx.recv().await.unwrap().text, r#"{"s":["<b>","</b>"],"0":"6"}"#);

        // The clone taken before with_funcs shares the same table.
        let (_conn, mut rx) = earlier_clone.mount_connection(identity("bob", "g2")).unwrap();
        assert_eq!(rx.recv().await.unwrap().text, r#"{"s":["<b>","</b>"],"0":"6"}"#);
    }

    #[test]
    fn test_inject_loading_marker_html() {
        assert_eq!(
            inject_loading_marker_html("<div class=\"x\">hi</div>"),
            "<div class=\"x\" data-lt-loading=\"true\">hi</div>"
        );
        assert_eq!(inject_loading_marker_html("no tags"), "no tags");
        assert_eq!(
            inject_loading_marker_html("<br/>"),
            "<br data-lt-loading=\"true\"/>"
        );
    }

    #[test]
    fn test_one_shot_page_render() {
        let handler = handler();
        let html = handler.render_page().unwrap();
        assert_eq!(html, "<div>Count: 0</div>");
    }
}
