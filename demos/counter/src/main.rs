//! Live counter demo: one template, one unnamed store, served on
//! localhost. Connect a WebSocket to `/live` and send
//! `{"action": "increment"}` to watch minimal updates flow.

use anyhow::Result;
use lt_live::{ActionContext, FieldErrors, LiveConfig, LiveHandler, Store, Stores};
use lt_template::Template;
use serde_json::{json, Value};
use std::net::SocketAddr;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const TEMPLATE: &str = r#"<div style="color: {{.Color}}">
  <h1>Hello {{.Counter}} World</h1>
  {{if .History}}<ul>{{range .History}}<li data-key="{{.ID}}">{{.Label}}</li>{{end}}</ul>{{else}}<p>no history yet</p>{{end}}
</div>"#;

const PALETTE: &[&str] = &["#ff6b6b", "#4ecdc4", "#ffe66d", "#1a535c"];

struct Counter {
    count: i64,
    history: Vec<(i64, String)>,
}

impl Counter {
    fn new() -> Self {
        Self { count: 0, history: Vec::new() }
    }
}

impl Store for Counter {
    fn change(&mut self, ctx: &ActionContext) -> Result<(), FieldErrors> {
        match ctx.action() {
            "increment" => {
                self.count += ctx.int("by").unwrap_or(1);
                self.history.push((self.count, format!("reached {}", self.count)));
                Ok(())
            }
            "reset" => {
                self.count = 0;
                self.history.clear();
                Ok(())
            }
            other => Err(FieldErrors::single("action", format!("unknown action {:?}", other))),
        }
    }

    fn state(&self) -> Value {
        json!({
            "Counter": self.count,
            "Color": PALETTE[(self.count.unsigned_abs() as usize) % PALETTE.len()],
            "History": self.history
                .iter()
                .map(|(id, label)| json!({"ID": id.to_string(), "Label": label}))
                .collect::<Vec<_>>(),
        })
    }

    fn replace(&mut self, state: Value) {
        if let Some(count) = state.get("Counter").and_then(Value::as_i64) {
            self.count = count;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter_demo=debug,lt_live=debug,tower_http=info".into()),
        )
        .init();

    let template = Template::parse("counter", TEMPLATE)?;
    let handler = LiveHandler::with_config(
        template,
        || Stores::new().unnamed(Counter::new()),
        LiveConfig::default(),
    );

    let addr: SocketAddr = "127.0.0.1:3000".parse()?;
    tracing::info!("counter demo listening on http://{}", addr);
    tracing::info!("ws endpoint: ws://{}/live", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, handler.router()).await?;
    Ok(())
}
