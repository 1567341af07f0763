//! # lt-live: The Live Session Runtime
//!
//! Keeps server-rendered templates mounted in browsers over persistent
//! connections and pushes minimal tree deltas as state changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ lt-template  │  compile once at startup
//! └──────┬───────┘
//!        ↓ mount (clone per connection)
//! ┌──────────────┐   actions    ┌──────────────┐
//! │  Connection  │ ───────────→ │    Stores    │  shared per group
//! └──────┬───────┘              └──────┬───────┘
//!        ↓ render + diff (lt-tree)     │ TTL janitor (session store)
//! ┌──────────────┐                     ↓
//! │  UpdateNode  │ → WebSocket   eviction after idle TTL
//! └──────────────┘
//! ```
//!
//! `LiveHandler` is the composition root: it owns the registry, session
//! store and configuration, exposes the axum router, and provides the
//! broadcast primitives (all connections, by user, by group).

pub mod action;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;

pub use action::{ActionContext, FieldError, FieldErrorList, FieldErrors};
pub use config::LiveConfig;
pub use connection::{Connection, ConnectionId};
pub use error::LiveError;
pub use handler::{Identity, LiveHandler};
pub use protocol::{ActionMessage, ErrorMessage, OutboundMessage};
pub use registry::Registry;
pub use session::{Janitor, SessionStore};
pub use store::{SharedStores, Store, Stores, StoresFactory};
