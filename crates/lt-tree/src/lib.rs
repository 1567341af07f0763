//! # lt-tree: Tree Generation and Minimal Diffing
//!
//! The runtime half of the template engine. A compiled template
//! (lt-template) executes against application state to produce a
//! `TreeNode`; diffing two consecutive trees yields the minimal
//! `UpdateNode` the client needs to patch its DOM.
//!
//! ```text
//! ┌──────────────┐
//! │   Template   │  compiled once, shared
//! └──────┬───────┘
//!        ↓ mount (per connection)
//! ┌──────────────┐       state        ┌──────────────┐
//! │   Renderer   │ ─────────────────→ │   TreeNode   │
//! └──────────────┘                    └──────┬───────┘
//!                         previous tree      ↓ diff
//!                                     ┌──────────────┐
//!                                     │  UpdateNode  │ → JSON wire
//!                                     └──────────────┘
//! ```
//!
//! Statics travel once; later updates carry only changed slot values and
//! granular range operations keyed by item identity.

pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod funcs;
pub mod generate;
pub mod node;
pub mod patch;
pub mod value;

pub use diff::{diff, diff_with};
pub use error::{DiffReport, RenderError};
pub use funcs::FuncRegistry;
pub use generate::Renderer;
pub use node::{
    RangeItem, RangeOp, RangeTree, SlotValue, TreeNode, UpdateItem, UpdateNode, UpdateSlot,
};
pub use value::ValueAccess;
