//! # lt-template: The Template Compiler
//!
//! Compiles the live template dialect into a flattened static/dynamic
//! tree that the runtime renders and diffs.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐
//! │   Source     │  {{ .Field }}, if/else, range, with, define/template
//! └──────┬───────┘
//!        ↓ lex        split text from {{ … }} actions, resolve trims
//! ┌──────────────┐
//! │  Item stream │
//! └──────┬───────┘
//!        ↓ parse      action grammar + block structure
//! ┌──────────────┐
//! │  SourceTree  │
//! └──────┬───────┘
//!        ↓ walk       inline sub-templates, normalize whitespace
//!        ↓ keys       assign compile-time slot keys per region
//! ┌──────────────┐
//! │   Template   │  immutable, Arc-shared, cloned per mount
//! └──────────────┘
//! ```
//!
//! A `Template` is immutable after compilation. Mounting a connection
//! clones the handle (cheap, the walked tree is behind an `Arc`); all
//! per-render state lives in the renderer, never in the template.

pub mod ast;
pub mod error;
pub mod keys;
pub mod lex;
pub mod parse;
pub mod walk;

use std::sync::Arc;

use crate::ast::Node;
pub use crate::error::TemplateError;

/// Compile-time options.
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Field consulted on each loop item for its stable identity. Items
    /// missing the field (or colliding on it) make the range unkeyed.
    pub key_field: String,
    /// Collapse whitespace between structural markers. On by default;
    /// turning it off preserves source text byte-for-byte.
    pub collapse_whitespace: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            key_field: "ID".to_string(),
            collapse_whitespace: true,
        }
    }
}

/// A compiled template: the walked parse tree, its slot-key table, and
/// the source identity hash.
#[derive(Debug, Clone)]
pub struct Template {
    inner: Arc<TemplateInner>,
}

#[derive(Debug)]
struct TemplateInner {
    name: String,
    roots: Vec<Node>,
    options: TemplateOptions,
    /// Number of dynamic slots in the top-level region.
    root_slots: u32,
    /// Blake3 hash of the source, the template's cache identity.
    source_hash: String,
}

impl Template {
    /// Compile template source with default options.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        Self::parse_with(name, source, TemplateOptions::default())
    }

    /// Compile template source with explicit options.
    pub fn parse_with(
        name: impl Into<String>,
        source: &str,
        options: TemplateOptions,
    ) -> Result<Self, TemplateError> {
        let tree = parse::parse(source)?;
        let mut roots = walk::walk(&tree, options.collapse_whitespace)?;
        let root_slots = keys::assign_slots(&mut roots);
        let source_hash = blake3::hash(source.as_bytes()).to_hex().to_string();
        Ok(Self {
            inner: Arc::new(TemplateInner {
                name: name.into(),
                roots,
                options,
                root_slots,
                source_hash,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The walked, slot-keyed parse tree. Read-only after compilation.
    pub fn roots(&self) -> &[Node] {
        &self.inner.roots
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.inner.options
    }

    pub fn root_slots(&self) -> u32 {
        self.inner.root_slots
    }

    pub fn source_hash(&self) -> &str {
        &self.inner.source_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_clone_share_tree() {
        let t = Template::parse("counter", "<b>{{.N}}</b>").unwrap();
        let clone = t.clone();
        assert!(std::ptr::eq(t.roots().as_ptr(), clone.roots().as_ptr()));
        assert_eq!(t.root_slots(), 1);
    }

    #[test]
    fn test_source_hash_stable() {
        let a = Template::parse("t", "{{.X}}").unwrap();
        let b = Template::parse("t", "{{.X}}").unwrap();
        assert_eq!(a.source_hash(), b.source_hash());
    }

    #[test]
    fn test_key_field_option() {
        let opts = TemplateOptions { key_field: "Uid".into(), ..Default::default() };
        let t = Template::parse_with("t", "{{.X}}", opts).unwrap();
        assert_eq!(t.options().key_field, "Uid");
    }

    #[test]
    fn test_parse_error_is_fatal() {
        assert!(Template::parse("bad", "{{if .X}}").is_err());
    }
}
