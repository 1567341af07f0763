//! # Tree Generator
//!
//! Executes a compiled template against application state, producing a
//! `TreeNode` with fully populated statics and rendered slot values.
//!
//! Descends the walked tree in document order, accumulating static text
//! per region and closing a fragment at every dynamic node. Each region
//! closes with its trailing fragment, so `len(s) == slots + 1` holds by
//! construction.

use std::collections::BTreeMap;

use lt_template::ast::{Command, Node, Pipeline, Term};
use lt_template::Template;
use serde_json::Value;

use crate::error::RenderError;
use crate::fingerprint;
use crate::funcs::FuncRegistry;
use crate::node::{RangeItem, RangeTree, SlotValue, TreeNode};
use crate::value::{escape_html, ValueAccess};

/// Per-connection renderer. Mounting clones the template handle (the
/// walked tree itself is shared, never copied or mutated).
#[derive(Debug, Clone)]
pub struct Renderer {
    template: Template,
    funcs: FuncRegistry,
}

impl Renderer {
    pub fn mount(template: &Template) -> Self {
        Self {
            template: template.clone(),
            funcs: FuncRegistry::default(),
        }
    }

    pub fn with_funcs(mut self, funcs: FuncRegistry) -> Self {
        self.funcs = funcs;
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Render the template against `state`.
    pub fn render(&self, state: &Value) -> Result<TreeNode, RenderError> {
        let mut scope = Scope::new(state);
        let exec = Exec { funcs: &self.funcs, key_field: &self.template.options().key_field };
        exec.region(self.template.roots(), &mut scope, fingerprint::SEED_PLAIN)
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// The dot/variable environment. Every region render pushes a frame;
/// `$` always resolves to the bottom frame's dot (the root state), so a
/// root reference inside any loop depth bypasses iteration shadowing.
struct Scope<'a> {
    root: &'a Value,
    frames: Vec<Frame>,
}

struct Frame {
    dot: Value,
    vars: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    fn new(root: &'a Value) -> Self {
        Self {
            root,
            frames: vec![Frame { dot: root.clone(), vars: Vec::new() }],
        }
    }

    fn dot(&self) -> &Value {
        &self.frames.last().expect("scope has at least the root frame").dot
    }

    fn push(&mut self, dot: Value) {
        self.frames.push(Frame { dot, vars: Vec::new() });
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn assign(&mut self, name: String, value: Value) {
        let frame = self.frames.last_mut().expect("scope has at least the root frame");
        frame.vars.push((name, value));
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v))
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

struct Exec<'a> {
    funcs: &'a FuncRegistry,
    key_field: &'a str,
}

impl Exec<'_> {
    /// Render one region body into a tree node.
    fn region(&self, body: &[Node], scope: &mut Scope<'_>, seed: u8) -> Result<TreeNode, RenderError> {
        let mut statics = vec![String::new()];
        let mut slots: BTreeMap<u32, SlotValue> = BTreeMap::new();

        for node in body {
            match node {
                Node::Text(text) => {
                    statics
                        .last_mut()
                        .expect("region always has an open static fragment")
                        .push_str(text);
                }
                Node::Assign(assign) => {
                    let value = self.eval(&assign.pipeline, scope)?;
                    scope.assign(assign.name.clone(), value);
                }
                Node::Interp(interp) => {
                    let text = self.eval_scalar(&interp.pipeline, scope)?;
                    slots.insert(interp.slot, SlotValue::Scalar(text));
                    statics.push(String::new());
                }
                Node::If(if_node) => {
                    let taken = ValueAccess::as_bool(&self.eval(&if_node.cond, scope)?);
                    let (branch, seed) = if taken {
                        (&if_node.then_body, fingerprint::SEED_TAKEN)
                    } else {
                        (&if_node.else_body, fingerprint::SEED_ELSE)
                    };
                    scope.push(scope.dot().clone());
                    let nested = self.region(branch, scope, seed);
                    scope.pop();
                    slots.insert(if_node.slot, SlotValue::Nested(nested?));
                    statics.push(String::new());
                }
                Node::With(with) => {
                    let value = self.eval(&with.pipeline, scope)?;
                    let (branch, dot, seed) = if ValueAccess::as_bool(&value) {
                        (&with.body, value, fingerprint::SEED_TAKEN)
                    } else {
                        (&with.else_body, scope.dot().clone(), fingerprint::SEED_ELSE)
                    };
                    scope.push(dot);
                    let nested = self.region(branch, scope, seed);
                    scope.pop();
                    slots.insert(with.slot, SlotValue::Nested(nested?));
                    statics.push(String::new());
                }
                Node::Range(range) => {
                    let tree = self.range(range, scope)?;
                    slots.insert(range.slot, SlotValue::Range(tree));
                    statics.push(String::new());
                }
                Node::SubTree(sub) => {
                    let dot = match &sub.pipeline {
                        Some(pipeline) => self.eval(pipeline, scope)?,
                        None => scope.dot().clone(),
                    };
                    scope.push(dot);
                    let nested = self.region(&sub.body, scope, fingerprint::SEED_PLAIN);
                    scope.pop();
                    slots.insert(sub.slot, SlotValue::Nested(nested?));
                    statics.push(String::new());
                }
                Node::Call(call) => {
                    // The walker inlines every call; reaching one here is
                    // a compiler bug.
                    debug_assert!(false, "unresolved call to {:?}", call.name);
                }
            }
        }

        debug_assert_eq!(statics.len(), slots.len() + 1, "statics must flank slots");
        let fp = fingerprint::region(seed, &statics, &slots);
        Ok(TreeNode { statics: Some(statics), fingerprint: Some(fp), slots })
    }

    /// Render a loop into a range tree.
    fn range(
        &self,
        range: &lt_template::ast::RangeNode,
        scope: &mut Scope<'_>,
    ) -> Result<RangeTree, RenderError> {
        let value = self.eval(&range.pipeline, scope)?;
        let Some(entries) = value.iter_items() else {
            return Err(RenderError::NotIterable { kind: value.kind() });
        };

        let mut statics: Option<Vec<String>> = None;
        let mut items = Vec::with_capacity(entries.len());
        let mut keys_seen = std::collections::HashSet::new();
        let mut keyed = true;

        for (index, (iter_key, item)) in entries.iter().enumerate() {
            scope.push((*item).clone());
            if let Some(var) = &range.index_var {
                scope.assign(var.clone(), index_value(iter_key));
            }
            if let Some(var) = &range.value_var {
                scope.assign(var.clone(), (*item).clone());
            }
            let rendered = self.region(&range.body, scope, fingerprint::SEED_PLAIN);
            scope.pop();
            let rendered = rendered?;

            let iteration_statics = rendered
                .statics
                .expect("generated region always carries statics");
            match &statics {
                None => statics = Some(iteration_statics),
                Some(first) => {
                    debug_assert_eq!(first, &iteration_statics, "iteration statics diverged");
                }
            }

            let key = match item.get_field(self.key_field) {
                Some(k @ (Value::String(_) | Value::Number(_))) => k.as_scalar(),
                _ => {
                    keyed = false;
                    index.to_string()
                }
            };
            if !keys_seen.insert(key.clone()) {
                keyed = false;
            }

            let dynamics = rendered.slots.into_values().collect();
            items.push(RangeItem { key, dynamics });
        }

        if !keyed {
            for (index, item) in items.iter_mut().enumerate() {
                item.key = index.to_string();
            }
        }

        let fp = statics.as_deref().map(fingerprint::range);
        Ok(RangeTree { statics, fingerprint: fp, items, keyed })
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    /// Evaluate an interpolation pipeline to text. Output is HTML-escaped
    /// unless the pipeline ends in the `raw` marker.
    fn eval_scalar(&self, pipeline: &Pipeline, scope: &Scope<'_>) -> Result<String, RenderError> {
        match pipeline.stages.split_last() {
            Some((last, rest)) if last.name.as_deref() == Some("raw") => {
                let value = if rest.is_empty() {
                    // {{raw .X}}
                    match last.args.as_slice() {
                        [term] => self.eval_term(term, scope)?,
                        _ => {
                            return Err(RenderError::Function {
                                name: "raw".into(),
                                message: "takes exactly one value".into(),
                            })
                        }
                    }
                } else if last.args.is_empty() {
                    // {{.X | raw}}
                    self.eval_stages(rest, scope)?
                } else {
                    return Err(RenderError::Function {
                        name: "raw".into(),
                        message: "takes no arguments when piped into".into(),
                    });
                };
                Ok(value.as_scalar())
            }
            _ => {
                let value = self.eval_stages(&pipeline.stages, scope)?;
                Ok(escape_html(&value.as_scalar()))
            }
        }
    }

    fn eval(&self, pipeline: &Pipeline, scope: &Scope<'_>) -> Result<Value, RenderError> {
        self.eval_stages(&pipeline.stages, scope)
    }

    fn eval_stages(&self, stages: &[Command], scope: &Scope<'_>) -> Result<Value, RenderError> {
        let mut stages = stages.iter();
        let first = stages.next().expect("parser rejects empty pipelines");
        let mut value = self.eval_command(first, None, scope)?;
        for stage in stages {
            value = self.eval_command(stage, Some(value), scope)?;
        }
        Ok(value)
    }

    fn eval_command(
        &self,
        command: &Command,
        piped: Option<Value>,
        scope: &Scope<'_>,
    ) -> Result<Value, RenderError> {
        match &command.name {
            None => self.eval_term(&command.args[0], scope),
            Some(name) => {
                let Some(func) = self.funcs.get(name) else {
                    return Err(RenderError::UnknownFunction(name.clone()));
                };
                let mut args = Vec::with_capacity(command.args.len() + 1);
                for term in &command.args {
                    args.push(self.eval_term(term, scope)?);
                }
                if let Some(piped) = piped {
                    args.push(piped);
                }
                func(&args)
            }
        }
    }

    fn eval_term(&self, term: &Term, scope: &Scope<'_>) -> Result<Value, RenderError> {
        match term {
            Term::Dot(path) => walk_path(scope.dot(), path),
            Term::Var(name, path) if name.is_empty() => walk_path(scope.root, path),
            Term::Var(name, path) => {
                let Some(value) = scope.lookup(name) else {
                    return Err(RenderError::UndefinedVariable(name.clone()));
                };
                walk_path(value, path)
            }
            Term::Str(s) => Ok(Value::String(s.clone())),
            Term::Int(i) => Ok(Value::from(*i)),
            Term::Float(f) => Ok(Value::from(*f)),
            Term::Bool(b) => Ok(Value::Bool(*b)),
            Term::Nil => Ok(Value::Null),
        }
    }
}

fn walk_path(start: &Value, path: &[String]) -> Result<Value, RenderError> {
    let mut current = start;
    for segment in path {
        if !current.has_fields() {
            return Err(RenderError::FieldOnScalar {
                field: segment.clone(),
                kind: current.kind(),
            });
        }
        match current.get_field(segment) {
            Some(value) => current = value,
            // Missing keys render as empty, matching lenient map access.
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

fn index_value(key: &str) -> Value {
    key.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::String(key.to_string()))
}
