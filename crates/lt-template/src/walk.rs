//! # Walker - Sub-template Inlining and Normalization
//!
//! Third pass: rewrites the authored tree into the runtime tree. Every
//! `{{template "name" …}}` call is replaced by the subtree of its
//! definition, recursively, so the generator never resolves names at
//! render time. Text nodes are whitespace-normalized in the same pass.
//!
//! Inlining preserves calling dot-context semantics: the inlined body
//! becomes a `SubTree` node that rebinds dot to the call's pipeline value,
//! which at render time occupies its own dynamic slot (a nested tree).

use crate::ast::{Node, SourceTree, SubTreeNode};
use crate::error::TemplateError;

/// Hard ceiling on inline nesting; definitions deeper than this are
/// treated as recursive.
const MAX_INLINE_DEPTH: usize = 64;

/// Inline all sub-template calls and normalize whitespace.
///
/// Fails with `InvalidTemplate` on an undefined or (mutually) recursive
/// sub-template reference.
pub fn walk(tree: &SourceTree, collapse_whitespace: bool) -> Result<Vec<Node>, TemplateError> {
    let mut stack = Vec::new();
    let mut roots = inline_body(&tree.roots, tree, &mut stack, 0)?;
    if collapse_whitespace {
        normalize_body(&mut roots, true);
    }
    Ok(roots)
}

fn inline_body(
    body: &[Node],
    tree: &SourceTree,
    stack: &mut Vec<String>,
    scope_depth: u8,
) -> Result<Vec<Node>, TemplateError> {
    let mut out = Vec::with_capacity(body.len());
    for node in body {
        match node {
            Node::Call(call) => {
                if stack.iter().any(|n| *n == call.name) || stack.len() >= MAX_INLINE_DEPTH {
                    return Err(TemplateError::InvalidTemplate(format!(
                        "recursive sub-template reference {:?}",
                        call.name
                    )));
                }
                let Some(def) = tree.define(&call.name) else {
                    return Err(TemplateError::InvalidTemplate(format!(
                        "undefined sub-template {:?}",
                        call.name
                    )));
                };
                stack.push(call.name.clone());
                let inlined = inline_body(def, tree, stack, scope_depth)?;
                stack.pop();
                out.push(Node::SubTree(SubTreeNode {
                    name: call.name.clone(),
                    pipeline: call.pipeline.clone(),
                    body: inlined,
                    scope_depth,
                    slot: 0,
                }));
            }
            Node::If(if_node) => {
                let mut n = if_node.clone();
                n.then_body = inline_body(&n.then_body, tree, stack, scope_depth)?;
                n.else_body = inline_body(&n.else_body, tree, stack, scope_depth)?;
                out.push(Node::If(n));
            }
            Node::Range(range) => {
                let mut n = range.clone();
                n.body = inline_body(&n.body, tree, stack, scope_depth.saturating_add(1))?;
                out.push(Node::Range(n));
            }
            Node::With(with) => {
                let mut n = with.clone();
                n.body = inline_body(&n.body, tree, stack, scope_depth.saturating_add(1))?;
                n.else_body = inline_body(&n.else_body, tree, stack, scope_depth)?;
                out.push(Node::With(n));
            }
            Node::SubTree(sub) => {
                let mut n = sub.clone();
                n.body = inline_body(&n.body, tree, stack, scope_depth)?;
                out.push(Node::SubTree(n));
            }
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

// ============================================================================
// WHITESPACE NORMALIZATION
// ============================================================================

/// Collapse whitespace runs in text nodes and elide inter-tag whitespace
/// at region boundaries. Idempotent and deterministic.
fn normalize_body(body: &mut Vec<Node>, region_root: bool) {
    for node in body.iter_mut() {
        match node {
            Node::Text(text) => *text = collapse_runs(text),
            Node::If(n) => {
                normalize_body(&mut n.then_body, true);
                normalize_body(&mut n.else_body, true);
            }
            Node::Range(n) => normalize_body(&mut n.body, true),
            Node::With(n) => {
                normalize_body(&mut n.body, true);
                normalize_body(&mut n.else_body, true);
            }
            Node::SubTree(n) => normalize_body(&mut n.body, true),
            _ => {}
        }
    }

    if region_root {
        // Leading and trailing inter-tag whitespace contributes nothing to
        // the rendered document.
        if let Some(Node::Text(first)) = body.first_mut() {
            if first.starts_with(' ') {
                *first = first.trim_start().to_string();
            }
        }
        if let Some(Node::Text(last)) = body.last_mut() {
            if last.ends_with(' ') {
                *last = last.trim_end().to_string();
            }
        }
        body.retain(|n| !matches!(n, Node::Text(t) if t.is_empty()));
    }
}

fn collapse_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn walked(src: &str) -> Vec<Node> {
        walk(&parse(src).unwrap(), true).unwrap()
    }

    #[test]
    fn test_inlines_define() {
        let nodes = walked(r#"{{define "chip"}}<b>{{.}}</b>{{end}}<p>{{template "chip" .Tag}}</p>"#);
        let Node::SubTree(sub) = &nodes[1] else { panic!("expected subtree, got {:?}", nodes) };
        assert_eq!(sub.name, "chip");
        assert_eq!(sub.body.len(), 3);
    }

    #[test]
    fn test_undefined_reference_fails() {
        let tree = parse(r#"{{template "ghost"}}"#).unwrap();
        let err = walk(&tree, true).unwrap_err();
        assert_eq!(err.kind(), "InvalidTemplate");
    }

    #[test]
    fn test_recursive_reference_fails() {
        let tree = parse(r#"{{define "a"}}{{template "a"}}{{end}}{{template "a"}}"#).unwrap();
        let err = walk(&tree, true).unwrap_err();
        assert_eq!(err.kind(), "InvalidTemplate");
    }

    #[test]
    fn test_nested_defines_inline_recursively() {
        let nodes = walked(
            r#"{{define "inner"}}i{{end}}{{define "outer"}}<u>{{template "inner"}}</u>{{end}}{{template "outer"}}"#,
        );
        let Node::SubTree(outer) = &nodes[0] else { panic!() };
        let Node::SubTree(inner) = &outer.body[1] else { panic!("{:?}", outer.body) };
        assert_eq!(inner.name, "inner");
    }

    #[test]
    fn test_scope_depth_annotation() {
        let nodes = walked(r#"{{define "row"}}x{{end}}{{range .Items}}{{template "row"}}{{end}}"#);
        let Node::Range(range) = &nodes[0] else { panic!() };
        let Node::SubTree(sub) = &range.body[0] else { panic!() };
        assert_eq!(sub.scope_depth, 1);
    }

    #[test]
    fn test_whitespace_collapsed() {
        let nodes = walked("<div>\n    Hello   {{.Name}}\n</div>");
        let Node::Text(first) = &nodes[0] else { panic!() };
        assert_eq!(first, "<div> Hello ");
        let Node::Text(last) = &nodes[2] else { panic!() };
        assert_eq!(last, " </div>");
    }

    #[test]
    fn test_boundary_whitespace_elided() {
        let nodes = walked("  <p>x</p>  ");
        assert_eq!(nodes, vec![Node::Text("<p>x</p>".into())]);
    }

    #[test]
    fn test_inter_tag_runs_collapse_to_one_space() {
        let nodes = walked("{{range .X}}y{{end}}<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>");
        let texts: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["<ul> <li>a</li> <li>b</li> </ul>"]);
    }

    #[test]
    fn test_normalization_idempotent() {
        let once = walked("<div>\n  {{.A}}   {{.B}}\n</div>");
        let mut again = once.clone();
        normalize_body(&mut again, true);
        assert_eq!(once, again);
    }
}
