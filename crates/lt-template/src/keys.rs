//! # Key Generator
//!
//! Final compile pass: assigns numeric slot keys to dynamic nodes.
//!
//! Keys are consecutive non-negative integers starting at 0 within each
//! region, assigned left-to-right in document order. Nested regions (a
//! conditional branch body, a loop body, an inlined sub-template body)
//! start their own 0-based sequence. Re-parsing the same source always
//! yields the same assignment.

use crate::ast::Node;

/// Per-region counter. One instance per region; nested regions get a
/// fresh one.
#[derive(Debug, Default)]
struct KeyGen {
    next: u32,
}

impl KeyGen {
    fn take(&mut self) -> u32 {
        let key = self.next;
        self.next += 1;
        key
    }
}

/// Assign slot keys to every dynamic node, returning the number of slots
/// in the top-level region.
pub fn assign_slots(body: &mut [Node]) -> u32 {
    assign_region(body)
}

fn assign_region(body: &mut [Node]) -> u32 {
    let mut keys = KeyGen::default();
    for node in body.iter_mut() {
        match node {
            Node::Interp(n) => n.slot = keys.take(),
            Node::If(n) => {
                n.slot = keys.take();
                assign_region(&mut n.then_body);
                assign_region(&mut n.else_body);
            }
            Node::Range(n) => {
                n.slot = keys.take();
                assign_region(&mut n.body);
            }
            Node::With(n) => {
                n.slot = keys.take();
                assign_region(&mut n.body);
                assign_region(&mut n.else_body);
            }
            Node::SubTree(n) => {
                n.slot = keys.take();
                assign_region(&mut n.body);
            }
            Node::Text(_) | Node::Assign(_) | Node::Call(_) => {}
        }
    }
    keys.next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::walk::walk;

    fn compiled(src: &str) -> Vec<Node> {
        let mut nodes = walk(&parse(src).unwrap(), true).unwrap();
        assign_slots(&mut nodes);
        nodes
    }

    #[test]
    fn test_left_to_right_assignment() {
        let nodes = compiled(r#"<div style="color: {{.Color}}">Hello {{.Counter}} World</div>"#);
        let slots: Vec<u32> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Interp(i) => Some(i.slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn test_nested_regions_restart_at_zero() {
        let nodes = compiled("{{.A}}{{if .Show}}{{.B}}{{.C}}{{end}}");
        let Node::If(if_node) = &nodes[1] else { panic!() };
        assert_eq!(if_node.slot, 1);
        let Node::Interp(b) = &if_node.then_body[0] else { panic!() };
        let Node::Interp(c) = &if_node.then_body[1] else { panic!() };
        assert_eq!((b.slot, c.slot), (0, 1));
    }

    #[test]
    fn test_assignments_skip_static_nodes() {
        let nodes = compiled("a{{$x := .V}}b{{.A}}");
        let Node::Interp(a) = nodes.last().unwrap() else { panic!() };
        assert_eq!(a.slot, 0);
    }

    #[test]
    fn test_reparse_is_deterministic() {
        let src = "{{.A}}{{range .Items}}<li>{{.T}}</li>{{end}}{{if .X}}y{{end}}";
        assert_eq!(compiled(src), compiled(src));
    }
}
