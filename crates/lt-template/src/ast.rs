//! # Template AST
//!
//! The node and expression types produced by the parser and rewritten by
//! the walker. After walking, `Call` nodes no longer appear: every
//! sub-template invocation has been inlined as a `SubTree`.

use serde::{Deserialize, Serialize};

/// A reference to a value, the leaf of every expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// `.`, `.Field`, `.A.B`: a path rooted at the current dot context.
    /// An empty path is the dot itself.
    Dot(Vec<String>),
    /// `$`, `$x`, `$x.A.B`: a variable reference with an optional field
    /// path. The empty name is the root context (`$`).
    Var(String, Vec<String>),
    /// `"…"` string literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `true` / `false`.
    Bool(bool),
    /// `nil`.
    Nil,
}

/// One stage of a pipeline: either a bare term (`name` is `None`) or a
/// function invocation with arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: Option<String>,
    pub args: Vec<Term>,
}

impl Command {
    pub fn term(term: Term) -> Self {
        Self { name: None, args: vec![term] }
    }
}

/// A `|`-separated chain of commands. Every stage after the first receives
/// the previous stage's value as its final argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<Command>,
}

impl Pipeline {
    pub fn single(term: Term) -> Self {
        Self { stages: vec![Command::term(term)] }
    }
}

/// A parsed template node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Literal text between actions.
    Text(String),
    /// `{{ pipeline }}`: a dynamic scalar slot.
    Interp(InterpNode),
    /// `{{ if }} … {{ else }} … {{ end }}`.
    If(IfNode),
    /// `{{ range }} … {{ end }}`.
    Range(RangeNode),
    /// `{{ with }} … {{ else }} … {{ end }}`.
    With(WithNode),
    /// `{{ $x := pipeline }}`: binds a variable, renders nothing.
    Assign(AssignNode),
    /// `{{ template "name" pipeline }}`: only present before walking.
    Call(CallNode),
    /// An inlined sub-template body; replaces `Call` during walking.
    SubTree(SubTreeNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpNode {
    pub pipeline: Pipeline,
    /// Compile-time slot key within the enclosing region.
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub cond: Pipeline,
    pub then_body: Vec<Node>,
    /// `else if` chains are desugared into a nested `If` inside here.
    pub else_body: Vec<Node>,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeNode {
    /// `$i` in `range $i, $v := …`.
    pub index_var: Option<String>,
    /// `$v` in `range $v := …` / `range $i, $v := …`.
    pub value_var: Option<String>,
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithNode {
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignNode {
    pub name: String,
    pub pipeline: Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallNode {
    pub name: String,
    /// The dot context passed to the sub-template; `None` means the
    /// caller's dot is passed through unchanged.
    pub pipeline: Option<Pipeline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTreeNode {
    /// Name of the definition this body was inlined from.
    pub name: String,
    pub pipeline: Option<Pipeline>,
    pub body: Vec<Node>,
    /// Loop/with nesting depth at the inline site. The generator sizes its
    /// scope stack from this.
    pub scope_depth: u8,
    pub slot: u32,
}

impl Node {
    /// Whether this node occupies a dynamic slot in its region.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            Node::Interp(_) | Node::If(_) | Node::Range(_) | Node::With(_) | Node::SubTree(_)
        )
    }
}

/// Parser output: the root body plus any `define` blocks found in source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTree {
    pub roots: Vec<Node>,
    pub defines: Vec<(String, Vec<Node>)>,
}

impl SourceTree {
    pub fn define(&self, name: &str) -> Option<&[Node]> {
        self.defines
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, body)| body.as_slice())
    }
}
