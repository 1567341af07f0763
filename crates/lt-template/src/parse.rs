//! # Parser - Action Grammar and Block Structure
//!
//! Second pass: each action body is tokenized and classified, then the
//! flat item stream is folded into a block tree. `if`/`range`/`with`/
//! `define` open blocks that a matching `{{end}}` closes; mis-nesting is a
//! `ParseError` here, never a silent recovery.

use crate::ast::{
    AssignNode, CallNode, Command, IfNode, Node, Pipeline, RangeNode, SourceTree, Term, WithNode,
};
use crate::error::TemplateError;
use crate::lex::{lex, RawItem};

/// Parse full template source into a `SourceTree`.
pub fn parse(source: &str) -> Result<SourceTree, TemplateError> {
    let items = lex(source)?;
    let mut stream = ItemStream { items, pos: 0 };
    let mut defines = Vec::new();
    let roots = parse_body(&mut stream, BlockKind::Root, &mut defines)?;
    Ok(SourceTree { roots, defines })
}

// ============================================================================
// ACTION CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Action {
    If(Pipeline),
    ElseIf(Pipeline),
    Else,
    End,
    Range { index_var: Option<String>, value_var: Option<String>, pipeline: Pipeline },
    With(Pipeline),
    Define(String),
    Template { name: String, pipeline: Option<Pipeline> },
    Assign { name: String, pipeline: Pipeline },
    Interp(Pipeline),
}

fn classify(body: &str, line: usize) -> Result<Action, TemplateError> {
    let toks = Tokenizer::new(body, line).tokenize()?;

    let action = match toks.first() {
        Some(Tok::Ident(kw)) => match kw.as_str() {
            "if" => Action::If(parse_pipeline(&toks[1..], line)?),
            "else" => match toks.get(1) {
                None => Action::Else,
                Some(Tok::Ident(k)) if k == "if" => Action::ElseIf(parse_pipeline(&toks[2..], line)?),
                _ => return Err(TemplateError::parse(line, "malformed else action")),
            },
            "end" => {
                if toks.len() > 1 {
                    return Err(TemplateError::parse(line, "unexpected tokens after end"));
                }
                Action::End
            }
            "range" => parse_range(&toks[1..], line)?,
            "with" => Action::With(parse_pipeline(&toks[1..], line)?),
            "define" => match toks.get(1) {
                Some(Tok::Str(name)) if toks.len() == 2 => Action::Define(name.clone()),
                _ => return Err(TemplateError::parse(line, "define requires a quoted name")),
            },
            "template" => match toks.get(1) {
                Some(Tok::Str(name)) => {
                    let pipeline = if toks.len() > 2 {
                        Some(parse_pipeline(&toks[2..], line)?)
                    } else {
                        None
                    };
                    Action::Template { name: name.clone(), pipeline }
                }
                _ => return Err(TemplateError::parse(line, "template requires a quoted name")),
            },
            _ => Action::Interp(parse_pipeline(&toks, line)?),
        },
        Some(Tok::Var(name, path)) if toks.get(1) == Some(&Tok::Assign) => {
            if !path.is_empty() {
                return Err(TemplateError::parse(line, "cannot assign to a field path"));
            }
            let name = name.clone();
            let pipeline = parse_pipeline(&toks[2..], line)?;
            Action::Assign { name, pipeline }
        }
        Some(_) => Action::Interp(parse_pipeline(&toks, line)?),
        None => return Err(TemplateError::parse(line, "empty action")),
    };
    Ok(action)
}

/// `range pipeline`, `range $v := pipeline`, `range $i, $v := pipeline`.
fn parse_range(toks: &[Tok], line: usize) -> Result<Action, TemplateError> {
    if let Some(assign) = toks.iter().position(|t| *t == Tok::Assign) {
        let (vars, rest) = toks.split_at(assign);
        let pipeline = parse_pipeline(&rest[1..], line)?;
        match vars {
            [Tok::Var(v, p)] if p.is_empty() => Ok(Action::Range {
                index_var: None,
                value_var: Some(v.clone()),
                pipeline,
            }),
            [Tok::Var(i, pi), Tok::Comma, Tok::Var(v, pv)] if pi.is_empty() && pv.is_empty() => {
                Ok(Action::Range {
                    index_var: Some(i.clone()),
                    value_var: Some(v.clone()),
                    pipeline,
                })
            }
            _ => Err(TemplateError::parse(line, "malformed range variable binding")),
        }
    } else {
        Ok(Action::Range {
            index_var: None,
            value_var: None,
            pipeline: parse_pipeline(toks, line)?,
        })
    }
}

// ============================================================================
// PIPELINE GRAMMAR
// ============================================================================

fn parse_pipeline(toks: &[Tok], line: usize) -> Result<Pipeline, TemplateError> {
    if toks.is_empty() {
        return Err(TemplateError::parse(line, "expected a pipeline"));
    }
    let mut stages = Vec::new();
    for (i, stage) in toks.split(|t| *t == Tok::Pipe).enumerate() {
        stages.push(parse_command(stage, i > 0, line)?);
    }
    Ok(Pipeline { stages })
}

fn parse_command(toks: &[Tok], chained: bool, line: usize) -> Result<Command, TemplateError> {
    match toks {
        [] => Err(TemplateError::parse(line, "empty pipeline stage")),
        [single] if !chained => Ok(Command::term(term_of(single, line)?)),
        [Tok::Ident(name), rest @ ..] => {
            let args = rest
                .iter()
                .map(|t| term_of(t, line))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Command { name: Some(name.clone()), args })
        }
        [single] => {
            // A chained stage must be a function; a bare term cannot
            // receive the piped value.
            Err(TemplateError::parse(
                line,
                format!("pipeline stage {:?} is not a function", single),
            ))
        }
        _ => Err(TemplateError::parse(line, "malformed pipeline stage")),
    }
}

fn term_of(tok: &Tok, line: usize) -> Result<Term, TemplateError> {
    match tok {
        Tok::Field(path) => Ok(Term::Dot(path.clone())),
        Tok::Var(name, path) => Ok(Term::Var(name.clone(), path.clone())),
        Tok::Str(s) => Ok(Term::Str(s.clone())),
        Tok::Int(i) => Ok(Term::Int(*i)),
        Tok::Float(f) => Ok(Term::Float(*f)),
        Tok::Ident(kw) => match kw.as_str() {
            "true" => Ok(Term::Bool(true)),
            "false" => Ok(Term::Bool(false)),
            "nil" => Ok(Term::Nil),
            other => Err(TemplateError::parse(
                line,
                format!("bare identifier {:?} is not a value", other),
            )),
        },
        other => Err(TemplateError::parse(line, format!("unexpected token {:?}", other))),
    }
}

// ============================================================================
// ACTION TOKENIZER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare identifier: keyword or function name.
    Ident(String),
    /// `.A.B` field path; empty path is the bare dot.
    Field(Vec<String>),
    /// `$name.A.B`; empty name is the root `$`.
    Var(String, Vec<String>),
    Str(String),
    Int(i64),
    Float(f64),
    Pipe,
    Assign,
    Comma,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(body: &'a str, line: usize) -> Self {
        Self { chars: body.chars().peekable(), line }
    }

    fn tokenize(mut self) -> Result<Vec<Tok>, TemplateError> {
        let mut toks = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '|' => {
                    self.chars.next();
                    toks.push(Tok::Pipe);
                }
                ',' => {
                    self.chars.next();
                    toks.push(Tok::Comma);
                }
                ':' => {
                    self.chars.next();
                    if self.chars.next() != Some('=') {
                        return Err(self.err("expected := "));
                    }
                    toks.push(Tok::Assign);
                }
                '.' => {
                    self.chars.next();
                    toks.push(Tok::Field(self.path()?));
                }
                '$' => {
                    self.chars.next();
                    let name = self.ident_run();
                    let path = if self.chars.peek() == Some(&'.') {
                        self.chars.next();
                        self.path()?
                    } else {
                        Vec::new()
                    };
                    toks.push(Tok::Var(name, path));
                }
                '"' => {
                    self.chars.next();
                    toks.push(Tok::Str(self.string_lit()?));
                }
                c if c.is_ascii_digit() || c == '-' => {
                    toks.push(self.number()?);
                }
                c if is_ident_start(c) => {
                    toks.push(Tok::Ident(self.ident_run()));
                }
                other => return Err(self.err(format!("unexpected character {:?}", other))),
            }
        }
        Ok(toks)
    }

    /// Dot-separated field segments after a consumed leading `.`.
    fn path(&mut self) -> Result<Vec<String>, TemplateError> {
        let mut segments = Vec::new();
        loop {
            let seg = self.ident_run();
            if seg.is_empty() {
                if segments.is_empty() {
                    // Bare dot.
                    return Ok(segments);
                }
                return Err(self.err("trailing . in field path"));
            }
            segments.push(seg);
            if self.chars.peek() == Some(&'.') {
                self.chars.next();
            } else {
                return Ok(segments);
            }
        }
    }

    fn ident_run(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_ident_char(c) {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

    fn string_lit(&mut self) -> Result<String, TemplateError> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(s),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    _ => return Err(self.err("invalid escape in string literal")),
                },
                Some(c) => s.push(c),
                None => return Err(self.err("unterminated string literal")),
            }
        }
    }

    fn number(&mut self) -> Result<Tok, TemplateError> {
        let mut s = String::new();
        if self.chars.peek() == Some(&'-') {
            s.push('-');
            self.chars.next();
        }
        let mut is_float = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                // Only a float if a digit follows; otherwise this dot
                // starts a field path (not valid after a number anyway).
                is_float = true;
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if is_float {
            s.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| self.err(format!("invalid float literal {:?}", s)))
        } else {
            s.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| self.err(format!("invalid integer literal {:?}", s)))
        }
    }

    fn err(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::parse(self.line, message)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ============================================================================
// BLOCK TREE BUILDER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Root,
    IfThen,
    IfElse,
    RangeBody,
    WithBody,
    WithElse,
    DefineBody,
}

struct ItemStream {
    items: Vec<RawItem>,
    pos: usize,
}

impl ItemStream {
    fn next(&mut self) -> Option<RawItem> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }
}

/// Parse nodes until the block's terminator. Slot keys are all zero here;
/// the keys pass assigns them after walking.
fn parse_body(
    stream: &mut ItemStream,
    kind: BlockKind,
    defines: &mut Vec<(String, Vec<Node>)>,
) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();

    while let Some(item) = stream.next() {
        let (body, line) = match item {
            RawItem::Text(text) => {
                nodes.push(Node::Text(text));
                continue;
            }
            RawItem::Action { body, line } => (body, line),
        };

        match classify(&body, line)? {
            Action::Interp(pipeline) => {
                nodes.push(Node::Interp(crate::ast::InterpNode { pipeline, slot: 0 }));
            }
            Action::Assign { name, pipeline } => {
                nodes.push(Node::Assign(AssignNode { name, pipeline }));
            }
            Action::Template { name, pipeline } => {
                nodes.push(Node::Call(CallNode { name, pipeline }));
            }
            Action::If(cond) => {
                let (then_body, else_body) = parse_if(stream, cond.clone(), defines, line)?;
                nodes.push(Node::If(IfNode { cond, then_body, else_body, slot: 0 }));
            }
            Action::Range { index_var, value_var, pipeline } => {
                let body = parse_body(stream, BlockKind::RangeBody, defines)?;
                expect_end(stream, line)?;
                nodes.push(Node::Range(RangeNode { index_var, value_var, pipeline, body, slot: 0 }));
            }
            Action::With(pipeline) => {
                let (with_body, else_body) = parse_with(stream, defines)?;
                nodes.push(Node::With(WithNode { pipeline, body: with_body, else_body, slot: 0 }));
            }
            Action::Define(name) => {
                if kind != BlockKind::Root {
                    return Err(TemplateError::parse(line, "define must appear at top level"));
                }
                let body = parse_body(stream, BlockKind::DefineBody, defines)?;
                expect_end(stream, line)?;
                if defines.iter().any(|(n, _)| *n == name) {
                    return Err(TemplateError::parse(
                        line,
                        format!("duplicate definition of template {:?}", name),
                    ));
                }
                defines.push((name, body));
            }
            Action::End => {
                return match kind {
                    BlockKind::Root => Err(TemplateError::parse(line, "unexpected {{end}}")),
                    _ => {
                        stream.pos -= 1; // let the caller consume it
                        Ok(nodes)
                    }
                };
            }
            Action::Else | Action::ElseIf(_) => {
                return match kind {
                    BlockKind::IfThen | BlockKind::WithBody => {
                        stream.pos -= 1;
                        Ok(nodes)
                    }
                    _ => Err(TemplateError::parse(line, "unexpected {{else}}")),
                };
            }
        }
    }

    match kind {
        BlockKind::Root => Ok(nodes),
        _ => Err(TemplateError::parse(0, "unclosed block: missing {{end}}")),
    }
}

/// After an `if` opener: parse the then-body, optional else chain, and
/// consume the closing `end`.
fn parse_if(
    stream: &mut ItemStream,
    _cond: Pipeline,
    defines: &mut Vec<(String, Vec<Node>)>,
    open_line: usize,
) -> Result<(Vec<Node>, Vec<Node>), TemplateError> {
    let then_body = parse_body(stream, BlockKind::IfThen, defines)?;

    match stream.next() {
        Some(RawItem::Action { body, line }) => match classify(&body, line)? {
            Action::End => Ok((then_body, Vec::new())),
            Action::Else => {
                let else_body = parse_body(stream, BlockKind::IfElse, defines)?;
                expect_end(stream, line)?;
                Ok((then_body, else_body))
            }
            Action::ElseIf(cond) => {
                let (nested_then, nested_else) = parse_if(stream, cond.clone(), defines, line)?;
                let else_body = vec![Node::If(IfNode {
                    cond,
                    then_body: nested_then,
                    else_body: nested_else,
                    slot: 0,
                })];
                Ok((then_body, else_body))
            }
            _ => Err(TemplateError::parse(line, "expected {{else}} or {{end}}")),
        },
        _ => Err(TemplateError::parse(open_line, "unclosed if: missing {{end}}")),
    }
}

fn parse_with(
    stream: &mut ItemStream,
    defines: &mut Vec<(String, Vec<Node>)>,
) -> Result<(Vec<Node>, Vec<Node>), TemplateError> {
    let body = parse_body(stream, BlockKind::WithBody, defines)?;
    match stream.next() {
        Some(RawItem::Action { body: action, line }) => match classify(&action, line)? {
            Action::End => Ok((body, Vec::new())),
            Action::Else => {
                let else_body = parse_body(stream, BlockKind::WithElse, defines)?;
                expect_end(stream, line)?;
                Ok((body, else_body))
            }
            _ => Err(TemplateError::parse(line, "expected {{else}} or {{end}}")),
        },
        _ => Err(TemplateError::parse(0, "unclosed with: missing {{end}}")),
    }
}

fn expect_end(stream: &mut ItemStream, line: usize) -> Result<(), TemplateError> {
    match stream.next() {
        Some(RawItem::Action { body, line }) => match classify(&body, line)? {
            Action::End => Ok(()),
            _ => Err(TemplateError::parse(line, "expected {{end}}")),
        },
        _ => Err(TemplateError::parse(line, "expected {{end}}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interp_field_path() {
        let tree = parse("<b>{{ .User.Name }}</b>").unwrap();
        assert_eq!(tree.roots.len(), 3);
        match &tree.roots[1] {
            Node::Interp(interp) => {
                assert_eq!(
                    interp.pipeline.stages[0].args[0],
                    Term::Dot(vec!["User".into(), "Name".into()])
                );
            }
            other => panic!("expected interp, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_end() {
        let tree = parse("{{if .Show}}<p>{{.Name}}</p>{{else}}<span>none</span>{{end}}").unwrap();
        let Node::If(if_node) = &tree.roots[0] else { panic!() };
        assert_eq!(if_node.then_body.len(), 3);
        assert_eq!(if_node.else_body.len(), 1);
    }

    #[test]
    fn test_else_if_desugars() {
        let tree = parse("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").unwrap();
        let Node::If(outer) = &tree.roots[0] else { panic!() };
        let Node::If(inner) = &outer.else_body[0] else { panic!() };
        assert_eq!(inner.then_body, vec![Node::Text("b".into())]);
        assert_eq!(inner.else_body, vec![Node::Text("c".into())]);
    }

    #[test]
    fn test_range_with_bindings() {
        let tree = parse("{{range $i, $v := .Items}}{{$v}}{{end}}").unwrap();
        let Node::Range(range) = &tree.roots[0] else { panic!() };
        assert_eq!(range.index_var.as_deref(), Some("i"));
        assert_eq!(range.value_var.as_deref(), Some("v"));
    }

    #[test]
    fn test_define_and_call() {
        let tree = parse(r#"{{define "item"}}<li>{{.}}</li>{{end}}{{template "item" .X}}"#).unwrap();
        assert!(tree.define("item").is_some());
        let Node::Call(call) = &tree.roots[0] else { panic!() };
        assert_eq!(call.name, "item");
        assert!(call.pipeline.is_some());
    }

    #[test]
    fn test_pipeline_stages() {
        let tree = parse(r#"{{ .Name | upper | printf "%s!" }}"#).unwrap();
        let Node::Interp(interp) = &tree.roots[0] else { panic!() };
        assert_eq!(interp.pipeline.stages.len(), 3);
        assert_eq!(interp.pipeline.stages[1].name.as_deref(), Some("upper"));
        assert_eq!(interp.pipeline.stages[2].name.as_deref(), Some("printf"));
    }

    #[test]
    fn test_variable_assign() {
        let tree = parse("{{$x := .Total}}{{$x}}").unwrap();
        let Node::Assign(assign) = &tree.roots[0] else { panic!() };
        assert_eq!(assign.name, "x");
    }

    #[test]
    fn test_unclosed_if_fails() {
        assert_eq!(parse("{{if .X}}oops").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_stray_end_fails() {
        assert_eq!(parse("{{end}}").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_stray_else_fails() {
        assert_eq!(parse("{{range .X}}{{else}}{{end}}").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_chained_bare_term_fails() {
        assert_eq!(parse("{{ .A | .B }}").unwrap_err().kind(), "ParseError");
    }
}
