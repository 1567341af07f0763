//! # Lexer - Action Splitter
//!
//! First pass over template source: splits the byte stream into literal
//! text runs and `{{ … }}` action bodies. Trim markers (`{{-` / `-}}`)
//! are resolved here so the parser only ever sees clean action text.

use crate::error::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One raw item of the source stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    Text(String),
    Action {
        /// The trimmed text between the delimiters.
        body: String,
        /// 1-based source line of the opening delimiter.
        line: usize,
    },
}

/// Split source into text and action items.
///
/// An unterminated `{{` is a parse error. `{{/* … */}}` comments are
/// consumed here and produce no item.
pub fn lex(source: &str) -> Result<Vec<RawItem>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut line = 1usize;

    while let Some(open) = rest.find(OPEN) {
        let (text, after) = rest.split_at(open);
        line += count_lines(text);
        if !text.is_empty() {
            items.push(RawItem::Text(text.to_string()));
        }

        let action_line = line;
        let after = &after[OPEN.len()..];
        let Some(close) = after.find(CLOSE) else {
            return Err(TemplateError::parse(action_line, "unterminated {{ action"));
        };
        let (raw_body, after_close) = after.split_at(close);
        line += count_lines(raw_body);
        rest = &after_close[CLOSE.len()..];

        let mut body = raw_body;
        // Left trim marker: eat trailing whitespace of the preceding text.
        if let Some(stripped) = body.strip_prefix('-') {
            if stripped.starts_with(char::is_whitespace) || stripped.is_empty() {
                body = stripped;
                if let Some(RawItem::Text(prev)) = items.last_mut() {
                    truncate_trailing_ws(prev);
                    if prev.is_empty() {
                        items.pop();
                    }
                }
            }
        }
        // Right trim marker: eat leading whitespace of the following text.
        let mut trim_right = false;
        if let Some(stripped) = body.strip_suffix('-') {
            if stripped.ends_with(char::is_whitespace) || stripped.is_empty() {
                body = stripped;
                trim_right = true;
            }
        }
        if trim_right {
            rest = rest.trim_start_matches(|c: char| {
                if c == '\n' {
                    line += 1;
                }
                c.is_whitespace()
            });
        }

        let body = body.trim();
        if body.is_empty() {
            return Err(TemplateError::parse(action_line, "empty {{ }} action"));
        }
        if body.starts_with("/*") {
            if !body.ends_with("*/") {
                return Err(TemplateError::parse(action_line, "unterminated comment"));
            }
            continue;
        }

        items.push(RawItem::Action { body: body.to_string(), line: action_line });
    }

    if rest.contains(CLOSE) {
        return Err(TemplateError::parse(line, "unexpected }} outside action"));
    }
    if !rest.is_empty() {
        items.push(RawItem::Text(rest.to_string()));
    }
    Ok(items)
}

fn count_lines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

fn truncate_trailing_ws(s: &mut String) {
    let trimmed = s.trim_end().len();
    s.truncate(trimmed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let items = lex("<div>hi</div>").unwrap();
        assert_eq!(items, vec![RawItem::Text("<div>hi</div>".into())]);
    }

    #[test]
    fn test_text_and_actions() {
        let items = lex("a{{ .X }}b").unwrap();
        assert_eq!(
            items,
            vec![
                RawItem::Text("a".into()),
                RawItem::Action { body: ".X".into(), line: 1 },
                RawItem::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let items = lex("line1\nline2\n{{ .X }}").unwrap();
        assert_eq!(items[1], RawItem::Action { body: ".X".into(), line: 3 });
    }

    #[test]
    fn test_trim_markers() {
        let items = lex("a   {{- .X -}}   b").unwrap();
        assert_eq!(
            items,
            vec![
                RawItem::Text("a".into()),
                RawItem::Action { body: ".X".into(), line: 1 },
                RawItem::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_comment_consumed() {
        let items = lex("a{{/* note */}}b").unwrap();
        assert_eq!(items, vec![RawItem::Text("a".into()), RawItem::Text("b".into())]);
    }

    #[test]
    fn test_unterminated_action() {
        let err = lex("a{{ .X").unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[test]
    fn test_stray_close() {
        let err = lex("a }} b").unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }
}
