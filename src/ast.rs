//! AST builder: turns the raw token tree into typed, location-stamped nodes.

use crate::lexer::{Token, TokenKind, tokenize};
use crate::parser::{ParseError, ParseResult, Parser, TokenTree};
use crate::source::Span;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub line: usize,
    pub file: Rc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    String(String),
    Number(i64),
    Name(String),
    Operator(String),
    Arithmetic(String),
    Comment(String),
    List(Vec<Node>),
}

impl Node {
    pub fn new(kind: NodeKind, span: Span, line: usize, file: Rc<str>) -> Self {
        Node {
            kind,
            span,
            line,
            file,
        }
    }

    /// True for a comment atom and for a list whose head is a comment.
    pub fn is_comment(&self) -> bool {
        match &self.kind {
            NodeKind::Comment(_) => true,
            NodeKind::List(items) => {
                matches!(items.first(), Some(Node { kind: NodeKind::Comment(_), .. }))
            }
            _ => false,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::String(s) => write!(f, "{:?}", s),
            NodeKind::Number(n) => write!(f, "{}", n),
            NodeKind::Name(s)
            | NodeKind::Operator(s)
            | NodeKind::Arithmetic(s)
            | NodeKind::Comment(s) => write!(f, "{}", s),
            NodeKind::List(items) => {
                write!(f, "<")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Lexes, parses and builds `source` into the top-level node sequence,
/// stamping every node with `file`.
pub fn parse_program(source: &str, file: &str) -> ParseResult<Vec<Node>> {
    let tokens = tokenize(source)?;
    let trees = Parser::new(tokens).parse()?;
    build(trees, &Rc::from(file))
}

/// Single pass over the token tree. Comments that are not the head of
/// their list (atoms and comment-headed lists alike) are dropped here, so
/// special forms only see real operands.
pub fn build(trees: Vec<TokenTree>, file: &Rc<str>) -> ParseResult<Vec<Node>> {
    trees.into_iter().map(|tree| build_tree(tree, file)).collect()
}

fn build_tree(tree: TokenTree, file: &Rc<str>) -> ParseResult<Node> {
    let span = tree.span();
    match tree {
        TokenTree::Atom(token) => build_atom(token, file),
        TokenTree::List { open, items, .. } => {
            let mut nodes = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let node = build_tree(item, file)?;
                if index > 0 && node.is_comment() {
                    continue;
                }
                nodes.push(node);
            }
            Ok(Node::new(
                NodeKind::List(nodes),
                span,
                open.line,
                file.clone(),
            ))
        }
    }
}

fn build_atom(token: Token, file: &Rc<str>) -> ParseResult<Node> {
    let Token { kind, span, line } = token;
    let kind = match kind {
        TokenKind::String(text) => match unescape(&text[1..text.len() - 1]) {
            Ok(s) => NodeKind::String(s),
            Err(reason) => {
                return Err(ParseError::MalformedLiteral {
                    text,
                    reason,
                    span,
                    line,
                });
            }
        },
        TokenKind::Number(text) => parse_number(text),
        TokenKind::Name(name) => NodeKind::Name(name),
        TokenKind::Operator(op) => NodeKind::Operator(op),
        TokenKind::Arithmetic(op) => NodeKind::Arithmetic(op),
        TokenKind::Comment(text) => NodeKind::Comment(text),
        TokenKind::StartList | TokenKind::EndList => {
            return Err(ParseError::UnexpectedToken {
                found: Token { kind, span, line },
                expected: "an atom".to_string(),
            });
        }
    };
    Ok(Node::new(kind, span, line, file.clone()))
}

// Integer part of the literal; a value outside i64 stays as its raw text.
fn parse_number(text: String) -> NodeKind {
    let integer = text.split('.').next().unwrap_or_default();
    match integer.parse::<i64>() {
        Ok(n) => NodeKind::Number(n),
        Err(err) => {
            tracing::warn!(literal = %text, %err, "number literal kept as text");
            NodeKind::String(text)
        }
    }
}

fn unescape(s: &str) -> Result<String, String> {
    // un-escaping should only ever reduce the length of the string.
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('b') => result.push('\u{8}'),
            Some('f') => result.push('\u{c}'),
            Some('0') => result.push('\0'),
            Some(c @ ('\\' | '"' | '/' | '>')) => result.push(c),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("invalid unicode escape '\\u{}'", hex))?;
                result.push(decoded);
            }
            Some(c) => return Err(format!("unknown escape sequence '\\{}'", c)),
            None => return Err("dangling backslash".to_string()),
        }
    }
    Ok(result)
}
