use logos::Logos;
use std::fmt;
use thiserror::Error;

use crate::Span;

/// Token kinds of the bracket syntax. Atom variants keep the raw source
/// text; typed literal conversion happens in the AST builder.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")] // Skip whitespace
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("<")]
    StartList,
    #[token(">")]
    EndList,
    #[regex(r"(0|[1-9][0-9]*)(\.[0-9]+)?", number_literal)]
    Number(String),
    #[regex(r#""([^"\\]|\\.)*"?"#, string_literal)]
    String(String),
    #[token("if", text)]
    #[token("func", text)]
    #[token("import", text)]
    #[token("let", text)]
    #[token("array", text)]
    #[token("sys", text)]
    Operator(String),
    #[token("+", text)]
    #[token("-", text)]
    #[token("*", text)]
    #[token("/", text)]
    #[token("&", text)]
    #[token("|", text)]
    #[token("==", text)]
    #[token("!=", text)]
    #[token("!", text)]
    Arithmetic(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*", text)]
    Name(String),
    // Runs up to the next unescaped '>' or the end of the line.
    #[regex(r"#([^>\\\n]|\\.)*", text)]
    Comment(String),
}

fn text(lex: &mut logos::Lexer<TokenKind>) -> String {
    lex.slice().to_string()
}

// A number must not run straight into digits or identifier characters:
// "007" and "1abc" are malformed, not two tokens.
fn number_literal(lex: &mut logos::Lexer<TokenKind>) -> LexerResult<String> {
    let glued = lex
        .remainder()
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(lex.remainder().len());
    if glued > 0 {
        lex.bump(glued);
        return Err(LexerErrorKind::MalformedNumber);
    }
    Ok(lex.slice().to_string())
}

fn string_literal(lex: &mut logos::Lexer<TokenKind>) -> LexerResult<String> {
    let slice = lex.slice();
    if is_terminated(slice) {
        Ok(slice.to_string())
    } else {
        Err(LexerErrorKind::UnterminatedString)
    }
}

// The closing quote must exist and must not itself be escaped.
fn is_terminated(slice: &str) -> bool {
    if slice.len() < 2 || !slice.ends_with('"') {
        return false;
    }
    let body = &slice[1..slice.len() - 1];
    let trailing_backslashes = body.chars().rev().take_while(|&c| c == '\\').count();
    trailing_backslashes % 2 == 0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize,
}

// Implement Display for easy printing
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::StartList => write!(f, "<"),
            TokenKind::EndList => write!(f, ">"),
            TokenKind::Number(s)
            | TokenKind::String(s)
            | TokenKind::Operator(s)
            | TokenKind::Arithmetic(s)
            | TokenKind::Name(s)
            | TokenKind::Comment(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Malformed number literal")]
    MalformedNumber,
    #[default]
    #[error("No token matches the input")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} at line {line}, near `{rest}`")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
    pub line: usize,
    /// A prefix of the text that failed to match.
    pub rest: String,
}

// Result type alias for convenience
type LexerResult<T> = Result<T, LexerErrorKind>;

// Result type alias for convenience
type LexerRangedResult<T> = Result<T, LexerError>;

const REST_PREVIEW: usize = 24;

/// Scans `input` into tokens, stamping each one with its 1-based line.
pub fn tokenize(input: &str) -> LexerRangedResult<Vec<Token>> {
    let mut line = 1;
    let mut counted = 0;
    TokenKind::lexer(input)
        .spanned()
        .map(|(result, range)| {
            line += input[counted..range.start].matches('\n').count();
            counted = range.start;
            let span = Span::new(range.start, range.end);
            match result {
                Ok(kind) => Ok(Token { kind, span, line }),
                Err(error) => Err(LexerError {
                    error,
                    span,
                    line,
                    rest: input[range.start..]
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .chars()
                        .take(REST_PREVIEW)
                        .collect(),
                }),
            }
        })
        .collect()
}
