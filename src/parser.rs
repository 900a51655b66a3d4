use crate::Span;
use crate::lexer::{LexerError, Token, TokenKind};
use std::vec::IntoIter; // To iterate over Vec<Token>
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Unexpected token '{}' at line {}, expected {expected}", found.kind, found.line)]
    UnexpectedToken { found: Token, expected: String },
    #[error("Unexpected end of input, expected {expected} to close the list opened at line {line}")]
    UnexpectedEof {
        expected: String,
        line: usize,
        open: Span,
    },
    #[error("Lists nested deeper than {limit} levels at line {line}")]
    NestingTooDeep { limit: usize, line: usize, span: Span },
    #[error("Lexer error: {0}")]
    LexerError(#[from] LexerError),
    #[error("Malformed literal {text} at line {line}: {reason}")]
    MalformedLiteral {
        text: String,
        reason: String,
        span: Span,
        line: usize,
    },
}

impl ParseError {
    /// Line of the offending input.
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { found, .. } => found.line,
            ParseError::UnexpectedEof { line, .. } => *line,
            ParseError::NestingTooDeep { line, .. } => *line,
            ParseError::LexerError(lex_err) => lex_err.line,
            ParseError::MalformedLiteral { line, .. } => *line,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { found, .. } => found.span,
            ParseError::UnexpectedEof { open, .. } => *open,
            ParseError::NestingTooDeep { span, .. } => *span,
            ParseError::LexerError(lex_err) => lex_err.span,
            ParseError::MalformedLiteral { span, .. } => *span,
        }
    }
}

// Result type alias for convenience
pub type ParseResult<T> = Result<T, ParseError>;

/// Raw bracket structure: atoms and the nested `<...>` regions they sit in.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenTree {
    Atom(Token),
    List {
        open: Token,
        items: Vec<TokenTree>,
        close: Span,
    },
}

impl TokenTree {
    pub fn span(&self) -> Span {
        match self {
            TokenTree::Atom(token) => token.span,
            TokenTree::List { open, close, .. } => open.span.merge(*close),
        }
    }
}

/// Deepest `<...>` nesting the parser accepts.
pub const MAX_NESTING: usize = 512;

pub struct Parser {
    // We iterate over owned Tokens, consuming them.
    tokens: IntoIter<Token>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens.into_iter(),
        }
    }

    // Consumes the next token if available.
    fn next_token(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    /// Parses one list after its opening `<` has been consumed. `depth`
    /// counts the lists already open around this one.
    fn parse_list(&mut self, open: Token, depth: usize) -> ParseResult<TokenTree> {
        if depth >= MAX_NESTING {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING,
                line: open.line,
                span: open.span,
            });
        }
        let mut items = Vec::new();
        loop {
            match self.next_token() {
                Some(Token {
                    kind: TokenKind::EndList,
                    span: close,
                    ..
                }) => return Ok(TokenTree::List { open, items, close }),
                Some(
                    token @ Token {
                        kind: TokenKind::StartList,
                        ..
                    },
                ) => items.push(self.parse_list(token, depth + 1)?),
                Some(atom) => items.push(TokenTree::Atom(atom)),
                None => {
                    return Err(ParseError::UnexpectedEof {
                        expected: "'>'".to_string(),
                        line: open.line,
                        open: open.span,
                    });
                }
            }
        }
    }

    /// Parses the whole token stream: a sequence of top-level lists and atoms.
    pub fn parse(mut self) -> ParseResult<Vec<TokenTree>> {
        let mut program = Vec::new();
        while let Some(token) = self.next_token() {
            match token.kind {
                TokenKind::StartList => program.push(self.parse_list(token, 0)?),
                TokenKind::EndList => {
                    return Err(ParseError::UnexpectedToken {
                        found: token,
                        expected: "'<' or an atom".to_string(),
                    });
                }
                _ => program.push(TokenTree::Atom(token)),
            }
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_trees(input: &str) -> ParseResult<Vec<TokenTree>> {
        Parser::new(tokenize(input)?).parse()
    }

    // Number of `<...>` pairs in the trees, nested ones included.
    fn count_lists(trees: &[TokenTree]) -> usize {
        trees
            .iter()
            .map(|tree| match tree {
                TokenTree::Atom(_) => 0,
                TokenTree::List { items, .. } => 1 + count_lists(items),
            })
            .sum()
    }

    #[test]
    fn test_empty_program() {
        assert_eq!(parse_trees("").unwrap(), vec![]);
    }

    #[test]
    fn test_nested_structure() {
        let trees = parse_trees("<func f <a b> <+ a b>>").unwrap();
        assert_eq!(trees.len(), 1);
        let TokenTree::List { items, .. } = &trees[0] else {
            panic!("Expected a list, got {:?}", trees[0]);
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], TokenTree::Atom(t) if t.kind == TokenKind::Operator("func".into())));
        assert!(matches!(&items[2], TokenTree::List { items, .. } if items.len() == 2));
        assert!(matches!(&items[3], TokenTree::List { items, .. } if items.len() == 3));
    }

    #[test]
    fn test_list_count_matches_bracket_pairs() {
        for input in ["<>", "<<>>", "<a <b <c>> <d>> <e>", "1 <2> \"x\" <<<>>>"] {
            let pairs = input.matches('<').count();
            let trees = parse_trees(input).unwrap();
            assert_eq!(count_lists(&trees), pairs, "Input: '{}'", input);
        }
    }

    #[test]
    fn test_top_level_atoms() {
        let trees = parse_trees(r#""test" 22"#).unwrap();
        assert_eq!(trees.len(), 2);
        assert!(trees.iter().all(|t| matches!(t, TokenTree::Atom(_))));
    }

    #[test]
    fn test_unterminated_list() {
        let err = parse_trees("<let x\n <array 1 2>").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { line: 1, .. }), "{err:?}");
        assert!(matches!(parse_trees("<<>"), Err(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_extra_close() {
        assert!(matches!(parse_trees("<a>>"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_trees(">"), Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "<array ".repeat(depth), ">".repeat(depth));
        assert!(parse_trees(&nested(MAX_NESTING)).is_ok());
        let err = parse_trees(&nested(2000)).unwrap_err();
        assert!(
            matches!(err, ParseError::NestingTooDeep { limit: MAX_NESTING, line: 1, .. }),
            "{err:?}"
        );
        assert_eq!(err.span().start, MAX_NESTING * "<array ".len());
    }

    #[test]
    fn test_lexer_error_propagates() {
        assert!(matches!(parse_trees("<a $>"), Err(ParseError::LexerError(_))));
    }

    #[test]
    fn test_list_span() {
        let trees = parse_trees("  <a <b>>").unwrap();
        assert_eq!(trees[0].span(), Span::new(2, 9));
    }
}
