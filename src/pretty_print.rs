use crate::evaluator::{ErrorKind, EvalError};
use crate::parser::ParseError;
use ariadne::{Color, Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

type SourceSpan<'a> = (&'a str, Range<usize>);

impl ParseError {
    fn report<'a>(&self, file: &'a str, input: &str) -> Report<'a, SourceSpan<'a>> {
        let report = match self {
            ParseError::UnexpectedToken { found, expected } => {
                Report::build(ReportKind::Error, (file, found.span.to_range()))
                    .with_message(format!("Unexpected token: {}", found.kind))
                    .with_label(
                        Label::new((file, found.span.to_range()))
                            .with_message(format!("Expected {expected}"))
                            .with_color(Color::Red),
                    )
            }
            ParseError::UnexpectedEof { expected, open, .. } => {
                let end = input.len();
                Report::build(ReportKind::Error, (file, end..end))
                    .with_message("Unexpected end of input")
                    .with_label(
                        Label::new((file, open.to_range()))
                            .with_message(format!("This list needs {expected}"))
                            .with_color(Color::Yellow),
                    )
                    .with_label(
                        Label::new((file, end..end))
                            .with_message("Input ends here")
                            .with_color(Color::Red),
                    )
            }
            ParseError::NestingTooDeep { limit, span, .. } => {
                Report::build(ReportKind::Error, (file, span.to_range()))
                    .with_message(format!("Lists nested deeper than {} levels", limit))
                    .with_label(
                        Label::new((file, span.to_range()))
                            .with_message("This list is one level too deep")
                            .with_color(Color::Red),
                    )
            }
            ParseError::LexerError(lex_err) => {
                Report::build(ReportKind::Error, (file, lex_err.span.to_range()))
                    .with_message("Lexer error")
                    .with_label(
                        Label::new((file, lex_err.span.to_range()))
                            .with_message(lex_err.error.to_string())
                            .with_color(Color::Red),
                    )
            }
            ParseError::MalformedLiteral { text, reason, span, .. } => {
                Report::build(ReportKind::Error, (file, span.to_range()))
                    .with_message(format!("Malformed literal {}", text))
                    .with_label(
                        Label::new((file, span.to_range()))
                            .with_message(reason)
                            .with_color(Color::Red),
                    )
            }
        };
        report.finish()
    }

    /// Writes an annotated report of this error in `input` to stderr.
    pub fn pretty_print(&self, file: &str, input: &str) -> io::Result<()> {
        self.report(file, input)
            .eprint((file, Source::from(input)))
    }
}

fn label_message(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::UnknownVariable(_) => "Not bound in any enclosing closure".to_string(),
        ErrorKind::NotCallable { found, .. } => format!("A {} cannot be called", found),
        ErrorKind::Arity { expected, found, .. } => {
            format!("Expected {} operands, found {}", expected, found)
        }
        ErrorKind::TypeMismatch { expected, found, .. } => {
            format!("Expected {}, found {}", expected, found)
        }
        ErrorKind::ModuleNotFound(_) | ErrorKind::Io { .. } => {
            "Imported here".to_string()
        }
        ErrorKind::HostCall { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

impl EvalError {
    /// Writes an annotated report to stderr when `input` is the source
    /// of `file`. Errors raised inside other files (imported modules) are
    /// left to the plain [`std::fmt::Display`] form.
    pub fn pretty_print(&self, file: &str, input: &str) -> io::Result<()> {
        if &*self.file != file {
            return Ok(());
        }
        if let ErrorKind::Parse(parse_err) = &self.kind {
            return parse_err.pretty_print(file, input);
        }
        let range = self.span.to_range();
        Report::build(ReportKind::Error, (file, range.clone()))
            .with_message(self.kind.to_string())
            .with_label(
                Label::new((file, range))
                    .with_message(label_message(&self.kind))
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((file, Source::from(input)))
    }
}
