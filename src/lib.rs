// Declare modules publicly so they are part of the library interface
pub mod ast;
pub mod config;
pub mod environment;
pub mod evaluator;
pub mod host;
pub mod lexer;
pub mod loader;
pub mod logging;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod stack;
pub mod types;

pub use ast::{Node, NodeKind, parse_program};
pub use config::VmConfig;
pub use environment::{Closure, EnvError};
pub use evaluator::{ErrorKind, EvalError, EvalResult, Vm};
pub use host::{HostError, HostRegistry};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser};
pub use source::Span;
pub use stack::{CallFrame, CallStack};
pub use types::{Lambda, NativeFunction, Value};
