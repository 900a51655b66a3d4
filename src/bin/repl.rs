use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use chevron::config::PATH_ENV;
use chevron::evaluator::special_form_identifiers;
use chevron::{Closure, TokenKind, Vm, VmConfig, logging, tokenize};
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Helper, Highlighter, Hinter, Validator};

const HISTORY_FILE: &str = "chevron_history.txt";
const REPL_FILE: &str = "<repl>";

struct ChevronCompleter {
    root: Rc<RefCell<Closure>>,
}

impl rustyline::completion::Completer for ChevronCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let prefix = match tokenize(&line[..pos]) {
            Ok(tokens) => match tokens.last().map(|t| &t.kind) {
                Some(TokenKind::Name(prefix)) if tokens.last().map(|t| t.span.end) == Some(pos) => {
                    prefix.clone()
                }
                _ => return Ok((pos, vec![])),
            },
            Err(_) => return Ok((pos, vec![])),
        };
        let mut candidates: Vec<String> = self
            .root
            .borrow()
            .get_identifiers()
            .union(&special_form_identifiers())
            .filter_map(|id| id.strip_prefix(prefix.as_str()).map(str::to_string))
            .filter(|rest| !rest.is_empty())
            .collect();
        candidates.sort();
        Ok((pos, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputHelper {
    #[rustyline(Validator)]
    validator: ChevronValidator,
    #[rustyline(Highlighter)]
    highlighter: ChevronHighlighter,
    #[rustyline(Completer)]
    completer: ChevronCompleter,
}

/// Character classes the validator and highlighter care about.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Class {
    Open,
    Close,
    Str,
    Comment,
    Other,
}

/// Classifies each char of `line`, tracking string and comment state.
/// The flag is set when `line` ends inside a string literal.
fn classify(line: &str) -> (Vec<(usize, char, Class)>, bool) {
    let mut out = Vec::with_capacity(line.len());
    let mut in_string = false;
    let mut in_comment = false;
    let mut escape = false;

    for (i, c) in line.char_indices() {
        if in_string || in_comment {
            let class = if in_string { Class::Str } else { Class::Comment };
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if in_string && c == '"' {
                in_string = false;
            } else if in_comment && (c == '\n' || c == '>') {
                in_comment = false;
                let class = if c == '>' { Class::Close } else { Class::Other };
                out.push((i, c, class));
                continue;
            }
            out.push((i, c, class));
            continue;
        }
        let class = match c {
            '"' => {
                in_string = true;
                Class::Str
            }
            '#' => {
                in_comment = true;
                Class::Comment
            }
            '<' => Class::Open,
            '>' => Class::Close,
            _ => Class::Other,
        };
        out.push((i, c, class));
    }
    (out, in_string)
}

struct ChevronValidator;

impl Validator for ChevronValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();
        if input.trim_start().starts_with(':') {
            return Ok(ValidationResult::Valid(None));
        }
        let (chars, in_string) = classify(input);
        let mut depth = 0usize;
        for (i, _, class) in chars {
            match class {
                Class::Open => depth += 1,
                Class::Close if depth == 0 => {
                    return Ok(ValidationResult::Invalid(Some(format!(
                        "  - Unmatched '>' at position {}",
                        i
                    ))));
                }
                Class::Close => depth -= 1,
                _ => {}
            }
        }

        if depth > 0 || in_string {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

struct ChevronHighlighter;

impl Highlighter for ChevronHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        // (piece index, byte offset) of each unclosed '<'
        let mut open: Vec<(usize, usize)> = Vec::new();
        let mut pieces: Vec<String> = Vec::new();

        for (i, c, class) in classify(line).0 {
            let piece = match class {
                Class::Str => format!("\x1b[32m{}\x1b[0m", c), // Green for strings
                Class::Comment => format!("\x1b[90m{}\x1b[0m", c),
                Class::Open => {
                    open.push((pieces.len(), i));
                    c.to_string()
                }
                Class::Close => match open.pop() {
                    Some((matching, opened_at)) => {
                        if i + 1 == pos || opened_at + 1 == pos {
                            pieces[matching] = "\x1b[1;34m<\x1b[0m".to_string();
                            format!("\x1b[34m{}\x1b[0m", c) // Blue for matching brackets
                        } else {
                            c.to_string()
                        }
                    }
                    None => format!("\x1b[31m{}\x1b[0m", c), // Red for unmatched
                },
                Class::Other => c.to_string(),
            };
            pieces.push(piece);
        }

        Cow::Owned(pieces.concat())
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn run_command(vm: &Vm, command: &str) {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some(":closures"), None) => print!("{}", vm.dump_closures()),
        (Some(":get"), Some(name)) => match vm.get_var(name) {
            Ok(value) => println!("{}", value),
            Err(err) => eprintln!("{}", err),
        },
        _ => eprintln!("Commands: :closures, :get <name>"),
    }
}

fn main() -> rustyline::Result<()> {
    logging::init();
    println!("Chevron REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let config = VmConfig::new().env_search_path(PATH_ENV).search_dir(".");
    let mut vm = Vm::with_config(config);
    let helper = InputHelper {
        validator: ChevronValidator,
        highlighter: ChevronHighlighter,
        completer: ChevronCompleter { root: vm.root() },
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(rustyline::EditMode::Vi)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(HISTORY_FILE).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("chevron> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("exit") {
                    break;
                }
                if input.starts_with(':') {
                    run_command(&vm, input);
                    continue;
                }
                match vm.run_source(input, REPL_FILE) {
                    Ok(value) => println!("{}", value),
                    Err(err) => {
                        eprintln!("{}", err);
                        if let Err(io_err) = err.pretty_print(REPL_FILE, input) {
                            eprintln!("could not render error report: {}", io_err);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(HISTORY_FILE)
}
