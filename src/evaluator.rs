use crate::ast::{Node, NodeKind, parse_program};
use crate::config::VmConfig;
use crate::environment::{Closure, EnvError};
use crate::host::{HostError, HostRegistry};
use crate::loader::{LoadError, ModuleLoader};
use crate::parser::ParseError;
use crate::primitives;
use crate::source::Span;
use crate::stack::{CallFrame, CallStack};
use crate::types::{Lambda, NativeFunction, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;

type Env = Rc<RefCell<Closure>>;

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("Unknown variable {0}")]
    UnknownVariable(String),
    #[error("Undefined operator {0}")]
    UndefinedOperator(String),
    #[error("Undefined arithmetic {0}")]
    UndefinedArithmetic(String),
    #[error("{callee} is not callable ({found})")]
    NotCallable { callee: String, found: &'static str },
    #[error("Wrong number of arguments in {form}: expected {expected}, got {found}")]
    Arity {
        form: String,
        expected: &'static str,
        found: usize,
    },
    #[error("Invalid special form: {0}")]
    InvalidSpecialForm(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Arithmetic overflow in {0}")]
    Overflow(String),
    #[error("Unknown module {0}")]
    ModuleNotFound(String),
    #[error("Cannot read module {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("Host call {path} failed: {source}")]
    HostCall { path: String, source: HostError },
    #[error("Maximum call depth of {0} exceeded")]
    RecursionLimit(usize),
}

impl From<EnvError> for ErrorKind {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::UnknownVariable(name) => ErrorKind::UnknownVariable(name),
        }
    }
}

impl From<LoadError> for ErrorKind {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound(module) => ErrorKind::ModuleNotFound(module),
            LoadError::Io { path, message } => ErrorKind::Io { path, message },
        }
    }
}

/// A runtime failure: what went wrong, where, and the call frames that
/// were open at that point (innermost first).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub file: Rc<str>,
    pub line: usize,
    pub span: Span,
    pub trace: Vec<CallFrame>,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.kind)?;
        for frame in &self.trace {
            write!(f, "\n\t{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

// Result type alias for convenience
pub type EvalResult<T = Value> = Result<T, EvalError>;

// --- Special forms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    If,
    Func,
    Import,
    Let,
    Array,
    Sys,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::If,
        Operator::Func,
        Operator::Import,
        Operator::Let,
        Operator::Array,
        Operator::Sys,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Operator::If => "if",
            Operator::Func => "func",
            Operator::Import => "import",
            Operator::Let => "let",
            Operator::Array => "array",
            Operator::Sys => "sys",
        }
    }
}

impl FromStr for Operator {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.keyword() == s)
            .ok_or_else(|| ErrorKind::UndefinedOperator(s.to_string()))
    }
}

pub fn special_form_identifiers() -> HashSet<String> {
    Operator::ALL
        .iter()
        .map(|op| op.keyword().to_string())
        .collect()
}

// --- The VM ---

// Remaining native stack below which evaluation moves to a fresh segment.
const STACK_RED_ZONE: usize = 100 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Tree-walking evaluator. Owns the root closure and the diagnostic call
/// stack; every embedding constructs its own instance.
pub struct Vm {
    root: Env,
    stack: CallStack,
    loader: ModuleLoader,
    host: HostRegistry,
    max_call_depth: usize,
    anonymous_count: usize,
}

impl Vm {
    /// A VM with the default host table and the given module directories.
    pub fn new<I, P>(search_path: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Vm::with_config(VmConfig::new().search_dirs(search_path))
    }

    pub fn with_config(config: VmConfig) -> Self {
        let root = Closure::new_root(&config.root_name);
        let path = config
            .search_path
            .iter()
            .map(|dir| Value::String(dir.display().to_string()))
            .collect();
        root.borrow_mut().define("PATH", Value::array(path));
        Vm {
            root,
            stack: CallStack::new(),
            loader: ModuleLoader::new(config.search_path),
            host: config.host,
            max_call_depth: config.max_call_depth,
            anonymous_count: 0,
        }
    }

    pub fn root(&self) -> Env {
        self.root.clone()
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn host(&self) -> &HostRegistry {
        &self.host
    }

    pub fn search_path(&self) -> &[PathBuf] {
        self.loader.search_path()
    }

    /// Debugger query: resolves `name` from the root closure.
    pub fn get_var(&self, name: &str) -> Result<Value, EnvError> {
        self.root.borrow().get(name)
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.root.borrow_mut().define(name, value);
    }

    /// Binds a host function in the root closure so scripts can call it by name.
    pub fn define_native<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + 'static,
    {
        self.define(name, Value::Native(NativeFunction::new(name, func)));
    }

    /// Debugger dump of the root closure's bindings.
    pub fn dump_closures(&self) -> String {
        self.root.borrow().dump()
    }

    /// Executes a parsed program in the root closure and returns the value
    /// of its last expression.
    pub fn run(&mut self, program: &[Node]) -> EvalResult {
        let root = self.root.clone();
        let result = self.execute(program, &root);
        if result.is_err() {
            self.stack.clear();
        }
        result
    }

    /// Parses `source` (attributing it to `file`) and runs it.
    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn run_source(&mut self, source: &str, file: &str) -> EvalResult {
        let program = parse_program(source, file).map_err(|err| self.parse_error(err, file))?;
        self.run(&program)
    }

    fn error(&self, kind: impl Into<ErrorKind>, at: &Node) -> EvalError {
        EvalError {
            kind: kind.into(),
            file: at.file.clone(),
            line: at.line,
            span: at.span,
            trace: self.stack.snapshot(),
        }
    }

    fn parse_error(&self, err: ParseError, file: &str) -> EvalError {
        EvalError {
            file: Rc::from(file),
            line: err.line(),
            span: err.span(),
            kind: ErrorKind::Parse(err),
            trace: self.stack.snapshot(),
        }
    }

    fn arity(&self, form: impl Into<String>, expected: &'static str, found: usize, at: &Node) -> EvalError {
        self.error(
            ErrorKind::Arity {
                form: form.into(),
                expected,
                found,
            },
            at,
        )
    }

    /// Evaluates a sequence in order; the last value is the result.
    /// Comments are skipped and leave the result untouched.
    pub fn execute(&mut self, nodes: &[Node], env: &Env) -> EvalResult {
        let mut result = Value::Null;
        for node in nodes.iter().filter(|node| !node.is_comment()) {
            result = self.evaluate(node, env)?;
        }
        Ok(result)
    }

    fn evaluate_all(&mut self, nodes: &[Node], env: &Env) -> EvalResult<Vec<Value>> {
        nodes.iter().map(|node| self.evaluate(node, env)).collect()
    }

    /// Evaluates a single node within `env`. The native stack grows on
    /// demand, so script recursion is bounded only by `max_call_depth`.
    pub fn evaluate(&mut self, node: &Node, env: &Env) -> EvalResult {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.evaluate_node(node, env))
    }

    fn evaluate_node(&mut self, node: &Node, env: &Env) -> EvalResult {
        match &node.kind {
            NodeKind::String(s) => Ok(Value::String(s.clone())),
            NodeKind::Number(n) => Ok(Value::Number(*n)),
            NodeKind::Name(name) => {
                let value = env.borrow().get(name);
                value.map_err(|err| self.error(err, node))
            }
            NodeKind::Comment(_) => Ok(Value::Null),
            NodeKind::Operator(op) | NodeKind::Arithmetic(op) => Err(self.error(
                ErrorKind::InvalidSpecialForm(format!(
                    "'{}' can only appear at the head of a list",
                    op
                )),
                node,
            )),
            NodeKind::List(items) => self.evaluate_list(node, items, env),
        }
    }

    fn evaluate_list(&mut self, form: &Node, items: &[Node], env: &Env) -> EvalResult {
        let Some((head, rest)) = items.split_first() else {
            return Ok(Value::Null);
        };
        match &head.kind {
            NodeKind::List(_) => {
                let callee = self.evaluate(head, env)?;
                self.call(callee, head, rest, form, env)
            }
            NodeKind::Operator(op) => self.special_form(op, form, rest, env),
            NodeKind::Arithmetic(op) => {
                let args = self.evaluate_all(rest, env)?;
                primitives::apply(op, &args).map_err(|kind| self.error(kind, form))
            }
            NodeKind::Name(name) => {
                let callee = env.borrow().get(name);
                let callee = callee.map_err(|err| self.error(err, head))?;
                self.call(callee, head, rest, form, env)
            }
            NodeKind::String(_) | NodeKind::Number(_) => {
                let callee = self.evaluate(head, env)?;
                self.call(callee, head, rest, form, env)
            }
            NodeKind::Comment(_) => Ok(Value::Null),
        }
    }

    fn special_form(&mut self, op: &str, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let operator = op
            .parse::<Operator>()
            .map_err(|kind| self.error(kind, form))?;
        match operator {
            Operator::Let => self.evaluate_let(form, rest, env),
            Operator::Func => self.evaluate_func(form, rest, env),
            Operator::If => self.evaluate_if(form, rest, env),
            Operator::Array => Ok(Value::array(self.evaluate_all(rest, env)?)),
            Operator::Import => self.evaluate_import(form, rest, env),
            Operator::Sys => self.evaluate_sys(form, rest, env),
        }
    }

    fn evaluate_let(&mut self, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let [target, expr] = rest else {
            return Err(self.arity("let", "2", rest.len(), form));
        };
        let Some(name) = target.as_name() else {
            return Err(self.error(
                ErrorKind::InvalidSpecialForm(format!("let expects a name, got {}", target)),
                target,
            ));
        };
        let value = self.evaluate(expr, env)?;
        env.borrow_mut().define(name, value.clone());
        Ok(value)
    }

    fn evaluate_func(&mut self, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let (name, params, body) = match rest.first().map(|node| &node.kind) {
            Some(NodeKind::List(_)) if rest.len() >= 2 => (None, &rest[0], &rest[1..]),
            Some(NodeKind::Name(name)) if rest.len() >= 3 => {
                (Some(name.clone()), &rest[1], &rest[2..])
            }
            Some(NodeKind::Name(name)) => {
                return Err(self.arity(format!("func {}", name), "at least 3", rest.len(), form));
            }
            Some(NodeKind::List(_)) | None => {
                return Err(self.arity("func", "at least 2", rest.len(), form));
            }
            Some(_) => {
                return Err(self.error(
                    ErrorKind::InvalidSpecialForm(format!(
                        "func expects a name or a parameter list, got {}",
                        rest[0]
                    )),
                    &rest[0],
                ));
            }
        };

        let param_names = params
            .as_list()
            .ok_or_else(|| format!("func expects a parameter list, got {}", params))
            .and_then(|nodes| {
                nodes
                    .iter()
                    .map(|node| {
                        node.as_name()
                            .map(str::to_string)
                            .ok_or_else(|| format!("parameter must be a name, got {}", node))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|msg| self.error(ErrorKind::InvalidSpecialForm(msg), params))?;

        let lambda = Rc::new(Lambda {
            name: name.clone().unwrap_or_else(|| self.anonymous_name()),
            params: param_names,
            body: Rc::from(body),
            closure: env.clone(),
        });
        if let Some(name) = name {
            env.borrow_mut().define(&name, Value::Lambda(lambda.clone()));
        }
        Ok(Value::Lambda(lambda))
    }

    fn anonymous_name(&mut self) -> String {
        self.anonymous_count += 1;
        format!("_lambda{}", self.anonymous_count)
    }

    fn evaluate_if(&mut self, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let [condition, consequent, alternate @ ..] = rest else {
            return Err(self.arity("if", "2 or 3", rest.len(), form));
        };
        if alternate.len() > 1 {
            return Err(self.arity("if", "2 or 3", rest.len(), form));
        }
        if self.evaluate(condition, env)?.is_truthy() {
            self.evaluate(consequent, env)
        } else if let [alternate] = alternate {
            self.evaluate(alternate, env)
        } else {
            Ok(Value::Null)
        }
    }

    /// Runs the module's nodes in `env` itself, like a textual include.
    /// Nothing is cached: every import re-reads and re-executes the file.
    fn evaluate_import(&mut self, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let [module] = rest else {
            return Err(self.arity("import", "1", rest.len(), form));
        };
        let module_name = match self.evaluate(module, env)? {
            Value::String(name) => name,
            other => {
                return Err(self.error(
                    ErrorKind::TypeMismatch {
                        operation: "import".to_string(),
                        expected: "string",
                        found: other.type_name(),
                    },
                    module,
                ));
            }
        };
        let (path, source) = self
            .loader
            .load(&module_name)
            .map_err(|err| self.error(err, form))?;
        let file = path.display().to_string();
        let program = parse_program(&source, &file).map_err(|err| self.parse_error(err, &file))?;
        self.execute(&program, env)
    }

    fn evaluate_sys(&mut self, form: &Node, rest: &[Node], env: &Env) -> EvalResult {
        let Some((args_node, path_nodes)) = rest.split_last().filter(|(_, path)| !path.is_empty())
        else {
            return Err(self.arity("sys", "at least 2", rest.len(), form));
        };
        let mut segments = Vec::with_capacity(path_nodes.len());
        for node in path_nodes {
            match self.evaluate(node, env)? {
                Value::String(segment) => segments.push(segment),
                other => {
                    return Err(self.error(
                        ErrorKind::TypeMismatch {
                            operation: "sys".to_string(),
                            expected: "string",
                            found: other.type_name(),
                        },
                        node,
                    ));
                }
            }
        }
        let path = segments.join(".");
        let Some(arg_nodes) = args_node.as_list() else {
            return Err(self.error(
                ErrorKind::InvalidSpecialForm(format!(
                    "sys expects an argument list after {}, got {}",
                    path, args_node
                )),
                args_node,
            ));
        };
        let args = self.evaluate_all(arg_nodes, env)?;
        let Some(native) = self.host.get(&path) else {
            return Err(self.error(
                ErrorKind::HostCall {
                    source: HostError::UnknownSymbol(path.clone()),
                    path,
                },
                form,
            ));
        };
        tracing::debug!(%path, args = args.len(), "host call");
        native
            .call(&args)
            .map_err(|source| self.error(ErrorKind::HostCall { path, source }, form))
    }

    /// Calls `callee` with the evaluated `args`. `head` is the callee's
    /// expression and `form` the whole call, used for diagnostics.
    fn call(&mut self, callee: Value, head: &Node, args: &[Node], form: &Node, env: &Env) -> EvalResult {
        match callee {
            Value::Native(native) => {
                let values = self.evaluate_all(args, env)?;
                tracing::debug!(name = native.name(), args = values.len(), "native call");
                native.call(&values).map_err(|source| {
                    self.error(
                        ErrorKind::HostCall {
                            path: native.name().to_string(),
                            source,
                        },
                        form,
                    )
                })
            }
            Value::Lambda(lambda) => {
                let values = self.evaluate_all(args, env)?;
                self.apply_lambda(&lambda, values, form, env)
            }
            other => Err(self.error(
                ErrorKind::NotCallable {
                    callee: head.to_string(),
                    found: other.type_name(),
                },
                form,
            )),
        }
    }

    /// Runs a lambda body in a fresh child of the lambda's *defining*
    /// closure. Parameters bind positionally; missing ones are null and
    /// extras are only reachable through `__arguments__`.
    fn apply_lambda(&mut self, lambda: &Lambda, args: Vec<Value>, call_site: &Node, caller: &Env) -> EvalResult {
        if self.stack.depth() >= self.max_call_depth {
            return Err(self.error(ErrorKind::RecursionLimit(self.max_call_depth), call_site));
        }
        self.stack.push(CallFrame {
            file: call_site.file.clone(),
            line: call_site.line,
            closure: caller.borrow().name().to_string(),
            function: lambda.name.clone(),
        });

        let frame = Closure::new_enclosed(lambda.closure.clone(), &lambda.name);
        {
            let mut scope = frame.borrow_mut();
            for (index, param) in lambda.params.iter().enumerate() {
                scope.define(param, args.get(index).cloned().unwrap_or(Value::Null));
            }
            scope.define("__arguments__", Value::array(args));
            scope.define("__name__", Value::String(lambda.name.clone()));
        }

        let result = self.execute(&lambda.body, &frame);
        self.stack.pop();
        result
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exec(input: &str) -> EvalResult {
        Vm::new(Vec::<PathBuf>::new()).run_source(input, "<test_script>")
    }

    // Helper to evaluate input and compare the resulting value
    fn assert_eval(input: &str, expected: Value) {
        match exec(input) {
            Ok(value) => assert_eq!(value, expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    // Helper to assert evaluation errors by variant
    fn assert_eval_error(input: &str, expected: &ErrorKind) -> EvalError {
        match exec(input) {
            Ok(value) => panic!(
                "Expected evaluation to fail for input '{}', but got: {:?}",
                input, value
            ),
            Err(e) => {
                assert_eq!(
                    std::mem::discriminant(&e.kind),
                    std::mem::discriminant(expected),
                    "Input: '{}', Expected error variant like {:?}, got: {:?}",
                    input,
                    expected,
                    e
                );
                e
            }
        }
    }

    fn num(n: i64) -> Value {
        Value::Number(n)
    }

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn unknown() -> ErrorKind {
        ErrorKind::UnknownVariable(String::new())
    }

    fn arity() -> ErrorKind {
        ErrorKind::Arity {
            form: String::new(),
            expected: "",
            found: 0,
        }
    }

    fn not_callable() -> ErrorKind {
        ErrorKind::NotCallable {
            callee: String::new(),
            found: "",
        }
    }

    #[test]
    fn test_literals() {
        assert_eval(r#""test""#, string("test"));
        assert_eval("22", num(22));
        assert_eval("", Value::Null);
        assert_eval("<>", Value::Null);
    }

    #[test]
    fn test_array() {
        assert_eval(
            r#"<array 1 2 "a">"#,
            Value::array(vec![num(1), num(2), string("a")]),
        );
        assert_eval("<array>", Value::array(vec![]));
        assert_eval(
            "<array <+ 1 1> <array 3>>",
            Value::array(vec![num(2), Value::array(vec![num(3)])]),
        );
    }

    #[test]
    fn test_arithmetic_forms() {
        assert_eval("<+ 1 2 3>", num(6));
        assert_eval("<- 10 1 2>", num(7));
        assert_eval("<== 1 1>", Value::Boolean(true));
        assert_eval("<!= 1 1>", Value::Boolean(false));
        assert_eval("<! 0>", Value::Boolean(true));
        assert_eval("<* 2 <+ 1 2>>", num(6));
    }

    #[test]
    fn test_last_expression_is_result() {
        assert_eval("<let a 1> <let b 2> <+ a b>", num(3));
        assert_eval("<let a <array 1 2 3>>", Value::array(vec![num(1), num(2), num(3)]));
    }

    #[test]
    fn test_comments_are_no_ops() {
        assert_eval("<let a 5> <# trailing comment>", num(5));
        assert_eval("7 # line comment", num(7));
        assert_eval("<+ 1 # one more\n 1>", num(2));
        assert_eval("<func f <> 3 <# done>> <f>", num(3));
    }

    #[test]
    fn test_comment_lists_do_not_shift_operands() {
        assert_eval("<+ 1 <# skipped> 2>", num(3));
        assert_eval(
            "<func f <a b> __arguments__> <f <# note> 2 3>",
            Value::array(vec![num(2), num(3)]),
        );
        assert_eval("<func f <a> a> <f <# note> 4>", num(4));
    }

    const COUNTDOWN: &str = "<func down <n> <if <== n 0> 0 <down <- n 1>>>>";

    #[test]
    fn test_deep_recursion_returns_normally() {
        assert_eval(&format!("{} <down 3000>", COUNTDOWN), num(0));
    }

    #[test]
    fn test_call_depth_limit() {
        let mut vm = Vm::with_config(VmConfig::new().max_call_depth(50));
        assert_eq!(
            vm.run_source(&format!("{} <down 49>", COUNTDOWN), "<test>"),
            Ok(num(0))
        );
        let err = vm
            .run_source(&format!("{} <down 100>", COUNTDOWN), "<test>")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionLimit(50));
        assert_eq!(err.trace.len(), 50);
        assert!(err.trace.iter().all(|frame| frame.function == "down"));
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn test_if_selects_one_branch() {
        assert_eval("<if 1 10 20>", num(10));
        assert_eval("<if 0 10 20>", num(20));
        assert_eval(r#"<if "" 10 20>"#, num(20));
        assert_eval("<if <== 1 2> 10>", Value::Null);
        // The untaken branch is never evaluated.
        assert_eval("<if 1 10 undefined_name>", num(10));
        assert_eval("<if 0 undefined_name 20>", num(20));
        assert_eval_error("<if 1>", &arity());
        assert_eval_error("<if 1 2 3 4>", &arity());
    }

    #[test]
    fn test_named_function() {
        assert_eval("<func add <a b> <+ a b>> <add 2 3>", num(5));
        // The named form returns the lambda and binds it.
        let value = exec("<func id <x> x>").unwrap();
        assert!(matches!(value, Value::Lambda(ref l) if l.name == "id"));
    }

    #[test]
    fn test_anonymous_function() {
        assert_eval("<let sq <func <x> <* x x>>> <sq 7>", num(49));
        assert_eval("<<func <x> <+ x 1>> 41>", num(42));
        let value = exec("<func <> 1>").unwrap();
        assert!(matches!(value, Value::Lambda(ref l) if l.name.starts_with("_lambda")));
    }

    #[test]
    fn test_func_arity() {
        assert_eval_error("<func>", &arity());
        assert_eval_error("<func <x>>", &arity());
        assert_eval_error("<func f <x>>", &arity());
        assert_eval_error("<func f>", &arity());
        assert_eval_error(
            "<func 1 <x> x>",
            &ErrorKind::InvalidSpecialForm(String::new()),
        );
        assert_eval_error(
            "<func f <1> 1>",
            &ErrorKind::InvalidSpecialForm(String::new()),
        );
    }

    #[test]
    fn test_lexical_capture() {
        assert_eval(
            "<func outer <> <let x 1> <func inner <> x>> <let f <outer>> <f>",
            num(1),
        );
    }

    #[test]
    fn test_scoping_is_lexical_not_dynamic() {
        let program = "
            <let x 1>
            <func read <> x>
            <func shadow <> <let x 2> <read>>
            <shadow>";
        assert_eval(program, num(1));
    }

    #[test]
    fn test_capture_sees_later_mutation() {
        let program = "
            <func make <> <let n 1> <let get <func <> n>> <let n 5> get>
            <let g <make>>
            <g>";
        assert_eval(program, num(5));
    }

    #[test]
    fn test_let_inside_call_stays_local() {
        assert_eval("<func f <> <let inner 1>> <f> <if 1 2 3>", num(2));
        assert_eval_error("<func f <> <let inner 1>> <f> inner", &unknown());
    }

    #[test]
    fn test_call_binds_arguments_and_name() {
        assert_eval(
            "<func f <a> __arguments__> <f 1 2 3>",
            Value::array(vec![num(1), num(2), num(3)]),
        );
        assert_eval("<func f <> __name__> <f>", string("f"));
        // Missing parameters are null.
        assert_eval("<func f <a b> b> <f 1>", Value::Null);
    }

    #[test]
    fn test_recursion() {
        let program = "
            <func fact <n> <if <== n 0> 1 <* n <fact <- n 1>>>>>
            <fact 10>";
        assert_eval(program, num(3_628_800));
    }

    #[test]
    fn test_namespaced_bindings() {
        assert_eval("<let math.pi 3> math.pi", num(3));
        assert_eval("<let math.pi 3> <let pi 4> math.tau.pi", num(3));
        assert_eval("<func util.twice <x> <* 2 x>> <util.twice 4>", num(8));
    }

    #[test]
    fn test_unknown_variable_names_the_variable() {
        let err = assert_eval_error("missing_thing", &unknown());
        assert!(err.to_string().contains("missing_thing"), "{}", err);
        assert!(err.trace.is_empty());
    }

    #[test]
    fn test_error_trace_lists_open_frames() {
        let program = "<func inner <> nope>\n<func outer <> <inner>>\n<outer>";
        let err = assert_eval_error(program, &unknown());
        let functions: Vec<&str> = err.trace.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(functions, vec!["inner", "outer"]);
        assert_eq!(err.trace[0].closure, "outer");
        assert_eq!(err.trace[0].line, 2);
        assert_eq!(err.trace[1].closure, "__G");
        assert_eq!(err.trace[1].line, 3);
        assert_eq!(err.line, 1);
        assert_eq!(
            err.to_string(),
            "Error: Unknown variable nope\n\t<test_script>:2\touter:inner()\n\t<test_script>:3\t__G:outer()"
        );
    }

    #[test]
    fn test_frames_popped_after_return_and_error() {
        let mut vm = Vm::new(Vec::<PathBuf>::new());
        vm.run_source("<func f <x> x> <f 1>", "<test>").unwrap();
        assert!(vm.call_stack().is_empty());
        let err = vm.run_source("<func g <> <f>> <func h <> nope> <g> <h>", "<test>");
        assert!(err.is_err());
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn test_not_callable() {
        assert_eval_error("<let s \"str\"> <s 1>", &not_callable());
        assert_eval_error("<1 2 3>", &not_callable());
        assert_eval_error("<\"hello\" 1>", &not_callable());
        assert_eval_error("<<array 1> 2>", &not_callable());
        assert_eval_error("<let a <array>> <a>", &not_callable());
    }

    #[test]
    fn test_operator_outside_head() {
        assert_eval_error(
            "<let x if>",
            &ErrorKind::InvalidSpecialForm(String::new()),
        );
    }

    #[test]
    fn test_undefined_operator_from_constructed_ast() {
        let file: Rc<str> = Rc::from("<built>");
        let node = |kind| Node::new(kind, Span::default(), 1, file.clone());
        let program = vec![node(NodeKind::List(vec![
            node(NodeKind::Operator("reduce".to_string())),
            node(NodeKind::Number(1)),
        ]))];
        let err = Vm::new(Vec::<PathBuf>::new()).run(&program).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedOperator("reduce".to_string()));
    }

    #[test]
    fn test_let_requires_name() {
        assert_eval_error("<let 1 2>", &ErrorKind::InvalidSpecialForm(String::new()));
        assert_eval_error("<let x>", &arity());
    }

    #[test]
    fn test_parse_errors_surface() {
        assert_eval_error("<let x 1", &ErrorKind::Parse(ParseError::UnexpectedEof {
            expected: String::new(),
            line: 0,
            open: Span::default(),
        }));
    }

    #[test]
    fn test_sys_calls_registered_host_function() {
        assert_eval(r#"<sys "math" "max" <1 9 4>>"#, num(9));
        assert_eval(r#"<sys "math.min" <3 2>>"#, num(2));
        assert_eval(
            r#"<let ns "array"> <sys ns "length" <<array 1 2 3>>>"#,
            num(3),
        );
    }

    #[test]
    fn test_sys_errors() {
        let host = ErrorKind::HostCall {
            path: String::new(),
            source: HostError::Failed(String::new()),
        };
        let err = assert_eval_error(r#"<sys "process" "exit" <0>>"#, &host);
        assert_eq!(
            err.kind,
            ErrorKind::HostCall {
                path: "process.exit".to_string(),
                source: HostError::UnknownSymbol("process.exit".to_string()),
            }
        );
        assert_eval_error(r#"<sys "math" "abs" <"x">>"#, &host);
        assert_eval_error(r#"<sys <1>>"#, &arity());
        assert_eval_error(
            r#"<sys "math" "max" 1>"#,
            &ErrorKind::InvalidSpecialForm(String::new()),
        );
        assert_eval_error(
            r#"<sys 1 <1>>"#,
            &ErrorKind::TypeMismatch {
                operation: String::new(),
                expected: "",
                found: "",
            },
        );
    }

    #[test]
    fn test_sys_respects_capability_table() {
        let mut vm = Vm::with_config(VmConfig::new().host(HostRegistry::new()));
        assert_eq!(vm.host().paths().count(), 0);
        let err = vm
            .run_source(r#"<sys "math" "max" <1 2>>"#, "<test>")
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::HostCall { .. }));
    }

    #[test]
    fn test_native_bound_by_name() {
        let mut vm = Vm::new(Vec::<PathBuf>::new());
        vm.define_native("double", |args| match args {
            [Value::Number(n)] => Ok(Value::Number(n * 2)),
            _ => Err(HostError::Arguments("double expects one number".to_string())),
        });
        assert_eq!(vm.run_source("<double 21>", "<test>"), Ok(num(42)));
        assert_eq!(
            vm.run_source("<let d double> <<<func <> d>> 5>", "<test>"),
            Ok(num(10))
        );
        let err = vm.run_source("<double 1 2>", "<test>").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::HostCall { ref path, .. } if path == "double"));
    }

    #[test]
    fn test_get_var_and_dump() {
        let mut vm = Vm::new(["lib"]);
        assert_eq!(vm.search_path(), [PathBuf::from("lib")]);
        vm.run_source("<let config.debug 1>", "<test>").unwrap();
        assert_eq!(vm.get_var("config.debug"), Ok(num(1)));
        assert_eq!(vm.get_var("PATH"), Ok(Value::array(vec![string("lib")])));
        assert!(vm.get_var("nothing").is_err());
        let dump = vm.dump_closures();
        assert!(dump.starts_with("__G\n"), "{}", dump);
        assert!(dump.contains("config.debug = 1"), "{}", dump);
    }

    fn module_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, source) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, source).unwrap();
        }
        dir
    }

    #[test]
    fn test_import_runs_in_caller_closure() {
        let dir = module_dir(&[("std/math.cr", "<let math.double <func <x> <* 2 x>>> 99")]);
        let mut vm = Vm::new([dir.path()]);
        assert_eq!(vm.run_source(r#"<import "std.math">"#, "<test>"), Ok(num(99)));
        assert_eq!(vm.run_source("<math.double 21>", "<test>"), Ok(num(42)));
    }

    #[test]
    fn test_import_inside_function_stays_local() {
        let dir = module_dir(&[("helper.cr", "<let helped 1>")]);
        let mut vm = Vm::new([dir.path()]);
        let result = vm.run_source(
            r#"<func load <> <import "helper"> helped> <load>"#,
            "<test>",
        );
        assert_eq!(result, Ok(num(1)));
        assert!(vm.get_var("helped").is_err());
    }

    #[test]
    fn test_reimport_executes_again() {
        let dir = module_dir(&[("tick.cr", "<let counter <+ counter 1>>")]);
        let mut vm = Vm::new([dir.path()]);
        let program = r#"<let counter 0> <import "tick"> <import "tick"> counter"#;
        assert_eq!(vm.run_source(program, "<test>"), Ok(num(2)));
    }

    #[test]
    fn test_import_search_order() {
        let first = module_dir(&[("cfg.cr", "1")]);
        let second = module_dir(&[("cfg.cr", "2"), ("only.cr", "3")]);
        let mut vm = Vm::new([first.path(), second.path()]);
        assert_eq!(vm.run_source(r#"<import "cfg">"#, "<test>"), Ok(num(1)));
        assert_eq!(vm.run_source(r#"<import "only">"#, "<test>"), Ok(num(3)));
    }

    #[test]
    fn test_import_errors() {
        let dir = module_dir(&[("broken.cr", "<let x")]);
        let mut vm = Vm::new([dir.path()]);
        let err = vm
            .run_source(r#"<import "missing.module">"#, "<test>")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModuleNotFound("missing.module".to_string()));

        let err = vm.run_source(r#"<import "broken">"#, "<test>").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Parse(_)));
        assert!(err.file.ends_with("broken.cr"), "{}", err.file);

        let err = vm.run_source("<import 5>", "<test>").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_errors_in_module_carry_module_file() {
        let dir = module_dir(&[("lib.cr", "<func boom <> nope>")]);
        let mut vm = Vm::new([dir.path()]);
        let err = vm
            .run_source("<import \"lib\">\n<boom>", "main.cr")
            .unwrap_err();
        assert!(err.file.ends_with("lib.cr"), "{}", err.file);
        assert_eq!(err.line, 1);
        assert_eq!(err.trace.len(), 1);
        assert_eq!(&*err.trace[0].file, "main.cr");
        assert_eq!(err.trace[0].line, 2);
    }

    #[test]
    fn test_special_form_identifiers() {
        let ids = special_form_identifiers();
        assert_eq!(ids.len(), 6);
        assert!(ids.contains("func") && ids.contains("sys"));
    }
}
