//! Host bridge: the table of native functions reachable through `sys`.
//!
//! Scripts can only reach host functions the embedder registered here;
//! there is no reflective lookup into the host process.

use crate::types::{NativeFunction, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("no host function is registered under '{0}'")]
    UnknownSymbol(String),
    #[error("{0}")]
    Arguments(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    functions: BTreeMap<String, NativeFunction>,
}

impl HostRegistry {
    /// An empty registry: `sys` can reach nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard console, math, string and array helpers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("console.log", console_log)
            .register("math.max", |args| fold_numbers("math.max", args, i64::max))
            .register("math.min", |args| fold_numbers("math.min", args, i64::min))
            .register("math.abs", math_abs)
            .register("string.length", string_length)
            .register("string.concat", string_concat)
            .register("array.length", array_length)
            .register("array.get", array_get)
            .register("array.push", array_push);
        registry
    }

    pub fn register<F>(&mut self, path: &str, func: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + 'static,
    {
        self.functions
            .insert(path.to_string(), NativeFunction::new(path, func));
        self
    }

    pub fn get(&self, path: &str) -> Option<NativeFunction> {
        self.functions.get(path).cloned()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

fn expect_number(path: &str, args: &[Value], index: usize) -> Result<i64, HostError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(HostError::Arguments(format!(
            "{} expects a number for argument {}, got {}",
            path,
            index + 1,
            other.type_name()
        ))),
        None => Err(HostError::Arguments(format!(
            "{} expects at least {} arguments, got {}",
            path,
            index + 1,
            args.len()
        ))),
    }
}

fn expect_array<'a>(path: &str, args: &'a [Value]) -> Result<&'a [Value], HostError> {
    match args.first() {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(HostError::Arguments(format!(
            "{} expects an array, got {}",
            path,
            other.type_name()
        ))),
        None => Err(HostError::Arguments(format!("{} expects an array", path))),
    }
}

fn console_log(args: &[Value]) -> Result<Value, HostError> {
    let line: Vec<String> = args.iter().map(Value::to_string).collect();
    println!("{}", line.join(" "));
    Ok(Value::Null)
}

fn fold_numbers(path: &str, args: &[Value], pick: fn(i64, i64) -> i64) -> Result<Value, HostError> {
    let mut acc = expect_number(path, args, 0)?;
    for index in 1..args.len() {
        acc = pick(acc, expect_number(path, args, index)?);
    }
    Ok(Value::Number(acc))
}

fn math_abs(args: &[Value]) -> Result<Value, HostError> {
    let n = expect_number("math.abs", args, 0)?;
    n.checked_abs()
        .map(Value::Number)
        .ok_or_else(|| HostError::Failed(format!("math.abs overflows for {}", n)))
}

fn string_length(args: &[Value]) -> Result<Value, HostError> {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::Number(s.chars().count() as i64)),
        Some(other) => Err(HostError::Arguments(format!(
            "string.length expects a string, got {}",
            other.type_name()
        ))),
        None => Err(HostError::Arguments("string.length expects a string".into())),
    }
}

fn string_concat(args: &[Value]) -> Result<Value, HostError> {
    Ok(Value::String(args.iter().map(Value::to_string).collect()))
}

fn array_length(args: &[Value]) -> Result<Value, HostError> {
    let items = expect_array("array.length", args)?;
    Ok(Value::Number(items.len() as i64))
}

fn array_get(args: &[Value]) -> Result<Value, HostError> {
    let items = expect_array("array.get", args)?;
    let index = expect_number("array.get", args, 1)?;
    Ok(usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .unwrap_or(Value::Null))
}

// Arrays are immutable: push returns a new array.
fn array_push(args: &[Value]) -> Result<Value, HostError> {
    let items = expect_array("array.push", args)?;
    let mut pushed = items.to_vec();
    pushed.extend(args[1..].iter().cloned());
    Ok(Value::array(pushed))
}
