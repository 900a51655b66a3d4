use crate::evaluator::ErrorKind;
use crate::types::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Equal,
    NotEqual,
    Not,
}

impl Arithmetic {
    pub fn symbol(self) -> &'static str {
        match self {
            Arithmetic::Add => "+",
            Arithmetic::Subtract => "-",
            Arithmetic::Multiply => "*",
            Arithmetic::Divide => "/",
            Arithmetic::And => "&",
            Arithmetic::Or => "|",
            Arithmetic::Equal => "==",
            Arithmetic::NotEqual => "!=",
            Arithmetic::Not => "!",
        }
    }
}

impl FromStr for Arithmetic {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "+" => Arithmetic::Add,
            "-" => Arithmetic::Subtract,
            "*" => Arithmetic::Multiply,
            "/" => Arithmetic::Divide,
            "&" => Arithmetic::And,
            "|" => Arithmetic::Or,
            "==" => Arithmetic::Equal,
            "!=" => Arithmetic::NotEqual,
            "!" => Arithmetic::Not,
            _ => return Err(ErrorKind::UndefinedArithmetic(s.to_string())),
        })
    }
}

/// Applies the arithmetic symbol `op` to already evaluated arguments.
pub fn apply(op: &str, args: &[Value]) -> Result<Value, ErrorKind> {
    let op: Arithmetic = op.parse()?;
    match op {
        Arithmetic::Equal => Ok(Value::Boolean(operand(args, 0) == operand(args, 1))),
        Arithmetic::NotEqual => Ok(Value::Boolean(operand(args, 0) != operand(args, 1))),
        Arithmetic::Not => Ok(Value::Boolean(!operand(args, 0).is_truthy())),
        _ => fold(op, args),
    }
}

fn operand(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

// Left fold seeded with the first argument: <- 10 1 2> is (10 - 1) - 2.
fn fold(op: Arithmetic, args: &[Value]) -> Result<Value, ErrorKind> {
    let Some((seed, rest)) = args.split_first() else {
        return Err(ErrorKind::InvalidArguments(format!(
            "'{}' expects at least one operand",
            op.symbol()
        )));
    };
    rest.iter()
        .try_fold(seed.clone(), |acc, right| step(op, acc, right))
}

fn step(op: Arithmetic, left: Value, right: &Value) -> Result<Value, ErrorKind> {
    match (op, left, right) {
        (Arithmetic::Add, Value::String(mut s), right) => {
            s.push_str(&right.to_string());
            Ok(Value::String(s))
        }
        (Arithmetic::And, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(a && *b)),
        (Arithmetic::Or, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(a || *b)),
        (Arithmetic::And | Arithmetic::Or, Value::Boolean(_), other) => {
            Err(mismatch(op, "boolean", other))
        }
        (_, Value::Number(a), Value::Number(b)) => numeric(op, a, *b).map(Value::Number),
        (_, Value::Number(_), other) => Err(mismatch(op, "number", other)),
        (_, other, _) => Err(mismatch(op, "number", &other)),
    }
}

fn numeric(op: Arithmetic, a: i64, b: i64) -> Result<i64, ErrorKind> {
    let result = match op {
        Arithmetic::Add => a.checked_add(b),
        Arithmetic::Subtract => a.checked_sub(b),
        Arithmetic::Multiply => a.checked_mul(b),
        Arithmetic::Divide if b == 0 => return Err(ErrorKind::DivisionByZero),
        Arithmetic::Divide => a.checked_div(b),
        Arithmetic::And => Some(a & b),
        Arithmetic::Or => Some(a | b),
        Arithmetic::Equal | Arithmetic::NotEqual | Arithmetic::Not => {
            return Err(ErrorKind::UndefinedArithmetic(op.symbol().to_string()));
        }
    };
    result.ok_or_else(|| ErrorKind::Overflow(format!("{} {} {}", a, op.symbol(), b)))
}

fn mismatch(op: Arithmetic, expected: &'static str, found: &Value) -> ErrorKind {
    ErrorKind::TypeMismatch {
        operation: op.symbol().to_string(),
        expected,
        found: found.type_name(),
    }
}
