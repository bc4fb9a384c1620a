use crate::parser::{AssignOp, BinaryOp, Expr, Stmt, UnaryOp};
use bpmncore::{EvalError, Value, Variables};
use std::collections::HashMap;

/// What a script asked for when it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The script called `next()`.
    Continue,
    /// The script ran to the end without calling `next()`.
    Suspended,
}

pub fn evaluate(expr: &Expr, variables: &Variables) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(path) => Ok(lookup(variables, path)),
        Expr::Unary(UnaryOp::Not, operand) => {
            Ok(Value::Bool(!evaluate(operand, variables)?.is_truthy()))
        }
        Expr::Unary(UnaryOp::Negate, operand) => {
            let value = evaluate(operand, variables)?;
            Ok(Value::Number(-numeric(&value, "-")?))
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = evaluate(left, variables)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            evaluate(right, variables)
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = evaluate(left, variables)?;
            if left.is_truthy() {
                return Ok(left);
            }
            evaluate(right, variables)
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, variables)?;
            let right = evaluate(right, variables)?;
            binary(*op, &left, &right)
        }
    }
}

/// Run statements against `variables`, stopping at the first `next()`.
pub fn execute(statements: &[Stmt], variables: &mut Variables) -> Result<Completion, EvalError> {
    for statement in statements {
        match statement {
            Stmt::Continue => return Ok(Completion::Continue),
            Stmt::Expr(expr) => {
                evaluate(expr, variables)?;
            }
            Stmt::Assign { target, op, value } => {
                let value = evaluate(value, variables)?;
                let value = match op {
                    AssignOp::Set => value,
                    AssignOp::Add => binary(BinaryOp::Add, &lookup(variables, target), &value)?,
                    AssignOp::Subtract => {
                        binary(BinaryOp::Subtract, &lookup(variables, target), &value)?
                    }
                };
                assign(variables, target, value)?;
            }
        }
    }
    Ok(Completion::Suspended)
}

fn lookup(variables: &Variables, path: &[String]) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return Value::Null;
    };
    let mut current = match variables.get(head) {
        Some(value) => value,
        None => return Value::Null,
    };
    for segment in rest {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Value::Null,
            },
            Value::Array(items) if segment == "length" => {
                return Value::Number(items.len() as f64);
            }
            Value::String(s) if segment == "length" => {
                return Value::Number(s.chars().count() as f64);
            }
            _ => return Value::Null,
        };
    }
    current.clone()
}

fn assign(variables: &mut Variables, path: &[String], value: Value) -> Result<(), EvalError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(EvalError::Failed("empty assignment target".to_string()));
    };
    let Some((head, rest)) = parents.split_first() else {
        variables.insert(last.clone(), value);
        return Ok(());
    };

    let mut current = variables
        .entry(head.clone())
        .or_insert_with(|| Value::Object(HashMap::new()));
    for segment in rest {
        if current.is_null() {
            *current = Value::Object(HashMap::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(HashMap::new())),
            other => {
                return Err(EvalError::Type(format!(
                    "cannot set '{}' on {}",
                    segment,
                    other.type_name()
                )))
            }
        };
    }
    if current.is_null() {
        *current = Value::Object(HashMap::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        other => Err(EvalError::Type(format!(
            "cannot set '{}' on {}",
            last,
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let result = match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", display(left), display(right)))
            }
            _ => Value::Number(numeric(left, "+")? + numeric(right, "+")?),
        },
        BinaryOp::Subtract => Value::Number(numeric(left, "-")? - numeric(right, "-")?),
        BinaryOp::Multiply => Value::Number(numeric(left, "*")? * numeric(right, "*")?),
        BinaryOp::Divide => {
            let divisor = numeric(right, "/")?;
            if divisor == 0.0 {
                return Err(EvalError::Failed("division by zero".to_string()));
            }
            Value::Number(numeric(left, "/")? / divisor)
        }
        BinaryOp::Remainder => {
            let divisor = numeric(right, "%")?;
            if divisor == 0.0 {
                return Err(EvalError::Failed("division by zero".to_string()));
            }
            Value::Number(numeric(left, "%")? % divisor)
        }
        BinaryOp::Less => Value::Bool(compare(left, right, |o| o.is_lt())),
        BinaryOp::LessEqual => Value::Bool(compare(left, right, |o| o.is_le())),
        BinaryOp::Greater => Value::Bool(compare(left, right, |o| o.is_gt())),
        BinaryOp::GreaterEqual => Value::Bool(compare(left, right, |o| o.is_ge())),
        BinaryOp::Equal => Value::Bool(loose_equal(left, right)),
        BinaryOp::NotEqual => Value::Bool(!loose_equal(left, right)),
        BinaryOp::StrictEqual => Value::Bool(left == right),
        BinaryOp::StrictNotEqual => Value::Bool(left != right),
        BinaryOp::And | BinaryOp::Or => {
            return Err(EvalError::Failed("logical operators short-circuit".to_string()))
        }
    };
    Ok(result)
}

/// Numeric view of a value; null, booleans and numeric strings coerce.
fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn numeric(value: &Value, op: &str) -> Result<f64, EvalError> {
    coerce(value).ok_or_else(|| {
        EvalError::Type(format!("operator '{}' cannot be applied to {}", op, value.type_name()))
    })
}

/// Relational comparison. Strings compare lexically with each other; anything
/// else compares numerically, and an undefined operand is never ordered.
fn compare(left: &Value, right: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return test(a.cmp(b));
    }
    if left.is_null() || right.is_null() {
        return false;
    }
    match (coerce(left), coerce(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).map(test).unwrap_or(false),
        _ => false,
    }
}

fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            left == right
        }
        _ => match (coerce(left), coerce(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::Value::from(value.clone()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn eval(source: &str, variables: &Variables) -> Value {
        evaluate(&Parser::parse_expression(source).unwrap(), variables).unwrap()
    }

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_comparisons_against_input() {
        let v = vars(&[("input", Value::from(10))]);
        assert_eq!(eval("this.input <= 50", &v), Value::Bool(true));
        assert_eq!(eval("this.input > 50", &v), Value::Bool(false));

        let v = vars(&[("input", Value::from(100))]);
        assert_eq!(eval("this.input <= 50", &v), Value::Bool(false));
        assert_eq!(eval("this.input <= 60 || this.input > 50", &v), Value::Bool(true));
    }

    #[test]
    fn test_missing_variables_are_never_ordered() {
        let v = Variables::new();
        assert_eq!(eval("this.input <= 50", &v), Value::Bool(false));
        assert_eq!(eval("this.input > 50", &v), Value::Bool(false));
        assert_eq!(eval("this.input == null", &v), Value::Bool(true));
        assert_eq!(eval("!this.input", &v), Value::Bool(true));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let v = vars(&[("a", Value::from(7)), ("name", Value::from("bob"))]);
        assert_eq!(eval("a % 4 * 2 - -1", &v), Value::Number(7.0));
        assert_eq!(eval("'hi ' + name + a", &v), Value::from("hi bob7"));
        assert_eq!(eval("name.length", &v), Value::Number(3.0));
        assert_eq!(eval("'10' == 10", &v), Value::Bool(true));
        assert_eq!(eval("'10' === 10", &v), Value::Bool(false));
        assert_eq!(eval("'a' < 'b'", &v), Value::Bool(true));
    }

    #[test]
    fn test_logical_operators_return_operands() {
        let v = vars(&[("x", Value::from("set"))]);
        assert_eq!(eval("missing || x", &v), Value::from("set"));
        assert_eq!(eval("x && 0", &v), Value::Number(0.0));
    }

    #[test]
    fn test_type_errors() {
        let v = vars(&[("list", Value::Array(vec![]))]);
        let expr = Parser::parse_expression("list * 2").unwrap();
        assert!(matches!(evaluate(&expr, &v), Err(EvalError::Type(_))));
        let expr = Parser::parse_expression("1 / 0").unwrap();
        assert!(matches!(evaluate(&expr, &v), Err(EvalError::Failed(_))));
    }

    #[test]
    fn test_script_assigns_nested_paths() {
        let mut v = vars(&[("count", Value::from(1))]);
        let script = Parser::parse_script("count += 2; order.total = count * 10; order.total -= 5; next(); count = 99").unwrap();

        assert_eq!(execute(&script, &mut v).unwrap(), Completion::Continue);
        assert_eq!(v.get("count"), Some(&Value::Number(3.0)));
        let order = v.get("order").and_then(|o| o.as_object()).unwrap();
        assert_eq!(order.get("total"), Some(&Value::Number(25.0)));
    }

    #[test]
    fn test_script_without_next_is_suspended() {
        let mut v = Variables::new();
        let script = Parser::parse_script("this.context.input = 2").unwrap();
        assert_eq!(execute(&script, &mut v).unwrap(), Completion::Suspended);
        assert_eq!(v.get("input"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_cannot_assign_through_scalars() {
        let mut v = vars(&[("input", Value::from(1))]);
        let script = Parser::parse_script("input.value = 2").unwrap();
        assert!(matches!(execute(&script, &mut v), Err(EvalError::Type(_))));
    }
}
