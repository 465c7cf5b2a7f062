// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operator semantics shared by the virtual machine and the optimizer

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::error::{Result, TemplateError};
use crate::model::Value;
use std::cmp::Ordering;
use std::sync::Arc;

fn unsupported(op: BinaryOperator, left: &Value, right: &Value) -> TemplateError {
    TemplateError::evaluation(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow(op: BinaryOperator) -> TemplateError {
    TemplateError::evaluation(format!("integer overflow in '{}'", op.symbol()))
}

fn division_by_zero() -> TemplateError {
    TemplateError::evaluation("division by zero")
}

/// Apply a unary operator
pub fn unary(op: UnaryOperator, operand: &Value) -> Result<Value> {
    match (op, operand) {
        (UnaryOperator::Not, value) => Ok(Value::Bool(!value.is_true())),
        (UnaryOperator::Negate, Value::Integer(i)) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| TemplateError::evaluation("integer overflow in unary '-'")),
        (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Positive, value @ (Value::Integer(_) | Value::Float(_))) => {
            Ok(value.clone())
        }
        (op, value) => Err(TemplateError::evaluation(format!(
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            value.type_name()
        ))),
    }
}

/// Apply a binary operator.
///
/// `and`/`or` are evaluated eagerly here; the code generator compiles them to
/// short-circuiting jumps instead.
pub fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOperator::And => Ok(if left.is_true() {
            right.clone()
        } else {
            left.clone()
        }),
        BinaryOperator::Or => Ok(if left.is_true() {
            left.clone()
        } else {
            right.clone()
        }),
        BinaryOperator::Add => add(left, right),
        BinaryOperator::Subtract => arithmetic(op, left, right, i64::checked_sub, |a, b| a - b),
        BinaryOperator::Multiply => multiply(left, right),
        BinaryOperator::Divide => divide(left, right),
        BinaryOperator::FloorDivide => floor_divide(left, right),
        BinaryOperator::Modulo => modulo(left, right),
        BinaryOperator::Power => power(left, right),
        BinaryOperator::Concat => {
            let mut text = left.render()?;
            text.push_str(&right.render()?);
            Ok(Value::from(text))
        }
        BinaryOperator::Equal => Ok(Value::Bool(left == right)),
        BinaryOperator::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOperator::LessThan => compare(op, left, right, Ordering::is_lt),
        BinaryOperator::LessThanOrEqual => compare(op, left, right, Ordering::is_le),
        BinaryOperator::GreaterThan => compare(op, left, right, Ordering::is_gt),
        BinaryOperator::GreaterThanOrEqual => compare(op, left, right, Ordering::is_ge),
        BinaryOperator::In => contains(right, left).map(Value::Bool),
        BinaryOperator::NotIn => contains(right, left).map(|found| Value::Bool(!found)),
    }
}

fn arithmetic(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            int_op(*a, *b).map(Value::Integer).ok_or_else(|| overflow(op))
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(unsupported(op, left, right)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
            _ => Err(unsupported(op, left, right)),
        },
    }
}

fn add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::from(format!("{a}{b}"))),
        (Value::Markup(a), Value::Markup(b)) => Ok(Value::safe(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::List(Arc::new(items)))
        }
        _ => arithmetic(BinaryOperator::Add, left, right, i64::checked_add, |a, b| a + b),
    }
}

fn repeat_count(count: i64) -> usize {
    usize::try_from(count).unwrap_or(0)
}

fn multiply(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::String(s), Value::Integer(n)) | (Value::Integer(n), Value::String(s)) => {
            Ok(Value::from(s.repeat(repeat_count(*n))))
        }
        (Value::List(items), Value::Integer(n)) | (Value::Integer(n), Value::List(items)) => {
            let count = repeat_count(*n);
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(Arc::new(out)))
        }
        _ => arithmetic(
            BinaryOperator::Multiply,
            left,
            right,
            i64::checked_mul,
            |a, b| a * b,
        ),
    }
}

fn numeric_pair(op: BinaryOperator, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(unsupported(op, left, right)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(unsupported(op, left, right)),
        },
    }
}

fn divide(left: &Value, right: &Value) -> Result<Value> {
    let (a, b) = numeric_pair(BinaryOperator::Divide, left, right)?;
    if b == 0.0 {
        return Err(division_by_zero());
    }
    Ok(Value::Float(a / b))
}

fn floor_divide(left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        if *b == 0 {
            return Err(division_by_zero());
        }
        let quotient = a
            .checked_div(*b)
            .ok_or_else(|| overflow(BinaryOperator::FloorDivide))?;
        let adjust = a % b != 0 && ((*a < 0) != (*b < 0));
        return Ok(Value::Integer(if adjust { quotient - 1 } else { quotient }));
    }
    let (a, b) = numeric_pair(BinaryOperator::FloorDivide, left, right)?;
    if b == 0.0 {
        return Err(division_by_zero());
    }
    Ok(Value::Float((a / b).floor()))
}

fn modulo(left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        if *b == 0 {
            return Err(division_by_zero());
        }
        let rem = a.checked_rem(*b).unwrap_or(0);
        // Result takes the sign of the divisor
        let rem = if rem != 0 && ((rem < 0) != (*b < 0)) {
            rem + b
        } else {
            rem
        };
        return Ok(Value::Integer(rem));
    }
    let (a, b) = numeric_pair(BinaryOperator::Modulo, left, right)?;
    if b == 0.0 {
        return Err(division_by_zero());
    }
    let rem = a % b;
    Ok(Value::Float(if rem != 0.0 && ((rem < 0.0) != (b < 0.0)) {
        rem + b
    } else {
        rem
    }))
}

fn power(left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        return match u32::try_from(*b) {
            Ok(exp) => a
                .checked_pow(exp)
                .map(Value::Integer)
                .ok_or_else(|| overflow(BinaryOperator::Power)),
            Err(_) if *b < 0 => Ok(Value::Float((*a as f64).powf(*b as f64))),
            Err(_) => Err(overflow(BinaryOperator::Power)),
        };
    }
    let (a, b) = numeric_pair(BinaryOperator::Power, left, right)?;
    Ok(Value::Float(a.powf(b)))
}

fn compare(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
    check: fn(Ordering) -> bool,
) -> Result<Value> {
    left.compare(right)
        .map(|ordering| Value::Bool(check(ordering)))
        .ok_or_else(|| {
            TemplateError::evaluation(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))
        })
}

/// Membership test: `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::String(s) | Value::Markup(s) => match item.as_str() {
            Some(needle) => Ok(s.contains(needle)),
            None => Err(TemplateError::evaluation(format!(
                "'in <string>' requires string as left operand, not {}",
                item.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|v| v == item)),
        Value::Map(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
        Value::Undefined(undefined) => undefined.iterate().map(|_| false),
        other => Err(TemplateError::evaluation(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryOperator::Add, Value::Integer(2), Value::Integer(3), Value::Integer(5))]
    #[case(BinaryOperator::Add, Value::Integer(2), Value::Float(0.5), Value::Float(2.5))]
    #[case(BinaryOperator::Subtract, Value::Integer(2), Value::Integer(5), Value::Integer(-3))]
    #[case(BinaryOperator::Divide, Value::Integer(7), Value::Integer(2), Value::Float(3.5))]
    #[case(BinaryOperator::FloorDivide, Value::Integer(7), Value::Integer(2), Value::Integer(3))]
    #[case(BinaryOperator::FloorDivide, Value::Integer(-7), Value::Integer(2), Value::Integer(-4))]
    #[case(BinaryOperator::Modulo, Value::Integer(-7), Value::Integer(3), Value::Integer(2))]
    #[case(BinaryOperator::Modulo, Value::Integer(7), Value::Integer(-3), Value::Integer(-2))]
    #[case(BinaryOperator::Power, Value::Integer(2), Value::Integer(10), Value::Integer(1024))]
    #[case(BinaryOperator::Power, Value::Integer(2), Value::Integer(-1), Value::Float(0.5))]
    #[case(BinaryOperator::Concat, Value::from("a"), Value::Integer(1), Value::from("a1"))]
    #[case(BinaryOperator::Multiply, Value::from("ab"), Value::Integer(2), Value::from("abab"))]
    #[case(BinaryOperator::Equal, Value::Integer(1), Value::Float(1.0), Value::Bool(true))]
    #[case(BinaryOperator::LessThan, Value::from("a"), Value::from("b"), Value::Bool(true))]
    #[case(BinaryOperator::Or, Value::None, Value::from("x"), Value::from("x"))]
    #[case(BinaryOperator::And, Value::Integer(0), Value::from("x"), Value::Integer(0))]
    fn test_binary(
        #[case] op: BinaryOperator,
        #[case] left: Value,
        #[case] right: Value,
        #[case] expected: Value,
    ) {
        let result = binary(op, &left, &right).unwrap();
        assert_eq!(result, expected);
        assert_eq!(result.type_name(), expected.type_name());
    }

    #[test]
    fn test_division_by_zero() {
        for op in [
            BinaryOperator::Divide,
            BinaryOperator::FloorDivide,
            BinaryOperator::Modulo,
        ] {
            let err = binary(op, &Value::Integer(1), &Value::Integer(0)).unwrap_err();
            assert!(err.to_string().contains("division by zero"));
        }
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert!(binary(BinaryOperator::Add, &Value::Integer(i64::MAX), &Value::Integer(1)).is_err());
        assert!(unary(UnaryOperator::Negate, &Value::Integer(i64::MIN)).is_err());
    }

    #[test]
    fn test_type_errors() {
        assert!(binary(BinaryOperator::Subtract, &Value::from("a"), &Value::Integer(1)).is_err());
        assert!(binary(BinaryOperator::LessThan, &Value::from("a"), &Value::Integer(1)).is_err());
        assert!(unary(UnaryOperator::Negate, &Value::from("a")).is_err());
    }

    #[test]
    fn test_membership() {
        let list = Value::from(vec![1, 2, 3]);
        assert!(contains(&list, &Value::Integer(2)).unwrap());
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&Value::Integer(3), &Value::Integer(3)).is_err());
        assert_eq!(
            binary(BinaryOperator::NotIn, &Value::Integer(4), &list).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_unary_not() {
        assert_eq!(
            unary(UnaryOperator::Not, &Value::from("")).unwrap(),
            Value::Bool(true)
        );
    }
}
