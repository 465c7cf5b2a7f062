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

//! Built-in tests used by `value is name(args)`

use super::{Registries, Test};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::model::Value;
use std::cmp::Ordering;

fn operand<'a>(test: &str, args: &'a [Value]) -> Result<&'a Value> {
    args.first()
        .ok_or_else(|| TemplateError::evaluation(format!("test '{test}' requires an argument")))
}

fn integer(test: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        TemplateError::evaluation(format!(
            "test '{test}' expected an integer, got {}",
            value.type_name()
        ))
    })
}

fn compares(value: &Value, args: &[Value], test: &str, accept: &[Ordering]) -> Result<bool> {
    let other = operand(test, args)?;
    match value.compare(other) {
        Some(ordering) => Ok(accept.contains(&ordering)),
        None => Err(TemplateError::evaluation(format!(
            "cannot compare {} with {}",
            value.type_name(),
            other.type_name()
        ))),
    }
}

fn is_string(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Markup(_))
}

pub(super) fn register_builtin_tests(registries: &mut Registries) {
    type Builtin = fn(&Environment, &Value, &[Value]) -> Result<bool>;
    let builtins: &[(&str, Builtin)] = &[
        ("defined", |_, v, _| Ok(!v.is_undefined())),
        ("undefined", |_, v, _| Ok(v.is_undefined())),
        ("none", |_, v, _| Ok(v.is_none())),
        ("boolean", |_, v, _| Ok(matches!(v, Value::Bool(_)))),
        ("true", |_, v, _| Ok(matches!(v, Value::Bool(true)))),
        ("false", |_, v, _| Ok(matches!(v, Value::Bool(false)))),
        ("integer", |_, v, _| Ok(matches!(v, Value::Integer(_)))),
        ("float", |_, v, _| Ok(matches!(v, Value::Float(_)))),
        ("number", |_, v, _| Ok(matches!(v, Value::Integer(_) | Value::Float(_)))),
        ("string", |_, v, _| Ok(is_string(v))),
        ("mapping", |_, v, _| Ok(matches!(v, Value::Map(_)))),
        ("sequence", |_, v, _| {
            Ok(matches!(v, Value::List(_) | Value::String(_) | Value::Markup(_)))
        }),
        ("iterable", |_, v, _| {
            Ok(matches!(
                v,
                Value::List(_) | Value::Map(_) | Value::String(_) | Value::Markup(_)
            ))
        }),
        ("callable", |_, v, _| Ok(v.is_callable())),
        ("escaped", |_, v, _| Ok(v.is_safe())),
        ("lower", |_, v, _| {
            Ok(v.as_str().is_some_and(|s| s.chars().all(|c| !c.is_uppercase())))
        }),
        ("upper", |_, v, _| {
            Ok(v.as_str().is_some_and(|s| s.chars().all(|c| !c.is_lowercase())))
        }),
        ("odd", |_, v, _| Ok(integer("odd", v)? % 2 != 0)),
        ("even", |_, v, _| Ok(integer("even", v)? % 2 == 0)),
        ("divisibleby", |_, v, args| {
            let divisor = integer("divisibleby", operand("divisibleby", args)?)?;
            if divisor == 0 {
                return Err(TemplateError::evaluation("division by zero"));
            }
            Ok(integer("divisibleby", v)? % divisor == 0)
        }),
        ("eq", |_, v, args| Ok(v == operand("eq", args)?)),
        ("equalto", |_, v, args| Ok(v == operand("equalto", args)?)),
        ("ne", |_, v, args| Ok(v != operand("ne", args)?)),
        ("lt", |_, v, args| compares(v, args, "lt", &[Ordering::Less])),
        ("le", |_, v, args| {
            compares(v, args, "le", &[Ordering::Less, Ordering::Equal])
        }),
        ("gt", |_, v, args| compares(v, args, "gt", &[Ordering::Greater])),
        ("ge", |_, v, args| {
            compares(v, args, "ge", &[Ordering::Greater, Ordering::Equal])
        }),
        ("in", |_, v, args| {
            crate::runtime::operators::contains(operand("in", args)?, v)
        }),
        ("sameas", |_, v, args| {
            let other = operand("sameas", args)?;
            Ok(match (v, other) {
                (Value::List(a), Value::List(b)) => std::sync::Arc::ptr_eq(a, b),
                (Value::Map(a), Value::Map(b)) => std::sync::Arc::ptr_eq(a, b),
                (Value::None, Value::None) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                _ => false,
            })
        }),
    ];
    for (name, func) in builtins {
        registries.add_test(Test::new(*name, *func));
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::Environment;
    use crate::model::{Undefined, UndefinedPolicy, Value};
    use rstest::rstest;

    fn check(name: &str, value: Value, args: &[Value]) -> bool {
        Environment::new().apply_test(name, &value, args).unwrap()
    }

    #[rstest]
    #[case("defined", Value::from(1), true)]
    #[case("undefined", Value::Undefined(Undefined::named(UndefinedPolicy::Strict, "x")), true)]
    #[case("none", Value::None, true)]
    #[case("number", Value::Float(1.5), true)]
    #[case("string", Value::safe("x"), true)]
    #[case("odd", Value::from(3), true)]
    #[case("even", Value::from(3), false)]
    #[case("lower", Value::from("abc"), true)]
    #[case("upper", Value::from("aBC"), false)]
    #[case("callable", Value::from(1), false)]
    fn test_unary_tests(#[case] name: &str, #[case] value: Value, #[case] expected: bool) {
        assert_eq!(check(name, value, &[]), expected);
    }

    #[rstest]
    #[case("divisibleby", Value::from(9), Value::from(3), true)]
    #[case("eq", Value::from(1), Value::Float(1.0), true)]
    #[case("ne", Value::from("a"), Value::from("b"), true)]
    #[case("lt", Value::from(1), Value::from(2), true)]
    #[case("ge", Value::from(2), Value::from(2), true)]
    #[case("in", Value::from("b"), Value::from("abc"), true)]
    fn test_binary_tests(
        #[case] name: &str,
        #[case] value: Value,
        #[case] arg: Value,
        #[case] expected: bool,
    ) {
        assert_eq!(check(name, value, &[arg]), expected);
    }

    #[test]
    fn test_divisibleby_zero_is_an_error() {
        let result =
            Environment::new().apply_test("divisibleby", &Value::from(4), &[Value::from(0)]);
        assert!(result.is_err());
    }
}
