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

//! Built-in filters

use super::{Filter, Registries, argument};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::model::{Kwargs, Undefined, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// Escape `&`, `<`, `>`, `"` and `'` for HTML output
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn type_error(filter: &str, expected: &str, value: &Value) -> TemplateError {
    TemplateError::evaluation(format!(
        "filter '{filter}' expected {expected}, got {}",
        value.type_name()
    ))
}

fn text(value: &Value) -> Result<String> {
    value.render()
}

/// Keep markup-ness of the input on string-to-string filters
fn same_kind(input: &Value, output: String) -> Value {
    if input.is_safe() {
        Value::safe(output)
    } else {
        Value::from(output)
    }
}

fn missing(env: &Environment) -> Value {
    Value::Undefined(Undefined::new(env.undefined_policy(), None, None))
}

fn upper(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(same_kind(&value, text(&value)?.to_uppercase()))
}

fn lower(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(same_kind(&value, text(&value)?.to_lowercase()))
}

fn capitalize(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    let s = text(&value)?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(same_kind(&value, out))
}

fn title(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    let s = text(&value)?;
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    Ok(same_kind(&value, out))
}

fn trim(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let s = text(&value)?;
    let out = match argument(args, kwargs, 0, "chars").and_then(Value::as_str) {
        Some(chars) => s.trim_matches(|c| chars.contains(c)).to_string(),
        None => s.trim().to_string(),
    };
    Ok(same_kind(&value, out))
}

fn length(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    match &value {
        Value::Undefined(undefined) => Ok(Value::from(undefined.iterate()?.len())),
        other => other
            .len()
            .map(Value::from)
            .ok_or_else(|| type_error("length", "a sized value", other)),
    }
}

fn default(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let fallback = argument(args, kwargs, 0, "default_value")
        .cloned()
        .unwrap_or_else(|| Value::from(""));
    let boolean = argument(args, kwargs, 1, "boolean").is_some_and(Value::is_true);
    if value.is_undefined() || (boolean && !value.is_true()) {
        Ok(fallback)
    } else {
        Ok(value)
    }
}

fn join(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let separator = match argument(args, kwargs, 0, "d") {
        Some(sep) => sep.render()?,
        None => String::new(),
    };
    let attribute = argument(args, kwargs, 1, "attribute").and_then(Value::as_str);
    let items = value.iterate()?;
    let mut parts = Vec::with_capacity(items.len());
    let mut all_safe = value.is_safe();
    for item in &items {
        let item = match attribute {
            Some(attr) => item
                .as_map()
                .and_then(|m| m.get(attr).cloned())
                .unwrap_or(Value::None),
            None => item.clone(),
        };
        all_safe &= item.is_safe();
        parts.push(item.render()?);
    }
    let joined = parts.join(&separator);
    Ok(if all_safe && !items.is_empty() {
        Value::safe(joined)
    } else {
        Value::from(joined)
    })
}

fn first(env: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(value.iterate()?.into_iter().next().unwrap_or_else(|| missing(env)))
}

fn last(env: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(value.iterate()?.pop().unwrap_or_else(|| missing(env)))
}

fn reverse(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    match &value {
        Value::String(s) | Value::Markup(s) => Ok(same_kind(&value, s.chars().rev().collect())),
        other => {
            let mut items = other.iterate()?;
            items.reverse();
            Ok(Value::from(items))
        }
    }
}

fn sort(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let descending = argument(args, kwargs, 0, "reverse").is_some_and(Value::is_true);
    let attribute = argument(args, kwargs, 2, "attribute").and_then(Value::as_str);
    let key = |item: &Value| match attribute {
        Some(attr) => item
            .as_map()
            .and_then(|m| m.get(attr).cloned())
            .unwrap_or(Value::None),
        None => item.clone(),
    };
    let mut items = value.iterate()?;
    items.sort_by(|a, b| key(a).compare(&key(b)).unwrap_or(Ordering::Equal));
    if descending {
        items.reverse();
    }
    Ok(Value::from(items))
}

fn escape(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    if value.is_safe() {
        return Ok(value);
    }
    Ok(Value::safe(escape_html(&value.render()?)))
}

fn safe(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(Value::safe(value.render()?))
}

fn string(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    match value {
        Value::String(_) | Value::Markup(_) => Ok(value),
        other => Ok(Value::from(other.render()?)),
    }
}

fn int(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let fallback = argument(args, kwargs, 0, "default")
        .cloned()
        .unwrap_or(Value::Integer(0));
    Ok(match &value {
        Value::Integer(_) => value,
        Value::Bool(b) => Value::Integer(i64::from(*b)),
        Value::Float(f) if f.is_finite() => Value::Integer(f.trunc() as i64),
        Value::String(s) | Value::Markup(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| s.parse::<f64>().map(|f| Value::Integer(f.trunc() as i64)))
                .unwrap_or(fallback)
        }
        _ => fallback,
    })
}

fn float(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let fallback = argument(args, kwargs, 0, "default")
        .cloned()
        .unwrap_or(Value::Float(0.0));
    Ok(match &value {
        Value::Float(_) => value,
        Value::Integer(i) => Value::Float(*i as f64),
        Value::Bool(b) => Value::Float(if *b { 1.0 } else { 0.0 }),
        Value::String(s) | Value::Markup(s) => {
            s.trim().parse::<f64>().map(Value::Float).unwrap_or(fallback)
        }
        _ => fallback,
    })
}

fn abs(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    match value {
        Value::Integer(i) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| TemplateError::evaluation("integer overflow in abs")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(type_error("abs", "a number", &other)),
    }
}

fn round(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let number = value
        .as_f64()
        .ok_or_else(|| type_error("round", "a number", &value))?;
    let precision = argument(args, kwargs, 0, "precision")
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .clamp(0, 15) as i32;
    let method = argument(args, kwargs, 1, "method")
        .and_then(Value::as_str)
        .unwrap_or("common");
    let factor = 10f64.powi(precision);
    let scaled = number * factor;
    let rounded = match method {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => {
            return Err(TemplateError::evaluation(format!(
                "round method must be 'common', 'ceil' or 'floor', got '{other}'"
            )));
        }
    };
    Ok(Value::Float(rounded / factor))
}

fn replace(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let (Some(old), Some(new)) = (
        argument(args, kwargs, 0, "old"),
        argument(args, kwargs, 1, "new"),
    ) else {
        return Err(TemplateError::evaluation(
            "filter 'replace' requires 'old' and 'new' arguments",
        ));
    };
    let s = text(&value)?;
    let (old, new) = (old.render()?, new.render()?);
    let out = match argument(args, kwargs, 2, "count").and_then(Value::as_i64) {
        Some(count) if count >= 0 => s.replacen(&old, &new, count as usize),
        _ => s.replace(&old, &new),
    };
    Ok(same_kind(&value, out))
}

fn list(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(Value::from(value.iterate()?))
}

fn sum(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let start = argument(args, kwargs, 1, "start")
        .cloned()
        .unwrap_or(Value::Integer(0));
    value.iterate()?.iter().try_fold(start, |acc, item| {
        crate::runtime::operators::binary(crate::ast::BinaryOperator::Add, &acc, item)
    })
}

fn extreme(value: &Value, wanted: Ordering, env: &Environment) -> Result<Value> {
    let items = value.iterate()?;
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(current) if item.compare(&current) != Some(wanted) => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.unwrap_or_else(|| missing(env)))
}

fn min(env: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    extreme(&value, Ordering::Less, env)
}

fn max(env: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    extreme(&value, Ordering::Greater, env)
}

fn unique(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    let mut seen: Vec<Value> = Vec::new();
    for item in value.iterate()? {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    Ok(Value::from(seen))
}

fn items(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    match &value {
        Value::Map(map) => Ok(Value::from(
            map.iter()
                .map(|(k, v)| Value::from(vec![Value::from(k.as_str()), v.clone()]))
                .collect::<Vec<_>>(),
        )),
        Value::Undefined(_) => Ok(Value::from(Vec::<Value>::new())),
        other => Err(type_error("items", "a mapping", other)),
    }
}

fn wordcount(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    Ok(Value::from(text(&value)?.split_whitespace().count()))
}

fn to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Undefined(_) | Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) | Value::Markup(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        }
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                .collect::<Result<_>>()?,
        ),
        other => {
            return Err(TemplateError::evaluation(format!(
                "'{}' object is not JSON serializable",
                other.type_name()
            )));
        }
    })
}

fn tojson(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let json = to_json(&value)?;
    let indent = argument(args, kwargs, 0, "indent").is_some_and(Value::is_true);
    let encoded = if indent {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|e| TemplateError::evaluation(e.to_string()))?;
    // Safe inside HTML and <script>
    let encoded = encoded
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\'', "\\u0027");
    Ok(Value::safe(encoded))
}

fn dictsort(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let map = value
        .as_map()
        .ok_or_else(|| type_error("dictsort", "a mapping", &value))?;
    let by_value = argument(args, kwargs, 1, "by").and_then(Value::as_str) == Some("value");
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    if by_value {
        entries.sort_by(|a, b| a.1.compare(b.1).unwrap_or(Ordering::Equal));
    } else {
        entries.sort_by(|a, b| a.0.cmp(b.0));
    }
    if argument(args, kwargs, 2, "reverse").is_some_and(Value::is_true) {
        entries.reverse();
    }
    Ok(Value::from(
        entries
            .into_iter()
            .map(|(k, v)| Value::from(vec![Value::from(k.as_str()), v.clone()]))
            .collect::<Vec<_>>(),
    ))
}

/// Upper bound on the fill items `batch` adds to the last row
const MAX_BATCH_FILL: usize = 100_000;

fn batch(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let size = argument(args, kwargs, 0, "linecount")
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .ok_or_else(|| TemplateError::evaluation("filter 'batch' requires a positive size"))?;
    let size = usize::try_from(size).unwrap_or(usize::MAX);
    let fill = argument(args, kwargs, 1, "fill_with").cloned();
    let items = value.iterate()?;
    let mut rows: Vec<Value> = Vec::new();
    for chunk in items.chunks(size) {
        let mut row = chunk.to_vec();
        if let Some(fill) = &fill {
            if size - row.len() > MAX_BATCH_FILL {
                return Err(TemplateError::evaluation(format!(
                    "filter 'batch' would pad a row with more than {MAX_BATCH_FILL} items"
                )));
            }
            row.resize(size, fill.clone());
        }
        rows.push(Value::from(row));
    }
    Ok(Value::from(rows))
}

fn attr(env: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let name = argument(args, kwargs, 0, "name")
        .ok_or_else(|| TemplateError::evaluation("filter 'attr' requires a name"))?
        .render()?;
    Ok(crate::runtime::getattr(env.undefined_policy(), &value, &name))
}

fn map_values(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let attribute = argument(args, kwargs, 0, "attribute")
        .and_then(Value::as_str)
        .ok_or_else(|| TemplateError::evaluation("filter 'map' requires an attribute"))?;
    let mut out = Vec::new();
    for item in value.iterate()? {
        out.push(match item.as_map() {
            Some(map) => map.get(attribute).cloned().unwrap_or(Value::None),
            None => Value::None,
        });
    }
    Ok(Value::from(out))
}

fn indent(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let width = argument(args, kwargs, 0, "width")
        .and_then(Value::as_i64)
        .unwrap_or(4)
        .max(0) as usize;
    let first = argument(args, kwargs, 1, "first").is_some_and(Value::is_true);
    let pad = " ".repeat(width);
    let s = text(&value)?;
    let mut out = String::with_capacity(s.len());
    for (i, line) in s.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if (i > 0 || first) && !line.is_empty() {
            out.push_str(&pad);
        }
        out.push_str(line);
    }
    Ok(same_kind(&value, out))
}

fn center(_: &Environment, value: Value, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
    let width = argument(args, kwargs, 0, "width")
        .and_then(Value::as_i64)
        .unwrap_or(80)
        .max(0) as usize;
    let s = text(&value)?;
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::from(s));
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    Ok(Value::from(format!("{}{s}{}", " ".repeat(left), " ".repeat(right))))
}

fn to_map(_: &Environment, value: Value, _: &[Value], _: &Kwargs) -> Result<Value> {
    let mut map = IndexMap::new();
    for pair in value.iterate()? {
        match pair.as_list() {
            Some([key, val]) => {
                map.insert(key.render()?, val.clone());
            }
            _ => return Err(type_error("dict", "a list of pairs", &pair)),
        }
    }
    Ok(Value::Map(Arc::new(map)))
}

pub(super) fn register_builtin_filters(registries: &mut Registries) {
    type Builtin = fn(&Environment, Value, &[Value], &Kwargs) -> Result<Value>;
    let builtins: &[(&str, Builtin)] = &[
        ("abs", abs),
        ("attr", attr),
        ("batch", batch),
        ("capitalize", capitalize),
        ("center", center),
        ("count", length),
        ("d", default),
        ("default", default),
        ("dictsort", dictsort),
        ("e", escape),
        ("escape", escape),
        ("first", first),
        ("float", float),
        ("indent", indent),
        ("int", int),
        ("items", items),
        ("join", join),
        ("last", last),
        ("length", length),
        ("list", list),
        ("lower", lower),
        ("map", map_values),
        ("max", max),
        ("min", min),
        ("replace", replace),
        ("reverse", reverse),
        ("round", round),
        ("safe", safe),
        ("sort", sort),
        ("string", string),
        ("sum", sum),
        ("title", title),
        ("todict", to_map),
        ("tojson", tojson),
        ("trim", trim),
        ("unique", unique),
        ("upper", upper),
        ("wordcount", wordcount),
    ];
    for (name, func) in builtins {
        registries.add_filter(Filter::new(*name, *func));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UndefinedPolicy;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn apply(name: &str, value: Value, args: &[Value]) -> Result<Value> {
        let env = Environment::new();
        env.apply_filter(name, value, args, &Kwargs::new())
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[rstest]
    #[case("upper", "hello", "HELLO")]
    #[case("lower", "HeLLo", "hello")]
    #[case("capitalize", "hELLO world", "Hello world")]
    #[case("title", "hello big-world", "Hello Big-World")]
    #[case("trim", "  padded \n", "padded")]
    #[case("reverse", "abc", "cba")]
    fn test_string_filters(#[case] filter: &str, #[case] input: &str, #[case] expected: &str) {
        let result = apply(filter, Value::from(input), &[]).unwrap();
        assert_eq!(result.render().unwrap(), expected);
    }

    #[test]
    fn test_default_only_replaces_undefined_unless_boolean() {
        let undefined = Value::Undefined(Undefined::named(UndefinedPolicy::Lenient, "x"));
        assert_eq!(
            apply("default", undefined, &[Value::from("fallback")]).unwrap(),
            Value::from("fallback")
        );
        assert_eq!(
            apply("default", Value::from(""), &[Value::from("fallback")]).unwrap(),
            Value::from("")
        );
        assert_eq!(
            apply("d", Value::from(""), &[Value::from("fallback"), Value::Bool(true)]).unwrap(),
            Value::from("fallback")
        );
    }

    #[test]
    fn test_join_and_length() {
        let list = Value::from(vec![1, 2, 3]);
        assert_eq!(
            apply("join", list.clone(), &[Value::from(", ")]).unwrap(),
            Value::from("1, 2, 3")
        );
        assert_eq!(apply("length", list, &[]).unwrap(), Value::from(3));
        assert_eq!(apply("count", Value::from("héllo"), &[]).unwrap(), Value::from(5));
    }

    #[test]
    fn test_sort_and_extremes() {
        let list = Value::from(vec![3, 1, 2]);
        assert_eq!(apply("sort", list.clone(), &[]).unwrap(), Value::from(vec![1, 2, 3]));
        assert_eq!(
            apply("sort", list.clone(), &[Value::Bool(true)]).unwrap(),
            Value::from(vec![3, 2, 1])
        );
        assert_eq!(apply("min", list.clone(), &[]).unwrap(), Value::from(1));
        assert_eq!(apply("max", list.clone(), &[]).unwrap(), Value::from(3));
        assert_eq!(apply("sum", list, &[]).unwrap(), Value::from(6));
        assert!(apply("first", Value::from(Vec::<Value>::new()), &[]).unwrap().is_undefined());
    }

    #[test]
    fn test_escape_marks_safe_and_is_idempotent() {
        let escaped = apply("escape", Value::from("<b>"), &[]).unwrap();
        assert_eq!(escaped, Value::safe("&lt;b&gt;"));
        assert_eq!(apply("e", escaped.clone(), &[]).unwrap(), escaped);
    }

    #[rstest]
    #[case(Value::from("42"), Value::from(42))]
    #[case(Value::from("4.7"), Value::from(4))]
    #[case(Value::from("nope"), Value::from(0))]
    #[case(Value::Float(-2.5), Value::from(-2))]
    fn test_int(#[case] input: Value, #[case] expected: Value) {
        assert_eq!(apply("int", input, &[]).unwrap(), expected);
    }

    #[test]
    fn test_round_methods() {
        assert_eq!(apply("round", Value::Float(2.5), &[]).unwrap(), Value::Float(3.0));
        assert_eq!(
            apply("round", Value::Float(2.1234), &[Value::from(2), Value::from("floor")]).unwrap(),
            Value::Float(2.12)
        );
        assert!(apply("round", Value::Float(1.0), &[Value::from(0), Value::from("up")]).is_err());
    }

    #[test]
    fn test_tojson_escapes_html_sensitive_characters() {
        let mut map = IndexMap::new();
        map.insert("tag".to_string(), Value::from("<b>"));
        let result = apply("tojson", Value::from(map), &[]).unwrap();
        assert_eq!(result, Value::safe(r#"{"tag":"\u003cb\u003e"}"#));
    }

    #[test]
    fn test_batch_fills_last_row() {
        let result = apply(
            "batch",
            Value::from(vec![1, 2, 3]),
            &[Value::from(2), Value::from(0)],
        )
        .unwrap();
        assert_eq!(result.repr(), "[[1, 2], [3, 0]]");
    }

    #[test]
    fn test_batch_rejects_huge_padding() {
        let items = Value::from(vec![1, 2, 3]);
        let err = apply(
            "batch",
            items.clone(),
            &[Value::from(1_000_000_000_000_000_000i64), Value::from("x")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch"), "{err}");

        let unpadded = apply("batch", items, &[Value::from(1_000_000_000_000_000_000i64)]).unwrap();
        assert_eq!(unpadded.repr(), "[[1, 2, 3]]");
    }

    #[test]
    fn test_type_errors_are_reported() {
        let err = apply("abs", Value::from("x"), &[]).unwrap_err();
        assert!(err.to_string().contains("abs"));
    }
}
