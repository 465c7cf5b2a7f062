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

//! Built-in global functions

use super::Registries;
use crate::error::{Result, TemplateError};
use crate::model::{Kwargs, Value};

/// Upper bound on the number of items `range` may produce
const MAX_RANGE: usize = 100_000;

fn int_arg(args: &[Value], index: usize) -> Result<i64> {
    args[index].as_i64().ok_or_else(|| {
        TemplateError::evaluation(format!(
            "range() expects integer arguments, got {}",
            args[index].type_name()
        ))
    })
}

/// `range([start,] stop[, step])`
pub fn range(args: &[Value], _: &Kwargs) -> Result<Value> {
    let (start, stop, step) = match args.len() {
        1 => (0, int_arg(args, 0)?, 1),
        2 => (int_arg(args, 0)?, int_arg(args, 1)?, 1),
        3 => (int_arg(args, 0)?, int_arg(args, 1)?, int_arg(args, 2)?),
        n => {
            return Err(TemplateError::evaluation(format!(
                "range() expects 1 to 3 arguments, got {n}"
            )));
        }
    };
    if step == 0 {
        return Err(TemplateError::evaluation("range() step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        if items.len() >= MAX_RANGE {
            return Err(TemplateError::evaluation(format!(
                "range() would produce more than {MAX_RANGE} items"
            )));
        }
        items.push(Value::Integer(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::from(items))
}

/// `dict(key=value, ...)`
pub fn dict(_: &[Value], kwargs: &Kwargs) -> Result<Value> {
    Ok(Value::from(kwargs.clone()))
}

pub(super) fn register_builtin_globals(registries: &mut Registries) {
    registries.add_global("range", Value::function("range", range));
    registries.add_global("dict", Value::function("dict", dict));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_forms() {
        let kw = Kwargs::new();
        assert_eq!(range(&[Value::from(3)], &kw).unwrap(), Value::from(vec![0, 1, 2]));
        assert_eq!(
            range(&[Value::from(1), Value::from(7), Value::from(3)], &kw).unwrap(),
            Value::from(vec![1, 4])
        );
        assert_eq!(
            range(&[Value::from(3), Value::from(0), Value::from(-1)], &kw).unwrap(),
            Value::from(vec![3, 2, 1])
        );
        assert!(range(&[Value::from(1), Value::from(2), Value::from(0)], &kw).is_err());
        assert!(range(&[Value::from(1_000_000)], &kw).is_err());
    }

    #[test]
    fn test_dict_collects_keywords() {
        let mut kw = Kwargs::new();
        kw.insert("a".into(), Value::from(1));
        assert_eq!(dict(&[], &kw).unwrap().repr(), "{'a': 1}");
    }
}
