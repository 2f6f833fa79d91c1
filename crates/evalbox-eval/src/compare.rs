//! Pass/fail comparison of a return value against the expected JSON.
//!
//! Numbers compare by value across `int` and `float` (`1 == 1.0`), `NaN`
//! never matches, and `bool` never matches a number. Lists and tuples are
//! both ordered sequences. Mappings compare without regard to order and
//! their keys must be strings. Sets match an array holding the same elements
//! in any order.

use crate::error::EvalResult;
use crate::heap;
use crate::value::{Value, MAX_VALUE_DEPTH};
use serde_json::Value as Json;

pub fn outputs_match(actual: &Value, expected: &Json) -> EvalResult<bool> {
    matches_at(actual, expected, 0)
}

fn number_matches(actual: &Value, expected: &serde_json::Number) -> bool {
    match actual {
        Value::Int(n) => match (expected.as_i64(), expected.as_f64()) {
            (Some(e), _) => *n == e,
            (None, Some(e)) => e.fract() == 0.0 && (*n as f64) == e && e.abs() < 9.2e18,
            _ => false,
        },
        Value::Float(x) => match (expected.as_i64(), expected.as_f64()) {
            (Some(e), _) => x.fract() == 0.0 && *x == e as f64,
            (None, Some(e)) => *x == e,
            _ => false,
        },
        _ => false,
    }
}

fn sequence_matches(actual: &[Value], expected: &[Json], depth: usize) -> EvalResult<bool> {
    if actual.len() != expected.len() {
        return Ok(false);
    }
    for (a, e) in actual.iter().zip(expected) {
        if !matches_at(a, e, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_match(pool: &[Value], expected: &Json, depth: usize) -> EvalResult<bool> {
    for member in pool {
        if matches_at(member, expected, depth + 1)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn matches_at(actual: &Value, expected: &Json, depth: usize) -> EvalResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return Ok(false);
    }
    heap::visit()?;
    Ok(match (actual, expected) {
        (Value::None, Json::Null) => true,
        (Value::Bool(a), Json::Bool(e)) => a == e,
        (Value::Int(_) | Value::Float(_), Json::Number(e)) => number_matches(actual, e),
        (Value::Str(a), Json::String(e)) => a.as_str() == e,
        (Value::List(list), Json::Array(items)) => sequence_matches(&list.snapshot(), items, depth)?,
        (Value::Tuple(tuple), Json::Array(items)) => sequence_matches(tuple, items, depth)?,
        (Value::Range(range), Json::Array(items)) => {
            if range.len() != items.len() {
                return Ok(false);
            }
            for (i, e) in items.iter().enumerate() {
                let matched = match range.get(i) {
                    Some(n) => matches_at(&Value::Int(n), e, depth + 1)?,
                    None => false,
                };
                if !matched {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Set(set), Json::Array(items)) => {
            let members: Vec<Value> = set.borrow().keys().cloned().collect();
            if members.len() != items.len() {
                return Ok(false);
            }
            for e in items {
                if !any_match(&members, e, depth)? {
                    return Ok(false);
                }
            }
            for m in &members {
                let mut found = false;
                for e in items {
                    if matches_at(m, e, depth + 1)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Dict(dict), Json::Object(entries)) => {
            let pairs: Vec<(Value, Value)> = dict
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if pairs.len() != entries.len() {
                return Ok(false);
            }
            for (key, value) in &pairs {
                let matched = match key {
                    Value::Str(k) => match entries.get(k.as_str()) {
                        Some(e) => matches_at(value, e, depth + 1)?,
                        None => false,
                    },
                    _ => false,
                };
                if !matched {
                    return Ok(false);
                }
            }
            true
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::from_json;
    use crate::value::Table;
    use serde_json::json;

    fn check(actual: Value, expected: Json) -> bool {
        outputs_match(&actual, &expected).unwrap()
    }

    #[test]
    fn test_numbers_unify_across_int_and_float() {
        assert!(check(Value::Int(1), json!(1.0)));
        assert!(check(Value::Float(2.0), json!(2)));
        assert!(!check(Value::Float(2.5), json!(2)));
        assert!(!check(Value::Float(f64::NAN), json!(0)));
    }

    #[test]
    fn test_bool_never_equals_a_number() {
        assert!(!check(Value::Bool(true), json!(1)));
        assert!(!check(Value::Int(0), json!(false)));
        assert!(check(Value::Bool(false), json!(false)));
    }

    #[test]
    fn test_tuples_match_arrays() {
        let pair = Value::tuple(vec![Value::Int(0), Value::Int(1)]).unwrap();
        assert!(check(pair, json!([0, 1])));
    }

    #[test]
    fn test_sequences_are_order_sensitive() {
        let value = from_json(&json!([1, 2, 3])).unwrap();
        assert!(check(value.clone(), json!([1, 2, 3])));
        assert!(!check(value.clone(), json!([3, 2, 1])));
        assert!(!check(value.clone(), json!([1, 2])));
    }

    #[test]
    fn test_mappings_are_order_insensitive() {
        let value = from_json(&json!({"a": 1, "b": [2]})).unwrap();
        assert!(check(value.clone(), json!({"b": [2], "a": 1})));
        assert!(!check(value.clone(), json!({"a": 1})));
    }

    #[test]
    fn test_int_keys_do_not_match_string_keys() {
        let mut table = Table::new();
        table.insert(Value::Int(1).hash_key().unwrap(), Value::Int(1), Value::Int(2));
        assert!(!check(Value::dict(table).unwrap(), json!({"1": 2})));
    }

    #[test]
    fn test_sets_match_in_any_order() {
        let mut table = Table::new();
        for n in [3, 1, 2] {
            table.insert(Value::Int(n).hash_key().unwrap(), Value::Int(n), Value::None);
        }
        let set = Value::set(table).unwrap();
        assert!(check(set.clone(), json!([1, 2, 3])));
        assert!(!check(set.clone(), json!([1, 2])));
    }
}
