//! Conversion between JSON test data and runtime values.

use crate::error::{EvalError, EvalResult, ExcKind};
use crate::format;
use crate::heap::{self, OBJECT_OVERHEAD};
use crate::value::{Table, Value, MAX_VALUE_DEPTH};
use serde_json::{Map, Number, Value as Json};

fn too_deep() -> EvalError {
    EvalError::raise(
        ExcKind::RecursionError,
        "maximum recursion depth exceeded while converting a value",
    )
}

/// Build the runtime value for a JSON test input.
///
/// Integers that fit in 64 bits become `int`; other numbers become `float`.
pub fn from_json(json: &Json) -> EvalResult<Value> {
    from_json_at(json, 0)
}

fn from_json_at(json: &Json, depth: usize) -> EvalResult<Value> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep());
    }
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s.clone())?,
        Json::Array(items) => {
            let items = items
                .iter()
                .map(|item| from_json_at(item, depth + 1))
                .collect::<EvalResult<Vec<_>>>()?;
            Value::list(items)?
        }
        Json::Object(entries) => {
            let mut table = Table::new();
            for (key, value) in entries {
                let key = Value::str(key.clone())?;
                let value = from_json_at(value, depth + 1)?;
                table.insert(key.hash_key()?, key, value);
            }
            Value::dict(table)?
        }
    })
}

/// Render a return value as JSON for the outcome record.
///
/// Tuples, sets and ranges become arrays. Dict keys that are not strings are
/// stringified the way `json.dumps` does. Non-finite floats and values with
/// no JSON form (functions, exceptions) are rendered as their `repr` text.
///
/// Every emitted node counts against the heap ceiling, so a value that
/// shares its children many times over fails with `MemoryExceeded` rather
/// than expanding without bound.
pub fn to_json(value: &Value) -> EvalResult<Json> {
    JsonWriter::default().write(value, 0)
}

#[derive(Default)]
struct JsonWriter {
    emitted: usize,
}

impl JsonWriter {
    fn emit(&mut self, bytes: usize) -> EvalResult<()> {
        self.emitted = self.emitted.saturating_add(OBJECT_OVERHEAD).saturating_add(bytes);
        heap::ensure_available(self.emitted)?;
        heap::visit()
    }

    fn array<'a>(
        &mut self,
        items: impl Iterator<Item = &'a Value>,
        depth: usize,
    ) -> EvalResult<Json> {
        let mut out = Vec::new();
        for item in items {
            out.push(self.write(item, depth + 1)?);
        }
        Ok(Json::Array(out))
    }

    fn write(&mut self, value: &Value, depth: usize) -> EvalResult<Json> {
        if depth > MAX_VALUE_DEPTH {
            return Err(too_deep());
        }
        self.emit(0)?;
        Ok(match value {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::Number((*n).into()),
            Value::Float(x) => match Number::from_f64(*x) {
                Some(n) => Json::Number(n),
                None => Json::String(format::format_float(*x)),
            },
            Value::Str(s) => {
                self.emit(s.len())?;
                Json::String(s.as_str().to_owned())
            }
            Value::List(list) => self.array(list.snapshot().iter(), depth)?,
            Value::Tuple(items) => self.array(items.iter(), depth)?,
            Value::Set(set) => {
                let keys: Vec<Value> = set.borrow().keys().cloned().collect();
                self.array(keys.iter(), depth)?
            }
            Value::Range(range) => {
                let mut out = Vec::new();
                for n in (0..range.len()).filter_map(|i| range.get(i)) {
                    self.emit(0)?;
                    out.push(Json::Number(n.into()));
                }
                Json::Array(out)
            }
            Value::Dict(dict) => {
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = json_key(&key)?;
                    self.emit(key.len())?;
                    map.insert(key, self.write(&value, depth + 1)?);
                }
                Json::Object(map)
            }
            other => {
                let text = format::repr(other)?;
                self.emit(text.len())?;
                Json::String(text)
            }
        })
    }
}

fn json_key(key: &Value) -> EvalResult<String> {
    Ok(match key {
        Value::Str(s) => s.as_str().to_owned(),
        Value::None => "null".to_owned(),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Float(x) => format::format_float(*x),
        other => format::repr(other)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_numbers_keep_their_kind() {
        assert_matches!(from_json(&json!(3)).unwrap(), Value::Int(3));
        assert_matches!(from_json(&json!(2.5)).unwrap(), Value::Float(x) if x == 2.5);
        assert_matches!(from_json(&json!(u64::MAX)).unwrap(), Value::Float(_));
    }

    #[test]
    fn test_containers_convert_both_ways() {
        let input = json!({"nums": [2, 7, 11], "name": "x", "flag": true, "none": null});
        let value = from_json(&input).unwrap();
        assert_eq!(to_json(&value).unwrap(), input);
    }

    #[test]
    fn test_tuples_and_ranges_become_arrays() {
        let tuple = Value::tuple(vec![Value::Int(1), Value::str("a").unwrap()]).unwrap();
        assert_eq!(to_json(&tuple).unwrap(), json!([1, "a"]));
        let range = Value::Range(crate::value::RangeObj::new(0, 6, 2).unwrap());
        assert_eq!(to_json(&range).unwrap(), json!([0, 2, 4]));
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let mut table = Table::new();
        table.insert(Value::Int(1).hash_key().unwrap(), Value::Int(1), Value::Int(2));
        table.insert(Value::Bool(true).hash_key().unwrap(), Value::Bool(true), Value::Int(3));
        let dict = Value::dict(table).unwrap();
        assert_eq!(to_json(&dict).unwrap(), json!({"1": 3}));
    }

    #[test]
    fn test_shared_children_count_against_the_ceiling() {
        let _session = crate::heap::HeapSession::begin(64 * 1024);
        let mut value = Value::list(vec![]).unwrap();
        for _ in 0..30 {
            value = Value::list(vec![value.clone(), value]).unwrap();
        }
        assert_matches!(to_json(&value), Err(EvalError::MemoryExceeded { .. }));
    }

    #[test]
    fn test_non_finite_floats_render_as_text() {
        assert_eq!(to_json(&Value::Float(f64::INFINITY)).unwrap(), json!("inf"));
    }
}
