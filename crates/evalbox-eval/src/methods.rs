//! Methods of the built-in container and string types.
//!
//! `keys()`, `values()` and `items()` return list snapshots rather than
//! live views.

use crate::error::{EvalError, EvalResult, ExcKind};
use crate::evaluator::{insert_entry, sequence_index, Evaluator};
use crate::format;
use crate::heap;
use crate::ops;
use crate::value::{ListObj, Table, TableObj, Value};
use std::rc::Rc;

type Kwargs = Vec<(String, Value)>;

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "clear", "copy",
];

const SET_METHODS: &[&str] = &[
    "add",
    "remove",
    "discard",
    "pop",
    "clear",
    "copy",
    "update",
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "issubset",
    "issuperset",
    "isdisjoint",
];

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "rsplit",
    "splitlines",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "rfind",
    "index",
    "count",
    "isdigit",
    "isnumeric",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
    "title",
    "capitalize",
    "swapcase",
    "center",
    "ljust",
    "rjust",
    "zfill",
    "partition",
    "format",
];

/// `true` if `value.name` is a method the evaluator implements.
pub fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

fn expect_args(owner: &str, name: &str, args: &[Value], min: usize, max: usize) -> EvalResult<()> {
    let n = args.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let message = match (min, max) {
        (0, 0) => format!("{owner}.{name}() takes no arguments ({n} given)"),
        (1, 1) => format!("{owner}.{name}() takes exactly one argument ({n} given)"),
        _ if n < min => format!("{owner}.{name}() expected at least {min} arguments, got {n}"),
        _ => format!("{owner}.{name}() expected at most {max} arguments, got {n}"),
    };
    Err(EvalError::type_error(message))
}

fn no_kwargs(owner: &str, name: &str, kwargs: &Kwargs) -> EvalResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(EvalError::type_error(format!(
            "{owner}.{name}() takes no keyword arguments"
        )))
    }
}

fn str_arg<'a>(owner: &str, name: &str, value: &'a Value) -> EvalResult<&'a str> {
    value.as_str().ok_or_else(|| {
        EvalError::type_error(format!(
            "{owner}.{name}() argument must be str, not {}",
            value.type_name()
        ))
    })
}

fn int_arg(value: &Value) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        EvalError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn pair(key: Value, value: Value) -> EvalResult<Value> {
    Value::tuple(vec![key, value])
}

fn bool_value(b: bool) -> EvalResult<Value> {
    Ok(Value::Bool(b))
}

/// Resolve optional `start`/`end` arguments against a length.
fn span_bounds(args: &[Value], len: usize) -> EvalResult<(usize, usize)> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolve = |value: Option<&Value>, default: i64| -> EvalResult<usize> {
        let n = match value {
            None | Some(Value::None) => default,
            Some(v) => int_arg(v)?,
        };
        let n = if n < 0 { (n + len_i).max(0) } else { n.min(len_i) };
        Ok(n as usize)
    };
    Ok((resolve(args.first(), 0)?, resolve(args.get(1), len_i)?))
}

// ══════════════════════════════════════════════════════════════════════════════
// Dispatch
// ══════════════════════════════════════════════════════════════════════════════

impl Evaluator {
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> EvalResult<Value> {
        if !has_method(receiver, name) {
            return Err(EvalError::raise(
                ExcKind::AttributeError,
                format!(
                    "'{}' object has no attribute '{name}'",
                    receiver.type_name()
                ),
            ));
        }
        match receiver {
            Value::List(list) => self.list_method(list, name, args, kwargs),
            Value::Tuple(items) => {
                no_kwargs("tuple", name, &kwargs)?;
                sequence_method("tuple", name, items, &args)
            }
            Value::Dict(dict) => self.dict_method(dict, name, args, kwargs),
            Value::Set(set) => self.set_method(set, name, args, kwargs),
            Value::Str(text) => self.str_method(text.as_str(), name, args, kwargs),
            _ => Err(EvalError::raise(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{name}'", receiver.type_name()),
            )),
        }
    }

    // ── list ──────────────────────────────────────────────────────────────────

    fn list_method(
        &mut self,
        list: &Rc<ListObj>,
        name: &str,
        args: Vec<Value>,
        mut kwargs: Kwargs,
    ) -> EvalResult<Value> {
        if name == "sort" {
            expect_args("list", name, &args, 0, 0)?;
            let key = take(&mut kwargs, "key");
            let reverse = take(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            no_kwargs("list", name, &kwargs)?;
            let sorted = self.sort_values(list.snapshot(), key, reverse)?;
            let previous = std::mem::replace(&mut *list.borrow_mut(), sorted);
            drop(previous);
            list.sync()?;
            return Ok(Value::None);
        }
        no_kwargs("list", name, &kwargs)?;
        match name {
            "append" => {
                expect_args("list", name, &args, 1, 1)?;
                list.push(args.into_iter().next().unwrap_or(Value::None))?;
                Ok(Value::None)
            }
            "extend" => {
                expect_args("list", name, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                list.extend(items)?;
                Ok(Value::None)
            }
            "insert" => {
                expect_args("list", name, &args, 2, 2)?;
                let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
                let at = int_arg(&args[0])?;
                let at = if at < 0 { (at + len).max(0) } else { at.min(len) } as usize;
                list.reserve(1)?;
                list.borrow_mut().insert(at, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                expect_args("list", name, &args, 0, 1)?;
                if list.len() == 0 {
                    return Err(EvalError::raise(ExcKind::IndexError, "pop from empty list"));
                }
                let index = args.first().cloned().unwrap_or(Value::Int(-1));
                let i = sequence_index(&index, list.len(), "pop")?;
                let item = list.borrow_mut().remove(i);
                list.sync()?;
                Ok(item)
            }
            "remove" => {
                expect_args("list", name, &args, 1, 1)?;
                let position = position_of(&list.snapshot(), &args[0])?;
                let Some(i) = position else {
                    return Err(EvalError::value_error("list.remove(x): x not in list"));
                };
                let removed = list.borrow_mut().remove(i);
                drop(removed);
                list.sync()?;
                Ok(Value::None)
            }
            "reverse" => {
                expect_args("list", name, &args, 0, 0)?;
                list.borrow_mut().reverse();
                Ok(Value::None)
            }
            "clear" => {
                expect_args("list", name, &args, 0, 0)?;
                let removed = std::mem::take(&mut *list.borrow_mut());
                drop(removed);
                list.sync()?;
                Ok(Value::None)
            }
            "copy" => {
                expect_args("list", name, &args, 0, 0)?;
                Value::list(list.snapshot())
            }
            _ => sequence_method("list", name, &list.snapshot(), &args),
        }
    }

    // ── dict ──────────────────────────────────────────────────────────────────

    fn dict_method(
        &mut self,
        dict: &Rc<TableObj>,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> EvalResult<Value> {
        if name != "update" {
            no_kwargs("dict", name, &kwargs)?;
        }
        match name {
            "get" => {
                expect_args("dict", name, &args, 1, 2)?;
                let found = dict.borrow().get(&args[0].hash_key()?).cloned();
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            }
            "keys" | "values" | "items" => {
                expect_args("dict", name, &args, 0, 0)?;
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                heap::ensure_available(entries.len().saturating_mul(crate::value::SLOT))?;
                let items: Vec<Value> = match name {
                    "keys" => entries.into_iter().map(|(k, _)| k).collect(),
                    "values" => entries.into_iter().map(|(_, v)| v).collect(),
                    _ => entries
                        .into_iter()
                        .map(|(k, v)| pair(k, v))
                        .collect::<EvalResult<_>>()?,
                };
                Value::list(items)
            }
            "pop" => {
                expect_args("dict", name, &args, 1, 2)?;
                let removed = dict.borrow_mut().remove(&args[0].hash_key()?);
                match removed {
                    Some((_, value)) => {
                        dict.sync()?;
                        Ok(value)
                    }
                    None => match args.get(1) {
                        Some(default) => Ok(default.clone()),
                        None => Err(EvalError::raise(ExcKind::KeyError, format::repr(&args[0])?)),
                    },
                }
            }
            "popitem" => {
                expect_args("dict", name, &args, 0, 0)?;
                let last = dict.borrow_mut().pop_last();
                match last {
                    Some((key, value)) => {
                        dict.sync()?;
                        pair(key, value)
                    }
                    None => Err(EvalError::raise(
                        ExcKind::KeyError,
                        "'popitem(): dictionary is empty'",
                    )),
                }
            }
            "setdefault" => {
                expect_args("dict", name, &args, 1, 2)?;
                let existing = dict.borrow().get(&args[0].hash_key()?).cloned();
                if let Some(value) = existing {
                    return Ok(value);
                }
                let default = args.get(1).cloned().unwrap_or(Value::None);
                insert_entry(dict, args[0].clone(), default.clone())?;
                Ok(default)
            }
            "update" => {
                expect_args("dict", name, &args, 0, 1)?;
                if let Some(source) = args.first() {
                    let merged = self.call(
                        &Value::Builtin(crate::allow::Builtin::Dict),
                        vec![source.clone()],
                        Vec::new(),
                    )?;
                    if let Value::Dict(merged) = merged {
                        let entries: Vec<(Value, Value)> = merged
                            .borrow()
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        for (key, value) in entries {
                            insert_entry(dict, key, value)?;
                        }
                    }
                }
                for (key, value) in kwargs {
                    insert_entry(dict, Value::str(key)?, value)?;
                }
                Ok(Value::None)
            }
            "clear" => {
                expect_args("dict", name, &args, 0, 0)?;
                dict.borrow_mut().clear();
                dict.sync()?;
                Ok(Value::None)
            }
            "copy" => {
                expect_args("dict", name, &args, 0, 0)?;
                let copy = dict.borrow().duplicate();
                Value::dict(copy)
            }
            _ => Err(EvalError::raise(
                ExcKind::AttributeError,
                format!("'dict' object has no attribute '{name}'"),
            )),
        }
    }

    // ── set ───────────────────────────────────────────────────────────────────

    fn set_method(
        &mut self,
        set: &Rc<TableObj>,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> EvalResult<Value> {
        no_kwargs("set", name, &kwargs)?;
        match name {
            "add" => {
                expect_args("set", name, &args, 1, 1)?;
                insert_entry(set, args[0].clone(), Value::None)?;
                Ok(Value::None)
            }
            "remove" | "discard" => {
                expect_args("set", name, &args, 1, 1)?;
                let removed = set.borrow_mut().remove(&args[0].hash_key()?);
                match removed {
                    Some(_) => set.sync().map(|_| Value::None),
                    None if name == "discard" => Ok(Value::None),
                    None => Err(EvalError::raise(ExcKind::KeyError, format::repr(&args[0])?)),
                }
            }
            "pop" => {
                expect_args("set", name, &args, 0, 0)?;
                let first = set.borrow_mut().pop_first();
                match first {
                    Some((key, _)) => {
                        set.sync()?;
                        Ok(key)
                    }
                    None => Err(EvalError::raise(ExcKind::KeyError, "'pop from an empty set'")),
                }
            }
            "clear" => {
                expect_args("set", name, &args, 0, 0)?;
                set.borrow_mut().clear();
                set.sync()?;
                Ok(Value::None)
            }
            "copy" => {
                expect_args("set", name, &args, 0, 0)?;
                let copy = set.borrow().duplicate();
                Value::set(copy)
            }
            "update" => {
                for arg in &args {
                    let mut iter = self.iterate(arg)?;
                    while let Some(item) = self.next_item(&mut iter)? {
                        insert_entry(set, item, Value::None)?;
                    }
                }
                Ok(Value::None)
            }
            "union" | "intersection" | "difference" | "symmetric_difference" => {
                let mut result = set.borrow().duplicate();
                for arg in &args {
                    let other = self.table_of(arg)?;
                    result = combine(name, &result, &other);
                }
                Value::set(result)
            }
            "issubset" | "issuperset" | "isdisjoint" => {
                expect_args("set", name, &args, 1, 1)?;
                let other = self.table_of(&args[0])?;
                let mine = set.borrow();
                let within = |a: &Table, b: &Table| a.key_hashes().all(|h| b.contains(h));
                let answer = match name {
                    "issubset" => within(&mine, &other),
                    "issuperset" => within(&other, &mine),
                    _ => !mine.key_hashes().any(|h| other.contains(h)),
                };
                bool_value(answer)
            }
            _ => Err(EvalError::raise(
                ExcKind::AttributeError,
                format!("'set' object has no attribute '{name}'"),
            )),
        }
    }

    /// Entries of any iterable as a set table.
    fn table_of(&mut self, value: &Value) -> EvalResult<Table> {
        if let Value::Set(other) = value {
            return Ok(other.borrow().duplicate());
        }
        let mut table = Table::new();
        let mut iter = self.iterate(value)?;
        while let Some(item) = self.next_item(&mut iter)? {
            table.insert(item.hash_key()?, item, Value::None);
        }
        Ok(table)
    }

    // ── str ───────────────────────────────────────────────────────────────────

    fn str_method(
        &mut self,
        text: &str,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> EvalResult<Value> {
        if name == "format" {
            return self.str_format(text, &args, &kwargs);
        }
        no_kwargs("str", name, &kwargs)?;
        match name {
            "upper" => Value::str(text.to_uppercase()),
            "lower" => Value::str(text.to_lowercase()),
            "swapcase" => Value::str(
                text.chars()
                    .flat_map(|c| {
                        if c.is_uppercase() {
                            c.to_lowercase().collect::<Vec<_>>()
                        } else {
                            c.to_uppercase().collect::<Vec<_>>()
                        }
                    })
                    .collect::<String>(),
            ),
            "title" => {
                let mut out = String::with_capacity(text.len());
                let mut previous_cased = false;
                for c in text.chars() {
                    if previous_cased {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    previous_cased = c.is_alphabetic();
                }
                Value::str(out)
            }
            "capitalize" => {
                let mut chars = text.chars();
                let out: String = match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.as_str().to_lowercase().chars())
                        .collect(),
                    None => String::new(),
                };
                Value::str(out)
            }
            "strip" | "lstrip" | "rstrip" => {
                expect_args("str", name, &args, 0, 1)?;
                let chars: Option<Vec<char>> = match args.first() {
                    None | Some(Value::None) => None,
                    Some(v) => Some(str_arg("str", name, v)?.chars().collect()),
                };
                let matches = |c: char| match &chars {
                    None => c.is_whitespace(),
                    Some(set) => set.contains(&c),
                };
                let out = match name {
                    "strip" => text.trim_matches(matches),
                    "lstrip" => text.trim_start_matches(matches),
                    _ => text.trim_end_matches(matches),
                };
                Value::str(out)
            }
            "split" | "rsplit" => {
                expect_args("str", name, &args, 0, 2)?;
                let max = match args.get(1) {
                    None => -1,
                    Some(v) => int_arg(v)?,
                };
                let max = usize::try_from(max).ok();
                let parts: Vec<String> = match args.first() {
                    None | Some(Value::None) => split_whitespace(text, max, name == "rsplit"),
                    Some(sep) => {
                        let sep = str_arg("str", name, sep)?;
                        if sep.is_empty() {
                            return Err(EvalError::value_error("empty separator"));
                        }
                        split_on(text, sep, max, name == "rsplit")
                    }
                };
                self.string_list(parts)
            }
            "splitlines" => {
                expect_args("str", name, &args, 0, 0)?;
                self.string_list(text.lines().map(str::to_owned).collect())
            }
            "join" => {
                expect_args("str", name, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                let mut pieces = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(s) => pieces.push(s.as_str()),
                        other => {
                            return Err(EvalError::type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            )))
                        }
                    }
                }
                let total = pieces
                    .iter()
                    .map(|p| p.len())
                    .sum::<usize>()
                    .saturating_add(text.len().saturating_mul(pieces.len()));
                heap::ensure_available(total)?;
                Value::str(pieces.join(text))
            }
            "replace" => {
                expect_args("str", name, &args, 2, 3)?;
                let old = str_arg("str", name, &args[0])?;
                let new = str_arg("str", name, &args[1])?;
                let count = match args.get(2) {
                    None => -1,
                    Some(v) => int_arg(v)?,
                };
                let occurrences = if old.is_empty() {
                    text.chars().count() + 1
                } else {
                    text.matches(old).count()
                };
                let growth = new.len().saturating_mul(occurrences);
                heap::ensure_available(text.len().saturating_add(growth))?;
                let out = match usize::try_from(count) {
                    Ok(n) => text.replacen(old, new, n),
                    Err(_) => text.replace(old, new),
                };
                Value::str(out)
            }
            "startswith" | "endswith" => {
                expect_args("str", name, &args, 1, 3)?;
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = span_bounds(&args[1..], chars.len())?;
                let window: String = if start <= end {
                    chars[start..end].iter().collect()
                } else {
                    String::new()
                };
                let candidates: Vec<Value> = match &args[0] {
                    Value::Tuple(items) => items.to_vec(),
                    other => vec![other.clone()],
                };
                for candidate in &candidates {
                    let affix = str_arg("str", name, candidate)?;
                    let hit = if name == "startswith" {
                        window.starts_with(affix)
                    } else {
                        window.ends_with(affix)
                    };
                    if hit {
                        return bool_value(true);
                    }
                }
                bool_value(false)
            }
            "find" | "rfind" | "index" => {
                expect_args("str", name, &args, 1, 3)?;
                let needle = str_arg("str", name, &args[0])?;
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = span_bounds(&args[1..], chars.len())?;
                let found = if start > end {
                    None
                } else {
                    let window: String = chars[start..end].iter().collect();
                    let byte = if name == "rfind" {
                        window.rfind(needle)
                    } else {
                        window.find(needle)
                    };
                    byte.map(|b| start + window[..b].chars().count())
                };
                match (found, name) {
                    (Some(i), _) => Ok(Value::Int(i64::try_from(i).unwrap_or(i64::MAX))),
                    (None, "index") => Err(EvalError::value_error("substring not found")),
                    (None, _) => Ok(Value::Int(-1)),
                }
            }
            "count" => {
                expect_args("str", name, &args, 1, 1)?;
                let needle = str_arg("str", name, &args[0])?;
                let n = if needle.is_empty() {
                    text.chars().count() + 1
                } else {
                    text.matches(needle).count()
                };
                Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
            }
            "isdigit" | "isnumeric" => {
                bool_value(!text.is_empty() && text.chars().all(|c| c.is_numeric()))
            }
            "isalpha" => bool_value(!text.is_empty() && text.chars().all(char::is_alphabetic)),
            "isalnum" => bool_value(!text.is_empty() && text.chars().all(char::is_alphanumeric)),
            "isspace" => bool_value(!text.is_empty() && text.chars().all(char::is_whitespace)),
            "isupper" | "islower" => {
                let upper = name == "isupper";
                let mut cased = false;
                for c in text.chars() {
                    if c.is_lowercase() || c.is_uppercase() {
                        cased = true;
                        if c.is_uppercase() != upper {
                            return bool_value(false);
                        }
                    }
                }
                bool_value(cased)
            }
            "center" | "ljust" | "rjust" => {
                expect_args("str", name, &args, 1, 2)?;
                let width = usize::try_from(int_arg(&args[0])?).unwrap_or(0);
                let fill = match args.get(1) {
                    None => ' ',
                    Some(v) => {
                        let s = str_arg("str", name, v)?;
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(EvalError::type_error(
                                    "The fill character must be exactly one character long",
                                ))
                            }
                        }
                    }
                };
                let len = text.chars().count();
                let pad = width.saturating_sub(len);
                heap::ensure_available(text.len().saturating_add(pad.saturating_mul(4)))?;
                let (left, right) = match name {
                    "ljust" => (0, pad),
                    "rjust" => (pad, 0),
                    _ => {
                        let left = pad / 2 + (pad & width & 1);
                        (left, pad - left)
                    }
                };
                let mut out = String::with_capacity(text.len() + pad);
                out.extend(std::iter::repeat(fill).take(left));
                out.push_str(text);
                out.extend(std::iter::repeat(fill).take(right));
                Value::str(out)
            }
            "zfill" => {
                expect_args("str", name, &args, 1, 1)?;
                let width = usize::try_from(int_arg(&args[0])?).unwrap_or(0);
                let len = text.chars().count();
                if width <= len {
                    return Value::str(text);
                }
                heap::ensure_available(width)?;
                let (sign, digits) = match text.chars().next() {
                    Some(c @ ('+' | '-')) => (Some(c), &text[1..]),
                    _ => (None, text),
                };
                let mut out = String::with_capacity(width);
                out.extend(sign);
                out.extend(std::iter::repeat('0').take(width - len));
                out.push_str(digits);
                Value::str(out)
            }
            "partition" => {
                expect_args("str", name, &args, 1, 1)?;
                let sep = str_arg("str", name, &args[0])?;
                if sep.is_empty() {
                    return Err(EvalError::value_error("empty separator"));
                }
                let (head, tail, found) = match text.split_once(sep) {
                    Some((h, t)) => (h, t, sep),
                    None => (text, "", ""),
                };
                Value::tuple(vec![Value::str(head)?, Value::str(found)?, Value::str(tail)?])
            }
            _ => Err(EvalError::raise(
                ExcKind::AttributeError,
                format!("'str' object has no attribute '{name}'"),
            )),
        }
    }

    fn string_list(&mut self, parts: Vec<String>) -> EvalResult<Value> {
        let out = ListObj::new(Vec::new())?;
        for part in parts {
            out.push(Value::str(part)?)?;
        }
        Ok(Value::List(out))
    }

    /// `"{} and {name:>5}".format(...)`
    fn str_format(&mut self, template: &str, args: &[Value], kwargs: &Kwargs) -> EvalResult<Value> {
        let mut out = String::new();
        let mut chars = template.chars().peekable();
        let mut auto_index = 0usize;
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => {
                    return Err(EvalError::value_error(
                        "Single '}' encountered in format string",
                    ))
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => field.push(c),
                            None => {
                                return Err(EvalError::value_error(
                                    "expected '}' before end of string",
                                ))
                            }
                        }
                    }
                    let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                    let (key, conversion) = match head.split_once('!') {
                        Some((key, conv)) => (key, conv.chars().next()),
                        None => (head, None),
                    };
                    let value = if key.is_empty() {
                        let value = args.get(auto_index).cloned();
                        auto_index += 1;
                        value.ok_or_else(|| {
                            EvalError::raise(
                                ExcKind::IndexError,
                                format!("Replacement index {} out of range for positional args tuple", auto_index - 1),
                            )
                        })?
                    } else if let Ok(index) = key.parse::<usize>() {
                        args.get(index).cloned().ok_or_else(|| {
                            EvalError::raise(
                                ExcKind::IndexError,
                                format!("Replacement index {index} out of range for positional args tuple"),
                            )
                        })?
                    } else {
                        kwargs
                            .iter()
                            .find(|(k, _)| k == key)
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| EvalError::raise(ExcKind::KeyError, format::repr_str(key)))?
                    };
                    let value = match conversion {
                        Some('r') => Value::str(format::repr(&value)?)?,
                        Some(_) => Value::str(format::display(&value)?)?,
                        None => value,
                    };
                    let piece = format::apply_spec(&value, spec)?;
                    heap::ensure_available(out.len().saturating_add(piece.len()))?;
                    out.push_str(&piece);
                }
                other => out.push(other),
            }
        }
        Value::str(out)
    }
}

fn take(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

fn position_of(items: &[Value], target: &Value) -> EvalResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if ops::equals(item, target)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// `index` and `count`, shared by lists and tuples.
fn sequence_method(owner: &str, name: &str, items: &[Value], args: &[Value]) -> EvalResult<Value> {
    match name {
        "count" => {
            expect_args(owner, name, args, 1, 1)?;
            let mut n = 0i64;
            for item in items {
                if ops::equals(item, &args[0])? {
                    n += 1;
                }
            }
            Ok(Value::Int(n))
        }
        "index" => {
            expect_args(owner, name, args, 1, 3)?;
            let (start, end) = span_bounds(&args[1..], items.len())?;
            if start < end {
                if let Some(i) = position_of(&items[start..end], &args[0])? {
                    return Ok(Value::Int(i64::try_from(start + i).unwrap_or(i64::MAX)));
                }
            }
            Err(EvalError::value_error(format!(
                "{owner}.index(x): x not in {owner}"
            )))
        }
        _ => Err(EvalError::raise(
            ExcKind::AttributeError,
            format!("'{owner}' object has no attribute '{name}'"),
        )),
    }
}

fn combine(op: &str, a: &Table, b: &Table) -> Table {
    let mut out = Table::new();
    let mut add = |hash: &crate::value::HashKey, key: &Value| {
        out.insert(hash.clone(), key.clone(), Value::None);
    };
    match op {
        "union" => {
            for (hash, key) in a.key_hashes().zip(a.keys()).chain(b.key_hashes().zip(b.keys())) {
                add(hash, key);
            }
        }
        "intersection" => {
            for (hash, key) in a.key_hashes().zip(a.keys()) {
                if b.contains(hash) {
                    add(hash, key);
                }
            }
        }
        "difference" => {
            for (hash, key) in a.key_hashes().zip(a.keys()) {
                if !b.contains(hash) {
                    add(hash, key);
                }
            }
        }
        _ => {
            for (hash, key) in a.key_hashes().zip(a.keys()) {
                if !b.contains(hash) {
                    add(hash, key);
                }
            }
            for (hash, key) in b.key_hashes().zip(b.keys()) {
                if !a.contains(hash) {
                    add(hash, key);
                }
            }
        }
    }
    out
}

fn split_whitespace(text: &str, max: Option<usize>, from_right: bool) -> Vec<String> {
    let Some(n) = max else {
        return text.split_whitespace().map(str::to_owned).collect();
    };
    if from_right {
        let mut rest = text.trim_end();
        let mut tail = Vec::new();
        for _ in 0..n {
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    tail.push(rest[i..].trim_start().to_owned());
                    rest = rest[..i].trim_end();
                }
                None => break,
            }
        }
        let mut out = Vec::with_capacity(tail.len() + 1);
        if !rest.is_empty() {
            out.push(rest.to_owned());
        }
        out.extend(tail.into_iter().rev());
        out
    } else {
        let mut rest = text.trim_start();
        let mut out = Vec::new();
        for _ in 0..n {
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    out.push(rest[..i].to_owned());
                    rest = rest[i..].trim_start();
                }
                None => break,
            }
        }
        if !rest.is_empty() {
            out.push(rest.to_owned());
        }
        out
    }
}

fn split_on(text: &str, sep: &str, max: Option<usize>, from_right: bool) -> Vec<String> {
    match (max, from_right) {
        (None, _) => text.split(sep).map(str::to_owned).collect(),
        (Some(n), false) => text.splitn(n + 1, sep).map(str::to_owned).collect(),
        (Some(n), true) => {
            let mut parts: Vec<String> = text.rsplitn(n + 1, sep).map(str::to_owned).collect();
            parts.reverse();
            parts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace_with_limit() {
        assert_eq!(split_whitespace("  a b  c ", None, false), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", Some(1), false), vec!["a", "b c"]);
        assert_eq!(split_whitespace("a b c", Some(1), true), vec!["a b", "c"]);
    }

    #[test]
    fn test_split_on_separator() {
        assert_eq!(split_on("a,b,,c", ",", None, false), vec!["a", "b", "", "c"]);
        assert_eq!(split_on("a,b,c", ",", Some(1), true), vec!["a,b", "c"]);
    }
}
