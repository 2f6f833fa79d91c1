//! Builtin functions.
//!
//! Builtins that return iterators in the reference language (`map`,
//! `filter`, `zip`, `enumerate`, `reversed`) return lists here; results
//! grow through [`ListObj::push`] so every element is metered.

use crate::allow::Builtin;
use crate::error::{EvalError, EvalResult, ExcKind};
use crate::evaluator::{insert_entry, Evaluator};
use crate::format;
use crate::ops;
use crate::value::{ListObj, RangeObj, Table, TableObj, Value};
use evalbox_types::ast::BinOp;
use std::cell::RefCell;
use std::cmp::Ordering;

type Kwargs = Vec<(String, Value)>;

// ── Argument helpers ──────────────────────────────────────────────────────────

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> EvalResult<()> {
    let n = args.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let message = if min == max {
        match min {
            0 => format!("{name}() takes no arguments ({n} given)"),
            1 => format!("{name}() takes exactly one argument ({n} given)"),
            _ => format!("{name}() takes exactly {min} arguments ({n} given)"),
        }
    } else if n < min {
        format!("{name} expected at least {min} argument{}, got {n}", if min == 1 { "" } else { "s" })
    } else {
        format!("{name} expected at most {max} arguments, got {n}")
    };
    Err(EvalError::type_error(message))
}

fn take_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

fn no_more_kwargs(name: &str, kwargs: &Kwargs) -> EvalResult<()> {
    match kwargs.first() {
        None => Ok(()),
        Some((key, _)) => Err(EvalError::type_error(format!(
            "'{key}' is an invalid keyword argument for {name}()"
        ))),
    }
}

fn integer(value: &Value) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        EvalError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_to_int(x: f64) -> EvalResult<i64> {
    if x.is_nan() {
        return Err(EvalError::value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() {
        return Err(EvalError::raise(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let t = x.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(EvalError::overflow());
    }
    Ok(t as i64)
}

#[derive(Debug, PartialEq)]
enum IntLiteral {
    Invalid,
    TooLarge,
}

fn parse_int(text: &str, base: u32) -> Result<i64, IntLiteral> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits = match base {
        16 => digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")).unwrap_or(digits),
        8 => digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")).unwrap_or(digits),
        2 => digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")).unwrap_or(digits),
        _ => digits,
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(IntLiteral::Invalid);
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(base)) {
        return Err(IntLiteral::Invalid);
    }
    // Every digit is valid, so a failure here can only be overflow.
    let magnitude = i128::from_str_radix(&cleaned, base).map_err(|_| IntLiteral::TooLarge)?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| IntLiteral::TooLarge)
}

fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    let negative = lower.starts_with('-');
    let special = match unsigned {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(x) = special {
        return Some(if negative { -x } else { x });
    }
    if trimmed.contains("__") || trimmed.starts_with('_') || trimmed.ends_with('_') {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    cleaned.parse().ok()
}

/// Round half to even.
fn round_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

fn round_digits(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    if ndigits >= 0 {
        let digits = usize::try_from(ndigits.min(320)).unwrap_or(320);
        return format!("{x:.digits$}").parse().unwrap_or(x);
    }
    let scale = 10f64.powi(i32::try_from(-ndigits).unwrap_or(i32::MAX));
    if !scale.is_finite() {
        return 0.0 * x;
    }
    round_even(x / scale) * scale
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> EvalResult<i64> {
    if modulus == 0 {
        return Err(EvalError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(EvalError::value_error(
            "base is not invertible for the given modulus",
        ));
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    let mut r = result.rem_euclid(m);
    if modulus < 0 && r != 0 {
        r += m;
    }
    i64::try_from(r).map_err(|_| EvalError::overflow())
}

fn is_instance(value: &Value, class: &Value) -> EvalResult<bool> {
    match class {
        Value::Builtin(b) if b.is_type() => Ok(match b {
            Builtin::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
            Builtin::Bool => matches!(value, Value::Bool(_)),
            Builtin::Float => matches!(value, Value::Float(_)),
            Builtin::Str => matches!(value, Value::Str(_)),
            Builtin::List => matches!(value, Value::List(_)),
            Builtin::Tuple => matches!(value, Value::Tuple(_)),
            Builtin::Dict => matches!(value, Value::Dict(_)),
            Builtin::Set => matches!(value, Value::Set(_)),
            Builtin::Range => matches!(value, Value::Range(_)),
            _ => false,
        }),
        Value::ExceptionClass(kind) => Ok(match value {
            Value::Exception(exc) => exc.kind.is_subclass_of(*kind),
            _ => false,
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(EvalError::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

/// Stable sort of `keys` order, reporting the first comparison failure.
fn sort_indices(keys: &[Value], reverse: bool) -> EvalResult<Vec<usize>> {
    let failure: RefCell<Option<EvalError>> = RefCell::new(None);
    let mut indices: Vec<usize> = (0..keys.len()).collect();
    indices.sort_by(|&a, &b| {
        if failure.borrow().is_some() {
            return Ordering::Equal;
        }
        let (x, y) = if reverse { (&keys[b], &keys[a]) } else { (&keys[a], &keys[b]) };
        match ops::order(x, y) {
            Ok(ordering) => ordering,
            Err(e) => {
                *failure.borrow_mut() = Some(e);
                Ordering::Equal
            }
        }
    });
    match failure.into_inner() {
        Some(e) => Err(e),
        None => Ok(indices),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Dispatch
// ══════════════════════════════════════════════════════════════════════════════

impl Evaluator {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        mut kwargs: Kwargs,
    ) -> EvalResult<Value> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let sep = self.text_kwarg(&mut kwargs, "sep", " ")?;
                let end = self.text_kwarg(&mut kwargs, "end", "\n")?;
                no_more_kwargs(name, &kwargs)?;
                let mut line = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        line.push_str(&sep);
                    }
                    line.push_str(&format::display(arg)?);
                }
                line.push_str(&end);
                self.write_output(&line)?;
                Ok(Value::None)
            }
            Builtin::Len => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let n = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(l) => l.len(),
                    Value::Tuple(t) => t.len(),
                    Value::Dict(d) | Value::Set(d) => d.len(),
                    Value::Range(r) => r.len(),
                    other => {
                        return Err(EvalError::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(i64::try_from(n).map_err(|_| EvalError::overflow())?))
            }
            Builtin::Range => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 3)?;
                let bounds = args.iter().map(integer).collect::<EvalResult<Vec<i64>>>()?;
                let range = match bounds.as_slice() {
                    &[stop] => RangeObj::new(0, stop, 1)?,
                    &[start, stop] => RangeObj::new(start, stop, 1)?,
                    &[start, stop, step, ..] => RangeObj::new(start, stop, step)?,
                    &[] => RangeObj::new(0, 0, 1)?,
                };
                Ok(Value::Range(range))
            }
            Builtin::Enumerate => {
                let start_kw = take_kwarg(&mut kwargs, "start");
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut index = match start_kw.as_ref().or(args.get(1)) {
                    Some(v) => integer(v)?,
                    None => 0,
                };
                let out = ListObj::new(Vec::new())?;
                let mut iter = self.iterate(&args[0])?;
                while let Some(item) = self.next_item(&mut iter)? {
                    out.push(Value::tuple(vec![Value::Int(index), item])?)?;
                    index = index.checked_add(1).ok_or_else(EvalError::overflow)?;
                }
                Ok(Value::List(out))
            }
            Builtin::Int => self.builtin_int(args, kwargs),
            Builtin::Str => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Value::str(""),
                    Some(v @ Value::Str(_)) => Ok(v.clone()),
                    Some(v) => Value::str(format::display(v)?),
                }
            }
            Builtin::Float => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => parse_float(s).map(Value::Float).ok_or_else(|| {
                        EvalError::value_error(format!(
                            "could not convert string to float: {}",
                            format::repr_str(s)
                        ))
                    }),
                    Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
                        EvalError::type_error(format!(
                            "float() argument must be a string or a real number, not '{}'",
                            v.type_name()
                        ))
                    }),
                }
            }
            Builtin::Bool => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Builtin::List => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Value::list(Vec::new()),
                    Some(v) => {
                        let items = self.collect(v)?;
                        Value::list(items)
                    }
                }
            }
            Builtin::Tuple => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Value::tuple(Vec::new()),
                    Some(v @ Value::Tuple(_)) => Ok(v.clone()),
                    Some(v) => {
                        let items = self.collect(v)?;
                        Value::tuple(items)
                    }
                }
            }
            Builtin::Set => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let set = TableObj::new(Table::new())?;
                if let Some(v) = args.first() {
                    let mut iter = self.iterate(v)?;
                    while let Some(item) = self.next_item(&mut iter)? {
                        insert_entry(&set, item, Value::None)?;
                    }
                }
                Ok(Value::Set(set))
            }
            Builtin::Dict => self.builtin_dict(args, kwargs),
            Builtin::Min | Builtin::Max => self.builtin_extreme(builtin, args, kwargs),
            Builtin::Sum => {
                let start_kw = take_kwarg(&mut kwargs, "start");
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut total = start_kw.or_else(|| args.get(1).cloned()).unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(EvalError::type_error(
                        "sum() can't sum strings [use ''.join(seq) instead]",
                    ));
                }
                let mut iter = self.iterate(&args[0])?;
                while let Some(item) = self.next_item(&mut iter)? {
                    total = ops::binary(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                let sorted = self.sort_values(items, key, reverse)?;
                Value::list(sorted)
            }
            Builtin::Reversed => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                if matches!(args[0], Value::Set(_)) {
                    return Err(EvalError::type_error("'set' object is not reversible"));
                }
                let mut items = self.collect(&args[0])?;
                items.reverse();
                Value::list(items)
            }
            Builtin::IsInstance => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                Ok(Value::Bool(is_instance(&args[0], &args[1])?))
            }
            Builtin::Abs => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(EvalError::overflow),
                    Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                    Value::Float(x) => Ok(Value::Float(x.abs())),
                    other => Err(EvalError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Zip => {
                no_more_kwargs(name, &kwargs)?;
                let mut iters = Vec::with_capacity(args.len());
                for arg in &args {
                    iters.push(self.iterate(arg)?);
                }
                let out = ListObj::new(Vec::new())?;
                if iters.is_empty() {
                    return Ok(Value::List(out));
                }
                'rows: loop {
                    let mut row = Vec::with_capacity(iters.len());
                    for iter in iters.iter_mut() {
                        match self.next_item(iter)? {
                            Some(item) => row.push(item),
                            None => break 'rows,
                        }
                    }
                    out.push(Value::tuple(row)?)?;
                }
                Ok(Value::List(out))
            }
            Builtin::Any | Builtin::All => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let want = builtin == Builtin::Any;
                let mut iter = self.iterate(&args[0])?;
                while let Some(item) = self.next_item(&mut iter)? {
                    if item.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            Builtin::Round => {
                let ndigits_kw = take_kwarg(&mut kwargs, "ndigits");
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let ndigits = match ndigits_kw.or_else(|| args.get(1).cloned()) {
                    None | Some(Value::None) => None,
                    Some(v) => Some(integer(&v)?),
                };
                match (&args[0], ndigits) {
                    (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(integer(&args[0])?)),
                    (Value::Int(n), Some(d)) => {
                        if d >= 0 {
                            return Ok(Value::Int(*n));
                        }
                        let scale = u32::try_from(-d).ok().and_then(|e| 10i64.checked_pow(e));
                        let Some(scale) = scale else {
                            return Ok(Value::Int(0));
                        };
                        let q = round_even(*n as f64 / scale as f64) as i64;
                        q.checked_mul(scale).map(Value::Int).ok_or_else(EvalError::overflow)
                    }
                    (Value::Float(x), None) => Ok(Value::Int(float_to_int(round_even(*x))?)),
                    (Value::Float(x), Some(d)) => Ok(Value::Float(round_digits(*x, d))),
                    (other, _) => Err(EvalError::type_error(format!(
                        "type {} doesn't define __round__ method",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Map => {
                no_more_kwargs(name, &kwargs)?;
                if args.len() < 2 {
                    return Err(EvalError::type_error("map() must have at least two arguments."));
                }
                let mut args = args.into_iter();
                let func = args.next().unwrap_or(Value::None);
                let mut iters = Vec::new();
                for arg in args {
                    iters.push(self.iterate(&arg)?);
                }
                let out = ListObj::new(Vec::new())?;
                'items: loop {
                    let mut call_args = Vec::with_capacity(iters.len());
                    for iter in iters.iter_mut() {
                        match self.next_item(iter)? {
                            Some(item) => call_args.push(item),
                            None => break 'items,
                        }
                    }
                    let mapped = self.call(&func, call_args, Vec::new())?;
                    out.push(mapped)?;
                }
                Ok(Value::List(out))
            }
            Builtin::Filter => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let out = ListObj::new(Vec::new())?;
                let mut iter = self.iterate(&args[1])?;
                while let Some(item) = self.next_item(&mut iter)? {
                    let keep = match &args[0] {
                        Value::None => item.truthy(),
                        func => self.call1(func, item.clone())?.truthy(),
                    };
                    if keep {
                        out.push(item)?;
                    }
                }
                Ok(Value::List(out))
            }
            Builtin::DivMod => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let (a, b) = (&args[0], &args[1]);
                if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
                    if y == 0 {
                        return Err(EvalError::raise(
                            ExcKind::ZeroDivisionError,
                            "integer division or modulo by zero",
                        ));
                    }
                    let q = ops::floor_div(x, y).ok_or_else(EvalError::overflow)?;
                    let r = ops::floor_mod(x, y).ok_or_else(EvalError::overflow)?;
                    return Value::tuple(vec![Value::Int(q), Value::Int(r)]);
                }
                let q = ops::binary(BinOp::FloorDiv, a, b)?;
                let r = ops::binary(BinOp::Mod, a, b)?;
                Value::tuple(vec![q, r])
            }
            Builtin::Pow => {
                let modulus_kw = take_kwarg(&mut kwargs, "mod");
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 3)?;
                match modulus_kw.or_else(|| args.get(2).cloned()) {
                    None | Some(Value::None) => ops::binary(BinOp::Pow, &args[0], &args[1]),
                    Some(m) => {
                        let (Some(base), Some(exp), Some(m)) =
                            (args[0].as_int(), args[1].as_int(), m.as_int())
                        else {
                            return Err(EvalError::type_error(
                                "pow() 3rd argument not allowed unless all arguments are integers",
                            ));
                        };
                        mod_pow(base, exp, m).map(Value::Int)
                    }
                }
            }
            Builtin::Chr => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let code = integer(&args[0])?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| EvalError::value_error("chr() arg not in range(0x110000)"))?;
                Value::str(c.to_string())
            }
            Builtin::Ord => {
                no_more_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let Value::Str(s) = &args[0] else {
                    return Err(EvalError::type_error(format!(
                        "ord() expected string of length 1, but {} found",
                        args[0].type_name()
                    )));
                };
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                    _ => Err(EvalError::type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    ))),
                }
            }
        }
    }

    fn text_kwarg(&mut self, kwargs: &mut Kwargs, key: &str, default: &str) -> EvalResult<String> {
        match take_kwarg(kwargs, key) {
            None | Some(Value::None) => Ok(default.to_owned()),
            Some(Value::Str(s)) => Ok(s.as_str().to_owned()),
            Some(other) => Err(EvalError::type_error(format!(
                "{key} must be None or a string, not {}",
                other.type_name()
            ))),
        }
    }

    fn builtin_int(&mut self, args: Vec<Value>, mut kwargs: Kwargs) -> EvalResult<Value> {
        let base_kw = take_kwarg(&mut kwargs, "base");
        no_more_kwargs("int", &kwargs)?;
        arity("int", &args, 0, 2)?;
        let base = base_kw.or_else(|| args.get(1).cloned());
        let Some(value) = args.first() else {
            return Ok(Value::Int(0));
        };
        match (value, base) {
            (Value::Str(s), base) => {
                let base = match base {
                    None => 10,
                    Some(b) => {
                        let b = integer(&b)?;
                        if !(2..=36).contains(&b) {
                            return Err(EvalError::value_error(
                                "int() base must be >= 2 and <= 36, or 0",
                            ));
                        }
                        b as u32
                    }
                };
                match parse_int(s, base) {
                    Ok(n) => Ok(Value::Int(n)),
                    Err(IntLiteral::TooLarge) => Err(EvalError::raise(
                        ExcKind::OverflowError,
                        format!("int() literal is too large: {}", format::repr_str(s)),
                    )),
                    Err(IntLiteral::Invalid) => Err(EvalError::value_error(format!(
                        "invalid literal for int() with base {base}: {}",
                        format::repr_str(s)
                    ))),
                }
            }
            (_, Some(_)) => Err(EvalError::type_error(
                "int() can't convert non-string with explicit base",
            )),
            (Value::Int(n), None) => Ok(Value::Int(*n)),
            (Value::Bool(b), None) => Ok(Value::Int(i64::from(*b))),
            (Value::Float(x), None) => float_to_int(*x).map(Value::Int),
            (other, None) => Err(EvalError::type_error(format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        }
    }

    fn builtin_dict(&mut self, args: Vec<Value>, kwargs: Kwargs) -> EvalResult<Value> {
        arity("dict", &args, 0, 1)?;
        let dict = TableObj::new(Table::new())?;
        match args.first() {
            None => {}
            Some(Value::Dict(source)) => {
                let entries: Vec<(Value, Value)> = source
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, value) in entries {
                    insert_entry(&dict, key, value)?;
                }
            }
            Some(pairs) => {
                let mut iter = self.iterate(pairs)?;
                let mut position = 0usize;
                while let Some(pair) = self.next_item(&mut iter)? {
                    let items = self.collect(&pair).map_err(|_| {
                        EvalError::type_error(format!(
                            "cannot convert dictionary update sequence element #{position} to a sequence"
                        ))
                    })?;
                    let [key, value]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
                        EvalError::value_error(format!(
                            "dictionary update sequence element #{position} has length {}; 2 is required",
                            items.len()
                        ))
                    })?;
                    insert_entry(&dict, key, value)?;
                    position += 1;
                }
            }
        }
        for (key, value) in kwargs {
            insert_entry(&dict, Value::str(key)?, value)?;
        }
        Ok(Value::Dict(dict))
    }

    fn builtin_extreme(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> EvalResult<Value> {
        let name = builtin.name();
        let key = take_kwarg(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
        let default = take_kwarg(&mut kwargs, "default");
        no_more_kwargs(name, &kwargs)?;
        if args.is_empty() {
            return Err(EvalError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        let items = if args.len() == 1 {
            self.collect(&args[0])?
        } else {
            if default.is_some() {
                return Err(EvalError::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                )));
            }
            args
        };
        let want = if builtin == Builtin::Max {
            Ordering::Greater
        } else {
            Ordering::Less
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            self.tick()?;
            let k = match &key {
                Some(func) => self.call1(func, item.clone())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => ops::order(&k, best_key)? == want,
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(EvalError::value_error(format!(
                "{name}() arg is an empty sequence"
            ))),
        }
    }

    /// Stable sort; keys are computed once, before any comparison.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> EvalResult<Vec<Value>> {
        let keys = match key.filter(|k| !matches!(k, Value::None)) {
            None => items.clone(),
            Some(func) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call1(&func, item.clone())?);
                }
                keys
            }
        };
        let order = sort_indices(&keys, reverse)?;
        let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int(" 42 ", 10).ok(), Some(42));
        assert_eq!(parse_int("-1_000", 10).ok(), Some(-1000));
        assert_eq!(parse_int("ff", 16).ok(), Some(255));
        assert_eq!(parse_int("0b101", 2).ok(), Some(5));
        assert_eq!(parse_int("4.5", 10).ok(), None);
        assert_eq!(parse_int("", 10).ok(), None);
        assert_eq!(parse_int("1__0", 10).ok(), None);
        assert_eq!(parse_int("12a", 10), Err(IntLiteral::Invalid));
    }

    #[test]
    fn test_parse_int_out_of_range_is_not_invalid() {
        assert_eq!(parse_int("99999999999999999999", 10), Err(IntLiteral::TooLarge));
        assert_eq!(parse_int("-9223372036854775809", 10), Err(IntLiteral::TooLarge));
        assert_eq!(parse_int("9".repeat(60).as_str(), 10), Err(IntLiteral::TooLarge));
        assert_eq!(parse_int("-9223372036854775808", 10), Ok(i64::MIN));
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float("2.5"), Some(2.5));
        assert_eq!(parse_float(" -1e3 "), Some(-1000.0));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("abc"), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_even(0.5), 0.0);
        assert_eq!(round_even(1.5), 2.0);
        assert_eq!(round_even(2.5), 2.0);
        assert_eq!(round_even(-2.5), -2.0);
        assert_eq!(round_digits(2.675, 2), 2.67);
        assert_eq!(round_digits(1234.0, -2), 1200.0);
    }

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(2, 10, 1000).unwrap(), 24);
        assert_eq!(mod_pow(-2, 3, 5).unwrap(), 2);
        assert!(mod_pow(2, 3, 0).is_err());
    }
}
