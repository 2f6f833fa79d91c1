//! Operators: arithmetic, bitwise, sequence, set, comparison and membership.
//!
//! Integers are 64-bit and checked; leaving that range raises
//! `OverflowError` rather than wrapping.

use crate::error::{EvalError, EvalResult, ExcKind};
use crate::heap;
use crate::value::{Table, Value, MAX_VALUE_DEPTH};
use evalbox_types::ast::{BinOp, CmpOp, UnaryOp};
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::I(*n)),
        Value::Bool(b) => Some(Num::I(i64::from(*b))),
        Value::Float(x) => Some(Num::F(*x)),
        _ => None,
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn zero_division(message: &str) -> EvalError {
    EvalError::raise(ExcKind::ZeroDivisionError, message)
}

// ══════════════════════════════════════════════════════════════════════════════
// Binary Operators
// ══════════════════════════════════════════════════════════════════════════════

pub fn binary(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            heap::ensure_available(a.len().saturating_add(b.len()))?;
            let mut text = String::with_capacity(a.len() + b.len());
            text.push_str(a);
            text.push_str(b);
            Value::str(text)
        }
        (BinOp::Add, Value::Str(_), other) => Err(EvalError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.snapshot();
            items.extend(b.snapshot());
            Value::list(items)
        }
        (BinOp::Add, Value::List(_), other) => Err(EvalError::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Value::tuple(a.iter().chain(b.iter()).cloned().collect())
        }
        (BinOp::Mul, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_)), count)
        | (BinOp::Mul, count, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_)))
            if count.as_int().is_some() =>
        {
            repeat(seq, count.as_int().unwrap_or(0))
        }
        (BinOp::Sub, Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            set_from(a.iter().filter(|(k, _)| !contains_key(&b, k)))
        }
        (BinOp::BitAnd, Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            set_from(a.iter().filter(|(k, _)| contains_key(&b, k)))
        }
        (BinOp::BitOr, Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            set_from(a.iter().chain(b.iter()))
        }
        (BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            set_from(
                a.iter()
                    .filter(|(k, _)| !contains_key(&b, k))
                    .chain(b.iter().filter(|(k, _)| !contains_key(&a, k))),
            )
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut table = a.borrow().duplicate();
            for (key, value) in b.borrow().iter() {
                table.insert(key.hash_key()?, key.clone(), value.clone());
            }
            Value::dict(table)
        }
        (
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor,
            Value::Bool(a),
            Value::Bool(b),
        ) => Ok(Value::Bool(match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            _ => a ^ b,
        })),
        _ => match (num(left), num(right)) {
            (Some(Num::I(a)), Some(Num::I(b))) => int_op(op, a, b),
            (Some(a), Some(b)) => {
                let widen = |n: Num| match n {
                    Num::I(i) => i as f64,
                    Num::F(x) => x,
                };
                float_op(op, widen(a), widen(b)).map_err(|e| match e {
                    FloatFault::Unsupported => unsupported(op, left, right),
                    FloatFault::Raised(e) => e,
                })
            }
            _ => Err(unsupported(op, left, right)),
        },
    }
}

fn contains_key(table: &Table, key: &Value) -> bool {
    key.hash_key().is_ok_and(|h| table.contains(&h))
}

fn set_from<'a>(entries: impl Iterator<Item = (&'a Value, &'a Value)>) -> EvalResult<Value> {
    let mut table = Table::new();
    for (key, _) in entries {
        table.insert(key.hash_key()?, key.clone(), Value::None);
    }
    Value::set(table)
}

fn repeat(seq: &Value, count: i64) -> EvalResult<Value> {
    let count = usize::try_from(count).unwrap_or(0);
    match seq {
        Value::Str(s) => {
            heap::ensure_available(s.len().checked_mul(count).unwrap_or(usize::MAX))?;
            Value::str(s.repeat(count))
        }
        Value::List(_) | Value::Tuple(_) => {
            let items = match seq {
                Value::List(l) => l.snapshot(),
                Value::Tuple(t) => t.to_vec(),
                _ => Vec::new(),
            };
            let total = items.len().checked_mul(count).unwrap_or(usize::MAX);
            heap::ensure_available(total.saturating_mul(crate::value::SLOT))?;
            let mut out = Vec::with_capacity(total);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            match seq {
                Value::List(_) => Value::list(out),
                _ => Value::tuple(out),
            }
        }
        other => Err(EvalError::type_error(format!(
            "can't multiply sequence by non-int of type '{}'",
            other.type_name()
        ))),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> EvalResult<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(EvalError::overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            checked(floor_div(a, b))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            checked(floor_mod(a, b))
        }
        BinOp::Pow => {
            if b >= 0 {
                let exp = u32::try_from(b).map_err(|_| EvalError::overflow())?;
                checked(a.checked_pow(exp))
            } else if a == 0 {
                Err(zero_division("0.0 cannot be raised to a negative power"))
            } else {
                Ok(Value::Float((a as f64).powf(b as f64)))
            }
        }
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
        BinOp::LShift => {
            if b < 0 {
                return Err(EvalError::value_error("negative shift count"));
            }
            if a == 0 {
                return Ok(Value::Int(0));
            }
            if b >= 63 {
                return Err(EvalError::overflow());
            }
            let shifted = a << b;
            if shifted >> b != a {
                return Err(EvalError::overflow());
            }
            Ok(Value::Int(shifted))
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(EvalError::value_error("negative shift count"));
            }
            Ok(Value::Int(if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }))
        }
    }
}

pub(crate) fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

pub(crate) fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

enum FloatFault {
    Unsupported,
    Raised(EvalError),
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<Value, FloatFault> {
    let fault = |message: &str| FloatFault::Raised(zero_division(message));
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(fault("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(fault("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(fault("float modulo"));
            }
            float_mod(x, y)
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(fault("0.0 cannot be raised to a negative power"));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(FloatFault::Raised(EvalError::value_error("math domain error")));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(FloatFault::Raised(EvalError::raise(
                    ExcKind::OverflowError,
                    "numerical result out of range",
                )));
            }
            r
        }
        _ => return Err(FloatFault::Unsupported),
    };
    Ok(Value::Float(value))
}

pub(crate) fn float_mod(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
        r + y
    } else {
        r
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    let bad = || {
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not",
        };
        EvalError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            operand.type_name()
        ))
    };
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Value::Float(x)) => Ok(Value::Float(*x)),
        (UnaryOp::Neg, v) => {
            let n = v.as_int().ok_or_else(bad)?;
            n.checked_neg().map(Value::Int).ok_or_else(EvalError::overflow)
        }
        (UnaryOp::Pos, v) => v.as_int().map(Value::Int).ok_or_else(bad),
        (UnaryOp::Invert, v) => v.as_int().map(|n| Value::Int(!n)).ok_or_else(bad),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Comparison
// ══════════════════════════════════════════════════════════════════════════════

fn too_deep() -> EvalError {
    EvalError::raise(
        ExcKind::RecursionError,
        "maximum recursion depth exceeded in comparison",
    )
}

fn int_float_eq(i: i64, f: f64) -> bool {
    f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 && f as i64 == i
}

/// Value equality: `1 == 1.0 == True`, containers compared element-wise.
pub fn equals(a: &Value, b: &Value) -> EvalResult<bool> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> EvalResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep());
    }
    heap::visit()?;
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x.as_str() == y.as_str(),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.snapshot(), &y.snapshot(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y) || seq_eq(x, y, depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let entries: Vec<(Value, Value)> = x
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if entries.len() != y.len() {
                return Ok(false);
            }
            for (key, value) in entries {
                let other = y.borrow().get(&key.hash_key()?).cloned();
                match other {
                    Some(other) if eq_at(&value, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.key_hashes().all(|h| y.contains(h))
        }
        (Value::Range(x), Value::Range(y)) => {
            let len = x.len();
            len == y.len() && (len == 0 || (x.start == y.start && (len == 1 || x.step == y.step)))
        }
        _ => match (num(a), num(b)) {
            (Some(Num::I(x)), Some(Num::I(y))) => x == y,
            (Some(Num::F(x)), Some(Num::F(y))) => x == y,
            (Some(Num::I(x)), Some(Num::F(y))) | (Some(Num::F(y)), Some(Num::I(x))) => {
                int_float_eq(x, y)
            }
            _ => a.is(b),
        },
    })
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> EvalResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !eq_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `a < b`, with `symbol` naming the operator in the error message.
fn less_than(a: &Value, b: &Value, symbol: &str, depth: usize) -> EvalResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep());
    }
    heap::visit()?;
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => return Ok(x.as_str() < y.as_str()),
        (Value::List(x), Value::List(y)) => {
            return seq_lt(&x.snapshot(), &y.snapshot(), symbol, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => return seq_lt(x, y, symbol, depth),
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            return Ok(x.len() < y.len() && x.key_hashes().all(|h| y.contains(h)));
        }
        _ => {}
    }
    match (num(a), num(b)) {
        (Some(Num::I(x)), Some(Num::I(y))) => Ok(x < y),
        (Some(x), Some(y)) => {
            let widen = |n: Num| match n {
                Num::I(i) => i as f64,
                Num::F(f) => f,
            };
            Ok(widen(x) < widen(y))
        }
        _ => Err(EvalError::type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_lt(a: &[Value], b: &[Value], symbol: &str, depth: usize) -> EvalResult<bool> {
    for (x, y) in a.iter().zip(b) {
        if !eq_at(x, y, depth + 1)? {
            return less_than(x, y, symbol, depth + 1);
        }
    }
    Ok(a.len() < b.len())
}

/// Total order used by `sorted`, `min` and `max`.
pub fn order(a: &Value, b: &Value) -> EvalResult<Ordering> {
    if less_than(a, b, "<", 0)? {
        Ok(Ordering::Less)
    } else if less_than(b, a, "<", 0)? {
        Ok(Ordering::Greater)
    } else {
        Ok(Ordering::Equal)
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> EvalResult<bool> {
    match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::NotEq => equals(a, b).map(|eq| !eq),
        CmpOp::Lt => less_than(a, b, "<", 0),
        CmpOp::Gt => less_than(b, a, ">", 0),
        CmpOp::LtE => Ok(less_than(a, b, "<=", 0)? || equals(a, b)?),
        CmpOp::GtE => Ok(less_than(b, a, ">=", 0)? || equals(a, b)?),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(a.is(b)),
        CmpOp::IsNot => Ok(!a.is(b)),
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> EvalResult<bool> {
    match container {
        Value::List(list) => {
            for element in list.snapshot() {
                if equals(&element, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Tuple(items) => {
            for element in items.iter() {
                if equals(element, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(EvalError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(table) | Value::Set(table) => Ok(table.borrow().contains(&item.hash_key()?)),
        Value::Range(range) => Ok(match item {
            Value::Float(x) if x.fract() == 0.0 => range.contains(*x as i64),
            other => other.as_int().is_some_and(|n| range.contains(n)),
        }),
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn s(text: &str) -> Value {
        Value::str(text).unwrap()
    }

    fn raised_kind(result: EvalResult<Value>) -> ExcKind {
        match result {
            Err(EvalError::Raised(exc)) => exc.kind,
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn test_floor_semantics() {
        assert_matches!(binary(BinOp::FloorDiv, &int(-7), &int(2)), Ok(Value::Int(-4)));
        assert_matches!(binary(BinOp::Mod, &int(-7), &int(2)), Ok(Value::Int(1)));
        assert_matches!(binary(BinOp::Mod, &int(7), &int(-2)), Ok(Value::Int(-1)));
        assert_matches!(binary(BinOp::Div, &int(7), &int(2)), Ok(Value::Float(x)) if x == 3.5);
    }

    #[test]
    fn test_integer_overflow_raises() {
        assert_eq!(
            raised_kind(binary(BinOp::Mul, &int(i64::MAX), &int(2))),
            ExcKind::OverflowError
        );
        assert_eq!(
            raised_kind(binary(BinOp::Pow, &int(10), &int(30))),
            ExcKind::OverflowError
        );
        assert_matches!(binary(BinOp::Pow, &int(2), &int(10)), Ok(Value::Int(1024)));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            raised_kind(binary(BinOp::Div, &int(1), &int(0))),
            ExcKind::ZeroDivisionError
        );
        assert_eq!(
            raised_kind(binary(BinOp::Mod, &Value::Float(1.0), &int(0))),
            ExcKind::ZeroDivisionError
        );
    }

    #[test]
    fn test_sequence_ops() {
        let joined = binary(BinOp::Add, &s("ab"), &s("cd")).unwrap();
        assert_eq!(joined.as_str(), Some("abcd"));
        let repeated = binary(BinOp::Mul, &int(3), &s("x")).unwrap();
        assert_eq!(repeated.as_str(), Some("xxx"));
        assert_eq!(raised_kind(binary(BinOp::Add, &s("a"), &int(1))), ExcKind::TypeError);
        let list = binary(
            BinOp::Add,
            &Value::list(vec![int(1)]).unwrap(),
            &Value::list(vec![int(2)]).unwrap(),
        )
        .unwrap();
        assert!(equals(&list, &Value::list(vec![int(1), int(2)]).unwrap()).unwrap());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(equals(&int(1), &Value::Float(1.0)).unwrap());
        assert!(equals(&Value::Bool(true), &int(1)).unwrap());
        assert!(!equals(&Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
        assert!(!equals(&s("1"), &int(1)).unwrap());
    }

    #[test]
    fn test_list_and_tuple_are_distinct_under_equality() {
        let list = Value::list(vec![int(1)]).unwrap();
        let tuple = Value::tuple(vec![int(1)]).unwrap();
        assert!(!equals(&list, &tuple).unwrap());
    }

    #[test]
    fn test_ordering() {
        assert!(compare(CmpOp::Lt, &int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::GtE, &s("b"), &s("a")).unwrap());
        let a = Value::tuple(vec![int(1), int(2)]).unwrap();
        let b = Value::tuple(vec![int(1), int(3)]).unwrap();
        assert!(compare(CmpOp::Lt, &a, &b).unwrap());
        assert!(compare(CmpOp::Lt, &int(1), &s("a")).is_err());
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![int(1), s("x")]).unwrap();
        assert!(contains(&list, &s("x")).unwrap());
        assert!(contains(&s("hello"), &s("ell")).unwrap());
        assert!(contains(&s("hello"), &int(1)).is_err());
        let range = Value::Range(crate::value::RangeObj::new(0, 10, 2).unwrap());
        assert!(contains(&range, &int(4)).unwrap());
        assert!(!contains(&range, &int(5)).unwrap());
    }
}
