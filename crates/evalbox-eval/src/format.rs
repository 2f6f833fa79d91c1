//! Text rendering of values: `repr`, `str`, and f-string format specs.

use crate::error::{EvalError, EvalResult, ExcKind};
use crate::heap;
use crate::value::{Value, MAX_VALUE_DEPTH};
use std::rc::Rc;

/// `repr(value)`
pub fn repr(value: &Value) -> EvalResult<String> {
    let mut r = Renderer::default();
    r.write(value, 0)?;
    Ok(r.out)
}

/// `str(value)`: strings render bare, everything else as its repr.
pub fn display(value: &Value) -> EvalResult<String> {
    match value {
        Value::Str(s) => Ok(s.as_str().to_owned()),
        Value::Exception(exc) => Ok(exc.message.clone()),
        other => repr(other),
    }
}

/// Shortest round-trip float text, switching to exponent form outside
/// `[1e-4, 1e16)`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.into();
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return exponent_form(&format!("{x:e}"));
    }
    let mut text = format!("{x}");
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

/// Rewrite Rust's `1.5e-5` as `1.5e-05`.
fn exponent_form(sci: &str) -> String {
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
}

/// Quote a string the way learners see it echoed back.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[derive(Default)]
struct Renderer {
    out: String,
    /// Containers currently being rendered, for cycle detection.
    open: Vec<usize>,
}

impl Renderer {
    fn write(&mut self, value: &Value, depth: usize) -> EvalResult<()> {
        if depth > MAX_VALUE_DEPTH {
            return Err(EvalError::raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while getting the repr of an object",
            ));
        }
        heap::ensure_available(self.out.len())?;
        heap::visit()?;
        match value {
            Value::None => self.out.push_str("None"),
            Value::Bool(true) => self.out.push_str("True"),
            Value::Bool(false) => self.out.push_str("False"),
            Value::Int(n) => self.out.push_str(&n.to_string()),
            Value::Float(x) => self.out.push_str(&format_float(*x)),
            Value::Str(s) => self.out.push_str(&repr_str(s)),
            Value::List(list) => {
                let id = Rc::as_ptr(list) as *const () as usize;
                if self.open.contains(&id) {
                    self.out.push_str("[...]");
                    return Ok(());
                }
                self.open.push(id);
                let items = list.snapshot();
                self.sequence("[", &items, "]", depth)?;
                self.open.pop();
            }
            Value::Tuple(items) => {
                if items.len() == 1 {
                    self.out.push('(');
                    self.write(&items[0], depth + 1)?;
                    self.out.push_str(",)");
                } else {
                    self.sequence("(", items, ")", depth)?;
                }
            }
            Value::Set(set) => {
                let keys: Vec<Value> = set.borrow().keys().cloned().collect();
                if keys.is_empty() {
                    self.out.push_str("set()");
                } else {
                    self.sequence("{", &keys, "}", depth)?;
                }
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const () as usize;
                if self.open.contains(&id) {
                    self.out.push_str("{...}");
                    return Ok(());
                }
                self.open.push(id);
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.out.push('{');
                for (i, (key, val)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write(key, depth + 1)?;
                    self.out.push_str(": ");
                    self.write(val, depth + 1)?;
                }
                self.out.push('}');
                self.open.pop();
            }
            Value::Range(r) => {
                if r.step == 1 {
                    self.out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    self.out
                        .push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(f) => self.out.push_str(&format!("<function {}>", f.name)),
            Value::Builtin(b) => self.out.push_str(&format!("<built-in function {b}>")),
            Value::Method(m) => self.out.push_str(&format!(
                "<bound method {}.{}>",
                m.receiver.type_name(),
                m.name
            )),
            Value::ExceptionClass(kind) => self.out.push_str(&format!("<class '{kind}'>")),
            Value::Exception(exc) => {
                self.out.push_str(&format!("{}({})", exc.kind, repr_str(&exc.message)));
            }
        }
        Ok(())
    }

    fn sequence(&mut self, open: &str, items: &[Value], close: &str, depth: usize) -> EvalResult<()> {
        self.out.push_str(open);
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write(item, depth + 1)?;
        }
        self.out.push_str(close);
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Format Specs
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> EvalResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        parsed.width = digits(&chars[start..i])?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            parsed.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(EvalError::value_error("Format specifier missing precision"));
        }
        parsed.precision = Some(digits(&chars[start..i])?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(EvalError::value_error(format!(
            "Invalid format specifier '{spec}'"
        )));
    }
    Ok(parsed)
}

fn digits(chars: &[char]) -> EvalResult<usize> {
    let text: String = chars.iter().collect();
    match text.parse::<usize>() {
        Ok(n) if n <= 10_000 => Ok(n),
        _ => Err(EvalError::value_error("Too many decimal digits in format string")),
    }
}

/// `format(value, spec)` for the subset learners use in f-strings.
pub fn apply_spec(value: &Value, spec: &str) -> EvalResult<String> {
    if spec.is_empty() {
        return display(value);
    }
    let spec = parse_spec(spec)?;
    let (body, numeric) = match (spec.kind, value) {
        (None | Some('s'), Value::Str(s)) => {
            let text: String = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.as_str().to_owned(),
            };
            (text, false)
        }
        (Some('s'), _) => {
            return Err(type_mismatch('s', value));
        }
        (None, Value::Int(_) | Value::Bool(_)) if spec.precision.is_none() => {
            let n = value.as_int().unwrap_or(0);
            (signed(n < 0, group(&n.unsigned_abs().to_string(), spec.grouping), &spec), true)
        }
        (Some('d' | 'n'), v) => {
            let n = v.as_int().ok_or_else(|| type_mismatch('d', v))?;
            (signed(n < 0, group(&n.unsigned_abs().to_string(), spec.grouping), &spec), true)
        }
        (Some(kind @ ('x' | 'X' | 'o' | 'b')), v) => {
            let n = v.as_int().ok_or_else(|| type_mismatch(kind, v))?;
            let abs = n.unsigned_abs();
            let digits = match kind {
                'x' => format!("{abs:x}"),
                'X' => format!("{abs:X}"),
                'o' => format!("{abs:o}"),
                _ => format!("{abs:b}"),
            };
            (signed(n < 0, digits, &spec), true)
        }
        (Some(kind @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')), v) => {
            let x = v.as_f64().ok_or_else(|| type_mismatch(kind, v))?;
            (float_body(x, kind, &spec), true)
        }
        (None, Value::Float(x)) => {
            let text = match spec.precision {
                Some(_) => float_body(*x, 'g', &spec),
                None => signed(
                    x.is_sign_negative() && !x.is_nan(),
                    group_float(&format_float(x.abs()), spec.grouping),
                    &spec,
                ),
            };
            (text, true)
        }
        (None, other) => (display(other)?, false),
        (Some(kind), v) => return Err(type_mismatch(kind, v)),
    };
    Ok(pad(body, &spec, numeric))
}

fn type_mismatch(kind: char, value: &Value) -> EvalError {
    EvalError::value_error(format!(
        "Unknown format code '{kind}' for object of type '{}'",
        value.type_name()
    ))
}

fn float_body(x: f64, kind: char, spec: &Spec) -> String {
    let negative = x.is_sign_negative() && !x.is_nan();
    let abs = x.abs();
    if !abs.is_finite() {
        let text = if abs.is_nan() { "nan" } else { "inf" };
        let text = if kind.is_ascii_uppercase() {
            text.to_uppercase()
        } else {
            text.to_owned()
        };
        return signed(negative, text, spec);
    }
    let precision = spec.precision.unwrap_or(6);
    let digits = match kind {
        'f' | 'F' => group_float(&format!("{abs:.precision$}"), spec.grouping),
        'e' | 'E' => {
            let text = exponent_form(&format!("{abs:.precision$e}"));
            if kind == 'E' {
                text.to_uppercase()
            } else {
                text
            }
        }
        '%' => format!("{:.precision$}%", abs * 100.0),
        _ => general(abs, precision, kind == 'G'),
    };
    signed(negative, digits, spec)
}

/// `g` presentation: fixed or exponent, whichever is shorter for the
/// precision, with trailing zeros removed.
fn general(abs: f64, precision: usize, upper: bool) -> String {
    let p = precision.max(1);
    if abs == 0.0 {
        return "0".into();
    }
    let sci = format!("{abs:.prec$e}", prec = p - 1);
    let exp: i64 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let text = if exp >= -4 && exp < p as i64 {
        let decimals = usize::try_from(p as i64 - 1 - exp).unwrap_or(0);
        trim_fraction(format!("{abs:.decimals$}"))
    } else {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        let mantissa = trim_fraction(mantissa.to_owned());
        exponent_form(&format!("{mantissa}e{exp}"))
    };
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

fn trim_fraction(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.').to_owned()
}

fn signed(negative: bool, digits: String, spec: &Spec) -> String {
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    format!("{sign}{digits}")
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_owned();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn group_float(text: &str, sep: Option<char>) -> String {
    match text.split_once('.') {
        Some((int, frac)) => format!("{}.{frac}", group(int, sep)),
        None => group(text, sep),
    }
}

fn pad(body: String, spec: &Spec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let missing = spec.width - len;
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (None, None, true) if numeric => ('0', '='),
        (fill, align, _) => (
            fill.unwrap_or(' '),
            align.unwrap_or(if numeric { '>' } else { '<' }),
        ),
    };
    let run = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match align {
        '<' => format!("{body}{}", run(missing)),
        '^' => format!("{}{body}{}", run(missing / 2), run(missing - missing / 2)),
        '=' => {
            let split = body
                .char_indices()
                .find(|(_, c)| !matches!(c, '+' | '-' | ' '))
                .map_or(body.len(), |(i, _)| i);
            let (sign, digits) = body.split_at(split);
            format!("{sign}{}{digits}", run(missing))
        }
        _ => format!("{}{body}", run(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        apply_spec(&value, spec).unwrap()
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(123456.5), "123456.5");
    }

    #[test]
    fn test_repr_of_shared_children_stops_at_the_ceiling() {
        let _session = crate::heap::HeapSession::begin(64 * 1024);
        let mut value = Value::list(vec![]).unwrap();
        for _ in 0..30 {
            value = Value::list(vec![value.clone(), value]).unwrap();
        }
        assert!(matches!(repr(&value), Err(EvalError::MemoryExceeded { .. })));
    }

    #[test]
    fn test_string_repr_quoting() {
        assert_eq!(repr_str("hi"), "'hi'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a\nb"), "'a\\nb'");
        assert_eq!(repr_str("'\""), "'\\'\"'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::list(vec![
            Value::Int(1),
            Value::str("a").unwrap(),
            Value::tuple(vec![Value::Bool(true)]).unwrap(),
        ])
        .unwrap();
        assert_eq!(repr(&list).unwrap(), "[1, 'a', (True,)]");
        assert_eq!(
            repr(&Value::set(crate::value::Table::new()).unwrap()).unwrap(),
            "set()"
        );
    }

    #[test]
    fn test_self_referential_list() {
        let list = Value::list(vec![Value::Int(1)]).unwrap();
        if let Value::List(obj) = &list {
            obj.push(list.clone()).unwrap();
        }
        assert_eq!(repr(&list).unwrap(), "[1, [...]]");
        if let Value::List(obj) = &list {
            obj.borrow_mut().clear();
        }
    }

    #[test]
    fn test_number_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(42), "5d"), "   42");
        assert_eq!(fmt(Value::Int(42), "<5"), "42   ");
        assert_eq!(fmt(Value::Int(7), "03"), "007");
        assert_eq!(fmt(Value::Int(-7), "04"), "-007");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
        assert_eq!(fmt(Value::Float(12345.678), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(3.14159), ".3"), "3.14");
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Int(5), "+"), "+5");
    }

    #[test]
    fn test_string_specs() {
        assert_eq!(fmt(Value::str("ab").unwrap(), "^6"), "  ab  ");
        assert_eq!(fmt(Value::str("ab").unwrap(), "*>4"), "**ab");
        assert_eq!(fmt(Value::str("abcdef").unwrap(), ".3"), "abc");
    }

    #[test]
    fn test_bad_specs() {
        assert!(apply_spec(&Value::str("x").unwrap(), "d").is_err());
        assert!(apply_spec(&Value::Int(1), "5.").is_err());
        assert!(apply_spec(&Value::Int(1), "zz").is_err());
    }
}
