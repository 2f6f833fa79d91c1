//! Binding call arguments to a function's parameter list.

use crate::error::{EvalError, ExcKind};
use crate::value::{FunctionObj, Table, Value};
use evalbox_types::ast::ParamKind;

#[derive(Debug)]
pub enum BindError {
    /// Arity or keyword mismatch, worded the way learners know it.
    Mismatch(String),
    Eval(EvalError),
}

impl BindError {
    /// Inside a running program a mismatch is an ordinary `TypeError`.
    pub fn into_eval(self) -> EvalError {
        match self {
            Self::Mismatch(message) => EvalError::raise(ExcKind::TypeError, message),
            Self::Eval(e) => e,
        }
    }
}

impl From<EvalError> for BindError {
    fn from(e: EvalError) -> Self {
        Self::Eval(e)
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`
fn name_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

/// Resolve `(name, value)` pairs for every parameter of `func`.
pub fn bind_arguments(
    func: &FunctionObj,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<(String, Value)>, BindError> {
    let params = func.params();
    let name = func.name.as_str();
    let mut bound: Vec<Option<Value>> = vec![None; params.len()];

    let positional: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.kind == ParamKind::Positional)
        .map(|(i, _)| i)
        .collect();
    let given = args.len();
    let mut args = args.into_iter();
    for &slot in &positional {
        match args.next() {
            Some(value) => bound[slot] = Some(value),
            None => break,
        }
    }
    let extra: Vec<Value> = args.collect();

    let var_args = params.iter().position(|p| p.kind == ParamKind::VarArgs);
    match var_args {
        Some(slot) => bound[slot] = Some(Value::tuple(extra)?),
        None if !extra.is_empty() => {
            let required = positional
                .iter()
                .filter(|&&i| func.defaults[i].is_none())
                .count();
            let accepted = if required == positional.len() {
                plural(positional.len(), "positional argument")
            } else {
                format!("from {required} to {} positional arguments", positional.len())
            };
            let verb = if given == 1 { "was" } else { "were" };
            return Err(BindError::Mismatch(format!(
                "{name}() takes {accepted} but {given} {verb} given"
            )));
        }
        None => {}
    }

    let var_keywords = params.iter().position(|p| p.kind == ParamKind::VarKeywords);
    let mut extra_keywords = Table::new();
    for (key, value) in kwargs {
        let slot = params.iter().position(|p| {
            p.name.name == key && matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly)
        });
        match slot {
            Some(slot) if bound[slot].is_some() => {
                return Err(BindError::Mismatch(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            Some(slot) => bound[slot] = Some(value),
            None if var_keywords.is_some() => {
                let key_value = Value::str(key.clone())?;
                extra_keywords.insert(key_value.hash_key()?, key_value, value);
            }
            None => {
                return Err(BindError::Mismatch(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }
    }
    if let Some(slot) = var_keywords {
        bound[slot] = Some(Value::dict(extra_keywords)?);
    }

    let mut missing_positional = Vec::new();
    let mut missing_keyword = Vec::new();
    for (i, param) in params.iter().enumerate() {
        if bound[i].is_some() {
            continue;
        }
        if let Some(default) = &func.defaults[i] {
            bound[i] = Some(default.clone());
            continue;
        }
        match param.kind {
            ParamKind::Positional => missing_positional.push(param.name.name.as_str()),
            ParamKind::KeywordOnly => missing_keyword.push(param.name.name.as_str()),
            ParamKind::VarArgs | ParamKind::VarKeywords => {}
        }
    }
    if !missing_positional.is_empty() {
        return Err(BindError::Mismatch(format!(
            "{name}() missing {}: {}",
            plural(missing_positional.len(), "required positional argument"),
            name_list(&missing_positional)
        )));
    }
    if !missing_keyword.is_empty() {
        return Err(BindError::Mismatch(format!(
            "{name}() missing {}: {}",
            plural(missing_keyword.len(), "required keyword-only argument"),
            name_list(&missing_keyword)
        )));
    }

    Ok(params
        .iter()
        .zip(bound)
        .filter_map(|(p, v)| v.map(|v| (p.name.name.clone(), v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_list_wording() {
        assert_eq!(name_list(&["a"]), "'a'");
        assert_eq!(name_list(&["a", "b"]), "'a' and 'b'");
        assert_eq!(name_list(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "argument"), "1 argument");
        assert_eq!(plural(2, "argument"), "2 arguments");
    }
}
