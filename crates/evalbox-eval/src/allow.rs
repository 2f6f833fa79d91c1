//! The closed set of builtins and the per-engine allow-list over it.

use crate::error::ExcKind;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Every builtin function the evaluator implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Enumerate,
    Int,
    Str,
    Float,
    Bool,
    List,
    Dict,
    Set,
    Tuple,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    IsInstance,
    Abs,
    Zip,
    Any,
    All,
    Round,
    Map,
    Filter,
    DivMod,
    Pow,
    Chr,
    Ord,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Self::Print,
        Self::Len,
        Self::Range,
        Self::Enumerate,
        Self::Int,
        Self::Str,
        Self::Float,
        Self::Bool,
        Self::List,
        Self::Dict,
        Self::Set,
        Self::Tuple,
        Self::Min,
        Self::Max,
        Self::Sum,
        Self::Sorted,
        Self::Reversed,
        Self::IsInstance,
        Self::Abs,
        Self::Zip,
        Self::Any,
        Self::All,
        Self::Round,
        Self::Map,
        Self::Filter,
        Self::DivMod,
        Self::Pow,
        Self::Chr,
        Self::Ord,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Len => "len",
            Self::Range => "range",
            Self::Enumerate => "enumerate",
            Self::Int => "int",
            Self::Str => "str",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Set => "set",
            Self::Tuple => "tuple",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Sorted => "sorted",
            Self::Reversed => "reversed",
            Self::IsInstance => "isinstance",
            Self::Abs => "abs",
            Self::Zip => "zip",
            Self::Any => "any",
            Self::All => "all",
            Self::Round => "round",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::DivMod => "divmod",
            Self::Pow => "pow",
            Self::Chr => "chr",
            Self::Ord => "ord",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Builtins that double as types for `isinstance`.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Str
                | Self::Float
                | Self::Bool
                | Self::List
                | Self::Dict
                | Self::Set
                | Self::Tuple
                | Self::Range
        )
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a builtin the evaluator provides")]
pub struct UnknownBuiltin(pub String);

/// Names a submission may resolve without binding them itself.
///
/// The list is fixed when an engine is built and shared read-only between
/// concurrent evaluations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    builtins: BTreeSet<Builtin>,
    exceptions: BTreeSet<ExcKind>,
}

impl AllowList {
    /// Every builtin and exception class.
    pub fn standard() -> Self {
        Self {
            builtins: Builtin::ALL.iter().copied().collect(),
            exceptions: ExcKind::ALL.iter().copied().collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, UnknownBuiltin>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self {
            builtins: BTreeSet::new(),
            exceptions: BTreeSet::new(),
        };
        for name in names {
            let name = name.as_ref();
            if let Some(builtin) = Builtin::from_name(name) {
                list.builtins.insert(builtin);
            } else if let Some(kind) = ExcKind::from_name(name) {
                list.exceptions.insert(kind);
            } else {
                return Err(UnknownBuiltin(name.to_owned()));
            }
        }
        Ok(list)
    }

    pub fn allows(&self, builtin: Builtin) -> bool {
        self.builtins.contains(&builtin)
    }

    pub fn allows_exception(&self, kind: ExcKind) -> bool {
        self.exceptions.contains(&kind)
    }

    /// `true` if `name` is provided by the evaluator at all, allowed or not.
    pub fn is_known(name: &str) -> bool {
        Builtin::from_name(name).is_some() || ExcKind::from_name(name).is_some()
    }

    /// The value an unbound global `name` resolves to.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(builtin) = Builtin::from_name(name) {
            return self.allows(builtin).then_some(Value::Builtin(builtin));
        }
        let kind = ExcKind::from_name(name)?;
        self.allows_exception(kind).then_some(Value::ExceptionClass(kind))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.builtins
            .iter()
            .map(|b| b.name())
            .chain(self.exceptions.iter().map(|k| k.name()))
            .collect()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_standard_resolves_everything() {
        let allow = AllowList::standard();
        assert_matches!(allow.resolve("len"), Some(Value::Builtin(Builtin::Len)));
        assert_matches!(
            allow.resolve("KeyError"),
            Some(Value::ExceptionClass(ExcKind::KeyError))
        );
        assert!(allow.resolve("open").is_none());
    }

    #[test]
    fn test_restricted_list() {
        let allow = AllowList::from_names(["len", "ValueError"]).unwrap();
        assert!(allow.allows(Builtin::Len));
        assert!(!allow.allows(Builtin::Sorted));
        assert!(allow.resolve("sorted").is_none());
        assert_eq!(allow.names(), vec!["len", "ValueError"]);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert_eq!(
            AllowList::from_names(["len", "eval"]),
            Err(UnknownBuiltin("eval".into()))
        );
    }
}
