//! Runtime values.
//!
//! Scalars are stored inline; strings and containers are reference counted
//! and metered through [`crate::heap`]. Mutable containers use `RefCell`
//! because learner code aliases them freely (`b = a; b.append(1)`).

use crate::allow::Builtin;
use crate::env::{Frame, Scope};
use crate::error::{EvalError, EvalResult, ExcKind, Exception};
use crate::heap::{self, Reclaim, OBJECT_OVERHEAD};
use evalbox_types::ast::{FunctionDef, Lambda, Param};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Bytes charged per element slot of a list, tuple, dict or set.
pub(crate) const SLOT: usize = std::mem::size_of::<Value>();

/// Deepest value nesting walked by comparison, hashing and rendering.
pub(crate) const MAX_VALUE_DEPTH: usize = 256;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<StrObj>),
    List(Rc<ListObj>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<TableObj>),
    Set(Rc<TableObj>),
    Range(RangeObj),
    Function(Rc<FunctionObj>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    ExceptionClass(ExcKind),
    Exception(Rc<Exception>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match crate::format::repr(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Constructors and Queries
// ══════════════════════════════════════════════════════════════════════════════

impl Value {
    pub fn str(text: impl Into<String>) -> EvalResult<Value> {
        Ok(Value::Str(Rc::new(StrObj::new(text.into())?)))
    }

    pub fn list(items: Vec<Value>) -> EvalResult<Value> {
        Ok(Value::List(ListObj::new(items)?))
    }

    pub fn tuple(items: Vec<Value>) -> EvalResult<Value> {
        Ok(Value::Tuple(Rc::new(TupleObj::new(items)?)))
    }

    pub fn dict(table: Table) -> EvalResult<Value> {
        Ok(Value::Dict(TableObj::new(table)?))
    }

    pub fn set(table: Table) -> EvalResult<Value> {
        Ok(Value::Set(TableObj::new(table)?))
    }

    pub fn exception(kind: ExcKind, message: impl Into<String>) -> Value {
        Value::Exception(Rc::new(Exception::new(kind, message)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::ExceptionClass(_) => "type",
            Value::Exception(exc) => exc.kind.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => l.len() > 0,
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) | Value::Set(d) => d.len() > 0,
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    /// Integer view of `int` and `bool`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric view of `int`, `bool` and `float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Identity for reference types, value identity for scalars.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a.as_str() == b.as_str(),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Dictionary and set key for this value.
    ///
    /// The key is a deep copy, so building it is charged like an allocation
    /// of its size.
    pub fn hash_key(&self) -> EvalResult<HashKey> {
        let mut built = 0;
        self.hash_key_at(0, &mut built)
    }

    fn hash_key_at(&self, depth: usize, built: &mut usize) -> EvalResult<HashKey> {
        if depth > MAX_VALUE_DEPTH {
            return Err(EvalError::raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while hashing",
            ));
        }
        *built = built.saturating_add(OBJECT_OVERHEAD);
        if let Value::Str(s) = self {
            *built = built.saturating_add(s.len());
        }
        heap::ensure_available(*built)?;
        heap::visit()?;
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(n) => HashKey::Int(*n),
            Value::Float(x) => float_key(*x),
            Value::Str(s) => HashKey::Str(s.as_str().to_owned()),
            Value::Tuple(t) => HashKey::Tuple(
                t.iter()
                    .map(|item| item.hash_key_at(depth + 1, built))
                    .collect::<EvalResult<_>>()?,
            ),
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as *const () as usize),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::ExceptionClass(k) => HashKey::Class(*k),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as *const () as usize),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Method(_) => {
                return Err(EvalError::type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
        })
    }

    /// Move out the contents of a uniquely owned container so that its drop
    /// does not recurse.
    fn release_children(self, pending: &mut Vec<Value>) {
        match self {
            Value::List(rc) => {
                if let Ok(list) = Rc::try_unwrap(rc) {
                    pending.append(&mut list.items.borrow_mut());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    pending.append(&mut tuple.items);
                }
            }
            Value::Dict(rc) | Value::Set(rc) => {
                if let Ok(table) = Rc::try_unwrap(rc) {
                    table.table.borrow_mut().drain_into(pending);
                }
            }
            Value::Function(rc) => {
                if let Ok(mut func) = Rc::try_unwrap(rc) {
                    pending.extend(func.defaults.drain(..).flatten());
                    if Rc::strong_count(&func.closure) == 1 {
                        pending.extend(func.closure.take_vars());
                    }
                }
            }
            Value::Method(rc) => {
                if let Ok(method) = Rc::try_unwrap(rc) {
                    pending.push(method.receiver);
                }
            }
            _ => {}
        }
    }
}

/// Drop a batch of values without recursing through nested containers.
pub(crate) fn drain(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        value.release_children(&mut pending);
    }
}

fn float_key(x: f64) -> HashKey {
    if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        HashKey::Int(x as i64)
    } else {
        HashKey::Float(x.to_bits())
    }
}

fn container_bytes(len: usize) -> usize {
    OBJECT_OVERHEAD.saturating_add(len.saturating_mul(SLOT))
}

// ══════════════════════════════════════════════════════════════════════════════
// Strings
// ══════════════════════════════════════════════════════════════════════════════

pub struct StrObj {
    text: String,
    charged: usize,
}

impl StrObj {
    fn new(text: String) -> EvalResult<Self> {
        let charged = OBJECT_OVERHEAD.saturating_add(text.len());
        heap::charge(charged)?;
        Ok(Self { text, charged })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for StrObj {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl Drop for StrObj {
    fn drop(&mut self) {
        heap::release(self.charged);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Lists and Tuples
// ══════════════════════════════════════════════════════════════════════════════

pub struct ListObj {
    items: RefCell<Vec<Value>>,
    charged: Cell<usize>,
}

impl ListObj {
    pub fn new(items: Vec<Value>) -> EvalResult<Rc<Self>> {
        let charged = container_bytes(items.len());
        if let Err(e) = heap::charge(charged) {
            drain(items);
            return Err(e);
        }
        let list = Rc::new(Self {
            items: RefCell::new(items),
            charged: Cell::new(charged),
        });
        let weak: Weak<dyn Reclaim> = Rc::downgrade(&list) as Weak<dyn Reclaim>;
        heap::track(weak);
        Ok(list)
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    /// Callers that grow the list must [`ListObj::reserve`] first and
    /// that shrink it should [`ListObj::sync`] afterwards.
    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.items.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Charge for `additional` slots ahead of growth.
    pub fn reserve(&self, additional: usize) -> EvalResult<()> {
        let bytes = additional.saturating_mul(SLOT);
        heap::charge(bytes)?;
        self.charged.set(self.charged.get().saturating_add(bytes));
        Ok(())
    }

    pub fn push(&self, value: Value) -> EvalResult<()> {
        self.reserve(1)?;
        self.items.borrow_mut().push(value);
        Ok(())
    }

    pub fn extend(&self, values: Vec<Value>) -> EvalResult<()> {
        self.reserve(values.len())?;
        self.items.borrow_mut().extend(values);
        Ok(())
    }

    /// Bring the charge back in line with the current length.
    pub fn sync(&self) -> EvalResult<()> {
        let wanted = container_bytes(self.len());
        let held = self.charged.get();
        if wanted > held {
            heap::charge(wanted - held)?;
        } else {
            heap::release(held - wanted);
        }
        self.charged.set(wanted);
        Ok(())
    }
}

impl Reclaim for ListObj {
    fn reclaim(&self) {
        if let Ok(mut items) = self.items.try_borrow_mut() {
            drain(std::mem::take(&mut *items));
        }
    }
}

impl Drop for ListObj {
    fn drop(&mut self) {
        heap::release(self.charged.get());
        drain(std::mem::take(self.items.get_mut()));
    }
}

pub struct TupleObj {
    items: Vec<Value>,
    charged: usize,
}

impl TupleObj {
    fn new(items: Vec<Value>) -> EvalResult<Self> {
        let charged = container_bytes(items.len());
        if let Err(e) = heap::charge(charged) {
            drain(items);
            return Err(e);
        }
        Ok(Self { items, charged })
    }
}

impl Deref for TupleObj {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.items
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        heap::release(self.charged);
        drain(std::mem::take(&mut self.items));
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Dicts and Sets
// ══════════════════════════════════════════════════════════════════════════════

/// Normalised key: `True`, `1` and `1.0` all collide, as learners expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Builtin(Builtin),
    Class(ExcKind),
    Identity(usize),
}

struct Slot {
    hash: HashKey,
    key: Value,
    value: Value,
}

/// Insertion-ordered hash table shared by dicts and sets.
///
/// Sets store `None` as every value. Removal leaves a tombstone that is
/// compacted away once tombstones outnumber live entries.
#[derive(Default)]
pub struct Table {
    slots: Vec<Option<Slot>>,
    index: HashMap<HashKey, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, hash: &HashKey) -> Option<&Value> {
        let slot = self.index.get(hash)?;
        self.slots[*slot].as_ref().map(|s| &s.value)
    }

    pub fn contains(&self, hash: &HashKey) -> bool {
        self.index.contains_key(hash)
    }

    /// Insert or overwrite; the original key object is kept on overwrite.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) -> Option<Value> {
        if let Some(&pos) = self.index.get(&hash) {
            if let Some(slot) = self.slots[pos].as_mut() {
                return Some(std::mem::replace(&mut slot.value, value));
            }
        }
        self.index.insert(hash.clone(), self.slots.len());
        self.slots.push(Some(Slot { hash, key, value }));
        None
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, Value)> {
        let pos = self.index.remove(hash)?;
        let slot = self.slots[pos].take()?;
        self.compact();
        Some((slot.key, slot.value))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        while let Some(slot) = self.slots.pop() {
            if let Some(slot) = slot {
                self.index.remove(&slot.hash);
                return Some((slot.key, slot.value));
            }
        }
        None
    }

    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let hash = self.slots.iter().flatten().next()?.hash.clone();
        self.remove(&hash)
    }

    pub fn clear(&mut self) {
        let mut pending = Vec::new();
        self.drain_into(&mut pending);
        drain(pending);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots.iter().flatten().map(|s| (&s.key, &s.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter().flatten().map(|s| &s.key)
    }

    pub fn key_hashes(&self) -> impl Iterator<Item = &HashKey> {
        self.slots.iter().flatten().map(|s| &s.hash)
    }

    /// Copy of the entries, cheap because values are reference counted.
    pub fn duplicate(&self) -> Table {
        Table {
            slots: self
                .slots
                .iter()
                .flatten()
                .map(|s| {
                    Some(Slot {
                        hash: s.hash.clone(),
                        key: s.key.clone(),
                        value: s.value.clone(),
                    })
                })
                .collect(),
            index: self
                .slots
                .iter()
                .flatten()
                .enumerate()
                .map(|(i, s)| (s.hash.clone(), i))
                .collect(),
        }
    }

    fn drain_into(&mut self, pending: &mut Vec<Value>) {
        self.index.clear();
        for slot in self.slots.drain(..).flatten() {
            pending.push(slot.key);
            pending.push(slot.value);
        }
    }

    fn compact(&mut self) {
        if self.slots.len() < 16 || self.slots.len() < self.index.len() * 2 {
            return;
        }
        self.slots.retain(Option::is_some);
        for (pos, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                self.index.insert(slot.hash.clone(), pos);
            }
        }
    }
}

pub struct TableObj {
    table: RefCell<Table>,
    charged: Cell<usize>,
}

impl TableObj {
    pub(crate) fn new(table: Table) -> EvalResult<Rc<Self>> {
        let charged = container_bytes(table.len().saturating_mul(3));
        if let Err(e) = heap::charge(charged) {
            let mut table = table;
            table.clear();
            return Err(e);
        }
        let obj = Rc::new(Self {
            table: RefCell::new(table),
            charged: Cell::new(charged),
        });
        let weak: Weak<dyn Reclaim> = Rc::downgrade(&obj) as Weak<dyn Reclaim>;
        heap::track(weak);
        Ok(obj)
    }

    pub fn borrow(&self) -> Ref<'_, Table> {
        self.table.borrow()
    }

    /// Callers must [`TableObj::sync`] after changing the entry count.
    pub fn borrow_mut(&self) -> RefMut<'_, Table> {
        self.table.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Charge before inserting `additional` entries.
    pub fn reserve(&self, additional: usize) -> EvalResult<()> {
        let bytes = additional.saturating_mul(3 * SLOT);
        heap::charge(bytes)?;
        self.charged.set(self.charged.get().saturating_add(bytes));
        Ok(())
    }

    pub fn sync(&self) -> EvalResult<()> {
        let wanted = container_bytes(self.len().saturating_mul(3));
        let held = self.charged.get();
        if wanted > held {
            heap::charge(wanted - held)?;
        } else {
            heap::release(held - wanted);
        }
        self.charged.set(wanted);
        Ok(())
    }
}

impl Reclaim for TableObj {
    fn reclaim(&self) {
        if let Ok(mut table) = self.table.try_borrow_mut() {
            table.clear();
        }
    }
}

impl Drop for TableObj {
    fn drop(&mut self) {
        heap::release(self.charged.get());
        self.table.get_mut().clear();
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Ranges
// ══════════════════════════════════════════════════════════════════════════════

/// Lazy `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    pub fn new(start: i64, stop: i64, step: i64) -> EvalResult<Self> {
        if step == 0 {
            return Err(EvalError::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = i128::from(self.start) + i128::from(self.step) * index as i128;
        i64::try_from(value).ok()
    }

    pub fn contains(&self, n: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= n && n < self.stop
        } else {
            self.stop < n && n <= self.start
        };
        in_bounds && (i128::from(n) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Callables
// ══════════════════════════════════════════════════════════════════════════════

pub enum FunctionBody {
    Def(Arc<FunctionDef>),
    Lambda(Arc<Lambda>),
}

impl FunctionBody {
    pub fn params(&self) -> &[Param] {
        match self {
            Self::Def(def) => &def.params,
            Self::Lambda(lambda) => &lambda.params,
        }
    }
}

/// A learner-defined function closed over its defining frame.
pub struct FunctionObj {
    pub name: String,
    pub body: FunctionBody,
    /// One entry per parameter, evaluated at definition time.
    pub defaults: Vec<Option<Value>>,
    pub closure: Rc<Frame>,
    pub scope: Rc<Scope>,
}

impl FunctionObj {
    pub fn params(&self) -> &[Param] {
        self.body.params()
    }
}

impl Drop for FunctionObj {
    fn drop(&mut self) {
        drain(self.defaults.drain(..).flatten().collect());
    }
}

/// `receiver.name` captured for a later call.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}
