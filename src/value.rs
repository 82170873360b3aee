//! Host-side values.
//!
//! [`Value`] is the closed set of shapes a Python object can take on the
//! Rust side. Anything without a native counterpart stays a reference
//! ([`Value::Callable`] or [`Value::Opaque`]) and can be passed back to
//! Python unchanged.
//!
//! Tuples and lists are distinct variants, so `(1, 2)` never equals
//! `[1, 2]`. Dicts and sets compare without regard to order.

use crate::pyref::PyRef;

/// A complex number, as Python's `complex`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// An immutable sequence, as Python's `tuple`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple(pub Vec<Value>);

impl Tuple {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl<T: Into<Value>> FromIterator<T> for Tuple {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Tuple(iter.into_iter().map(Into::into).collect())
    }
}

/// Key-value pairs, as Python's `dict`.
///
/// Keys are unique under Python's key equality: `True`, `1`, `1.0` and
/// `1+0j` are one key, and the first spelling inserted is kept.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| same_key(k, key))
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace; returns the previous value for `key`.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| same_key(k, &key)) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// Unordered unique values, as Python's `set`. Uniqueness follows the
/// same key equality as [`Dict`].
#[derive(Debug, Clone, Default)]
pub struct Set {
    items: Vec<Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.iter().any(|v| same_key(v, value))
    }

    /// Returns `false` if an equal value was already present.
    pub fn insert(&mut self, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.items.iter().all(|v| other.contains(v))
    }
}

impl<T: Into<Value>> FromIterator<T> for Set {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Set::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

/// Numeric view of a value, for key comparison.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
    Complex(f64, f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match *value {
            Value::Bool(b) => Some(Num::Int(i64::from(b))),
            Value::Int(i) => Some(Num::Int(i)),
            Value::Float(f) => Some(Num::Float(f)),
            Value::Complex(c) => Some(Num::Complex(c.re, c.im)),
            _ => None,
        }
    }
}

fn num_eq(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Float(x), Num::Float(y)) => x == y,
        (Num::Int(i), Num::Float(f)) | (Num::Float(f), Num::Int(i)) => int_eq_float(i, f),
        (Num::Complex(a_re, a_im), Num::Complex(b_re, b_im)) => a_re == b_re && a_im == b_im,
        (Num::Complex(re, im), real) | (real, Num::Complex(re, im)) => {
            im == 0.0 && num_eq(Num::Float(re), real)
        }
    }
}

/// Exact comparison: `2**53 + 1` is not equal to `2.0**53`.
fn int_eq_float(i: i64, f: f64) -> bool {
    // 2**63, the first float past i64::MAX.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (-LIMIT..LIMIT).contains(&f) && f.fract() == 0.0 && f as i64 == i
}

/// Equality of `dict` keys and `set` members.
fn same_key(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return num_eq(x, y);
    }
    match (a, b) {
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| same_key(p, q))
        }
        _ => a == b,
    }
}

/// A Python value seen from Rust.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(Complex),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Tuple),
    Dict(Dict),
    Set(Set),
    /// A function, method or builtin function.
    Callable(PyRef),
    /// Any object of a type the bridge does not convert.
    Opaque(PyRef),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Complex(_) => "complex",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Callable(_) => "callable",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The underlying reference of a callable or opaque value.
    pub fn as_pyref(&self) -> Option<&PyRef> {
        match self {
            Value::Callable(r) | Value::Opaque(r) => Some(r),
            _ => None,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Complex> for Value {
    fn from(c: Complex) -> Self {
        Value::Complex(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Tuple> for Value {
    fn from(t: Tuple) -> Self {
        Value::Tuple(t)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Value::Dict(d)
    }
}

impl From<Set> for Value {
    fn from(s: Set) -> Self {
        Value::Set(s)
    }
}

impl From<PyRef> for Value {
    fn from(r: PyRef) -> Self {
        Value::Opaque(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_and_list_are_different_kinds() {
        let tuple = Value::Tuple(Tuple::from_iter([1, 2, 3]));
        let list = Value::List(vec![1.into(), 2.into(), 3.into()]);
        assert_ne!(tuple, list);
        assert_eq!(tuple, Value::Tuple(Tuple::from_iter([1, 2, 3])));
        assert_eq!(tuple.kind(), "tuple");
    }

    #[test]
    fn dict_equality_ignores_order() {
        let a = Dict::from_iter([("a", 1), ("b", 2)]);
        let b = Dict::from_iter([("b", 2), ("a", 1)]);
        assert_eq!(a, b);
        assert_ne!(a, Dict::from_iter([("a", 1)]));
        assert_ne!(a, Dict::from_iter([("a", 1), ("b", 3)]));
    }

    #[test]
    fn dict_insert_replaces_existing_key() {
        let mut d = Dict::new();
        assert_eq!(d.insert("k", 1), None);
        assert_eq!(d.insert("k", 2), Some(Value::Int(1)));
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&"k".into()), Some(&Value::Int(2)));
        assert!(!d.contains_key(&"missing".into()));
    }

    #[test]
    fn set_rejects_duplicates_and_ignores_order() {
        let mut s = Set::from_iter([1, 2, 3]);
        assert!(!s.insert(2));
        assert_eq!(s.len(), 3);
        assert_eq!(s, Set::from_iter([3, 1, 2]));
        assert!(s.contains(&Value::Int(1)));
        assert!(!s.contains(&Value::Int(4)));
    }

    #[test]
    fn numeric_keys_collapse_like_python() {
        let s = Set::from_iter([Value::Int(1), Value::Float(1.0), Value::Bool(true)]);
        assert_eq!(s.len(), 1);
        assert!(s.contains(&Value::Complex(Complex::new(1.0, 0.0))));
        assert!(!s.contains(&Value::Complex(Complex::new(1.0, 1.0))));

        let mut d = Dict::new();
        d.insert(1, "int");
        assert_eq!(d.insert(true, "bool"), Some(Value::from("int")));
        assert_eq!(d.len(), 1);
        // The first key spelling stays.
        assert_eq!(d.keys().next(), Some(&Value::Int(1)));
        assert_eq!(d.get(&Value::Float(1.0)), Some(&Value::from("bool")));

        let t = Dict::from_iter([(Value::Tuple(Tuple::from_iter([1, 2])), "t")]);
        assert!(t.contains_key(&Value::Tuple(Tuple(vec![Value::Float(1.0), Value::Int(2)]))));
    }

    #[test]
    fn large_ints_compare_exactly_with_floats() {
        let big = 1i64 << 53;
        let s = Set::from_iter([Value::Int(big + 1), Value::Float(big as f64)]);
        assert_eq!(s.len(), 2);
        let s = Set::from_iter([Value::Int(i64::MAX), Value::Float(i64::MAX as f64)]);
        assert_eq!(s.len(), 2);
        let s = Set::from_iter([Value::Float(f64::NAN), Value::Float(f64::NAN)]);
        assert_eq!(s.len(), 2);
        assert!(!Set::from_iter([Value::Float(0.5)]).contains(&Value::Int(0)));
    }

    #[test]
    fn int_and_float_do_not_compare_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::from(1), Value::Int(1));
        assert_eq!(Value::from(()), Value::None);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(2.5).as_float(), Some(2.5));
        assert_eq!(Value::from(7i64).as_int(), Some(7));
        assert_eq!(Value::None.as_int(), None);
    }
}
