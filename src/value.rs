use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

/// Aggregate identity counter. The ids are only ever compared by the
/// cycle-safe printer; aliased handles share one id.
static NEXT_AGGREGATE_ID: AtomicU64 = AtomicU64::new(0);

fn next_aggregate_id() -> u64 {
    NEXT_AGGREGATE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A shared, mutable, ordered sequence of values. Cloning the handle
/// aliases the same underlying sequence.
#[derive(Clone)]
pub struct ListHandle {
    id: u64,
    elems: Rc<RefCell<Vec<Value>>>,
}

impl ListHandle {
    pub fn new(elems: Vec<Value>) -> Self {
        Self {
            id: next_aggregate_id(),
            elems: Rc::new(RefCell::new(elems)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.elems.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.elems.borrow_mut()
    }

    pub fn same_aggregate(&self, other: &ListHandle) -> bool {
        Rc::ptr_eq(&self.elems, &other.elems)
    }
}

/// A shared, mutable map from byte-string keys to values.
#[derive(Clone)]
pub struct MapHandle {
    id: u64,
    entries: Rc<RefCell<IndexMap<Vec<u8>, Value>>>,
}

impl MapHandle {
    pub fn new(entries: IndexMap<Vec<u8>, Value>) -> Self {
        Self {
            id: next_aggregate_id(),
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<Vec<u8>, Value>> {
        self.entries.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<Vec<u8>, Value>> {
        self.entries.borrow_mut()
    }

    pub fn same_aggregate(&self, other: &MapHandle) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

/// An opaque host pointer. Not constructible from the language itself.
#[derive(Clone)]
pub struct ExternHandle {
    id: u64,
    data: Rc<dyn Any>,
}

impl ExternHandle {
    pub fn new(data: Rc<dyn Any>) -> Self {
        Self {
            id: next_aggregate_id(),
            data,
        }
    }

    pub fn data(&self) -> &Rc<dyn Any> {
        &self.data
    }
}

/// A Shrimply datum. Scalars are immediate; lists and maps are shared
/// aggregates, so assigning or passing one aliases it.
#[derive(Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(Vec<u8>),
    List(ListHandle),
    Map(MapHandle),
    Extern(ExternHandle),
}

impl Value {
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Value::String(bytes.into())
    }

    pub fn list(elems: Vec<Value>) -> Self {
        Value::List(ListHandle::new(elems))
    }

    pub fn map(entries: IndexMap<Vec<u8>, Value>) -> Self {
        Value::Map(MapHandle::new(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Number(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Extern(_) => "extern",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n > 0,
            Value::Number(n) => *n > 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(list) => !list.borrow().is_empty(),
            Value::Map(map) => !map.borrow().is_empty(),
            Value::Extern(_) => false,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Number(n) => Some(*n as i64),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// The user-facing string form: a String is its own bytes without
    /// quotes, everything else renders through `raw_string`.
    pub fn to_text(&self) -> Vec<u8> {
        match self {
            Value::String(s) => s.clone(),
            other => other.raw_string().into_bytes(),
        }
    }

    /// The quoted, escaped, cycle-safe form. Aggregates already visited on
    /// the current path print as `...`, so this terminates on any value.
    pub fn raw_string(&self) -> String {
        let mut seen = HashSet::new();
        self.raw_string_inner(&mut seen)
    }

    fn raw_string_inner(&self, seen: &mut HashSet<u64>) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => (if *b { "true" } else { "false" }).to_string(),
            Value::String(s) => format!("\"{}\"", escape_bytes(s)),
            Value::List(list) => {
                if !seen.insert(list.id()) {
                    return "...".to_string();
                }
                let mut out = String::from("[");
                for (idx, value) in list.borrow().iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&value.raw_string_inner(seen));
                }
                out.push(']');
                seen.remove(&list.id());
                out
            }
            Value::Map(map) => {
                if !seen.insert(map.id()) {
                    return "...".to_string();
                }
                let mut out = String::from("(");
                for (idx, (key, value)) in map.borrow().iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&format!("\"{}\": ", escape_bytes(key)));
                    out.push_str(&value.raw_string_inner(seen));
                }
                out.push(')');
                seen.remove(&map.id());
                out
            }
            Value::Extern(ext) => format!("<extern {}>", ext.id),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Aggregates compare by identity, never structurally.
            (Value::List(a), Value::List(b)) => a.same_aggregate(b),
            (Value::Map(a), Value::Map(b)) => a.same_aggregate(b),
            (Value::Extern(a), Value::Extern(b)) => Rc::ptr_eq(&a.data, &b.data),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_string())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_string())
    }
}

/// Formats a double. Rust's shortest form keeps integer round-trips exact
/// and renders the special values as `inf`, `-inf`, and `NaN`.
pub(crate) fn format_number(n: f64) -> String {
    format!("{n}")
}

/// Escapes a byte string into printable ASCII. Recognized whitespace
/// escapes print by name, every other control byte and every byte outside
/// ASCII prints as `\xHH`.
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out
}
