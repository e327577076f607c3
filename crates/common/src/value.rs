//! Runtime value representation for the OMG VM.
//!
//! Values are what live on the operand stack, in locals, and in globals.
//! Lists and dicts are reference-counted with interior mutability, so all
//! copies of a value share identity: mutation through one reference is
//! visible through every other.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// The globals mapping of a loaded module, shared by reference.
///
/// A [`FuncRef`] captures this so that a function invoked through a
/// first-class reference still resolves top-level names of the module
/// that defined it.
pub type Globals = Rc<RefCell<HashMap<String, Value>>>;

/// Reference to an entry in the function table.
#[derive(Debug, Clone)]
pub struct FuncRef {
    /// Index into the image's function table.
    pub index: usize,
    /// Function name, kept for display (`<fn name>`).
    pub name: Rc<str>,
    /// Globals of the defining module.
    pub globals: Globals,
}

/// Runtime value representation.
#[derive(Debug, Clone)]
pub enum Value {
    /// Signed 64-bit integer.
    Int(i64),
    /// Immutable UTF-8 string with codepoint semantics.
    Str(String),
    /// Boolean truth value.
    Bool(bool),
    /// Sentinel for "no value".
    None,
    /// Mutable list, identity-shared.
    List(Rc<RefCell<Vec<Value>>>),
    /// Mutable dictionary, insertion-order preserved, identity-shared.
    Dict(Rc<RefCell<IndexMap<String, Value>>>),
    /// Dictionary that rejects all mutation.
    FrozenDict(Rc<IndexMap<String, Value>>),
    /// First-class function reference.
    Func(FuncRef),
}

impl Value {
    /// Wrap a vector of values as a fresh list.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Wrap a map as a fresh dict.
    pub fn dict(map: IndexMap<String, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    /// Truthiness used by `JMP_IF_FALSE`, `NOT`, `AND`, `OR`, and `ASSERT`.
    ///
    /// Falsy: `false`, `0`, `""`, `none`, and empty containers.
    /// A `FuncRef` is always truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::None => false,
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::FrozenDict(d) => !d.is_empty(),
            Value::Func(_) => true,
        }
    }

    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::None => "none",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::FrozenDict(_) => "frozen dict",
            Value::Func(_) => "fn",
        }
    }
}

// Equality is structural for containers and numeric/codepoint-wise for
// scalars. A FrozenDict compares equal to a Dict with the same entries;
// every other cross-type pair is unequal. FuncRefs compare by identity
// (same table slot, same globals). Container equality assumes values are
// acyclic, which holds for anything the instruction set can build.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::FrozenDict(a), Value::FrozenDict(b)) => Rc::ptr_eq(a, b) || **a == **b,
            (Value::Dict(a), Value::FrozenDict(b)) => *a.borrow() == **b,
            (Value::FrozenDict(a), Value::Dict(b)) => **a == *b.borrow(),
            (Value::Func(a), Value::Func(b)) => {
                a.index == b.index && Rc::ptr_eq(&a.globals, &b.globals)
            }
            _ => false,
        }
    }
}

/// Canonical formatter.
///
/// `seen` holds the identity of every list/dict currently being
/// formatted. Reentry on the same identity prints a placeholder instead
/// of recursing; the identity is released on exit so a value that merely
/// appears twice (shared, not cyclic) still prints in full.
fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, seen: &mut HashSet<usize>) -> fmt::Result {
    match value {
        Value::Int(i) => write!(f, "{i}"),
        Value::Str(s) => f.write_str(s),
        Value::Bool(b) => write!(f, "{b}"),
        Value::None => f.write_str("none"),
        Value::List(list) => {
            let ptr = Rc::as_ptr(list) as usize;
            if !seen.insert(ptr) {
                return f.write_str("[...]");
            }
            f.write_str("[")?;
            for (i, item) in list.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(item, f, seen)?;
            }
            f.write_str("]")?;
            seen.remove(&ptr);
            Ok(())
        }
        Value::Dict(map) => {
            let ptr = Rc::as_ptr(map) as usize;
            if !seen.insert(ptr) {
                return f.write_str("{...}");
            }
            fmt_entries(map.borrow().iter(), f, seen)?;
            seen.remove(&ptr);
            Ok(())
        }
        Value::FrozenDict(map) => {
            let ptr = Rc::as_ptr(map) as usize;
            if !seen.insert(ptr) {
                return f.write_str("{...}");
            }
            fmt_entries(map.iter(), f, seen)?;
            seen.remove(&ptr);
            Ok(())
        }
        Value::Func(func) => write!(f, "<fn {}>", func.name),
    }
}

fn fmt_entries<'a>(
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
    f: &mut fmt::Formatter<'_>,
    seen: &mut HashSet<usize>,
) -> fmt::Result {
    f.write_str("{")?;
    for (i, (key, val)) in entries.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: ")?;
        fmt_value(val, f, seen)?;
    }
    f.write_str("}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut seen = HashSet::new();
        fmt_value(self, f, &mut seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::None.is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::list(vec![Value::None]).is_truthy());
        assert!(!Value::dict(indexmap! {}).is_truthy());
    }

    #[test]
    fn display_scalars() {
        assert_eq!(Value::Int(14).to_string(), "14");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::None.to_string(), "none");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
    }

    #[test]
    fn display_containers() {
        let list = Value::list(vec![Value::Int(1), Value::Str("a".into()), Value::None]);
        assert_eq!(list.to_string(), "[1, a, none]");

        let dict = Value::dict(indexmap! {
            "a".to_string() => Value::Int(1),
            "b".to_string() => Value::list(vec![Value::Int(2)]),
        });
        assert_eq!(dict.to_string(), "{a: 1, b: [2]}");
    }

    #[test]
    fn display_self_referential_list() {
        let inner = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let list = Value::List(inner.clone());
        inner.borrow_mut().push(list.clone());
        assert_eq!(list.to_string(), "[1, [...]]");
    }

    #[test]
    fn display_shared_but_acyclic_prints_in_full() {
        let shared = Value::list(vec![Value::Int(7)]);
        let outer = Value::list(vec![shared.clone(), shared]);
        assert_eq!(outer.to_string(), "[[7], [7]]");
    }

    #[test]
    fn display_self_referential_dict() {
        let inner = Rc::new(RefCell::new(IndexMap::new()));
        let dict = Value::Dict(inner.clone());
        inner.borrow_mut().insert("me".to_string(), dict.clone());
        assert_eq!(dict.to_string(), "{me: {...}}");
    }

    #[test]
    fn equality_structural() {
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::list(vec![Value::Int(1), Value::Int(2)]),
        );
        assert_ne!(
            Value::list(vec![Value::Int(1)]),
            Value::list(vec![Value::Int(2)]),
        );
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Int(0), Value::None);
        assert_ne!(Value::Str("1".into()), Value::Int(1));
    }

    #[test]
    fn frozen_dict_equals_identical_dict() {
        let entries = indexmap! { "a".to_string() => Value::Int(1) };
        let dict = Value::dict(entries.clone());
        let frozen = Value::FrozenDict(Rc::new(entries));
        assert_eq!(dict, frozen);
        assert_eq!(frozen, dict);
    }

    #[test]
    fn dict_equality_ignores_insertion_order() {
        let a = Value::dict(indexmap! {
            "x".to_string() => Value::Int(1),
            "y".to_string() => Value::Int(2),
        });
        let b = Value::dict(indexmap! {
            "y".to_string() => Value::Int(2),
            "x".to_string() => Value::Int(1),
        });
        assert_eq!(a, b);
    }
}
