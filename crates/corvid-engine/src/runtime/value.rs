//! Corvid value representation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::function::{ForeignFunction, ForeignMethod, Function};
use super::module::ModuleHandle;
use super::object::{BoundMethod, Class, Instance};

/// A Corvid value.
///
/// Booleans and numbers are stored inline; everything else is a shared
/// reference whose lifetime is that of its longest-lived clone.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// A module slot that was declared but never assigned
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Bool(bool),
    /// IEEE 754 double
    Double(f64),
    /// Immutable string
    String(Rc<str>),
    /// Compiled script function
    Function(Rc<Function>),
    /// Host function
    ForeignFunction(Rc<ForeignFunction>),
    /// Host method expecting a receiver
    ForeignMethod(Rc<ForeignMethod>),
    /// Class object
    Class(Rc<Class>),
    /// Handle to a loaded module
    Module(ModuleHandle),
    /// Class instance
    Instance(Rc<Instance>),
    /// Method paired with its receiver
    BoundMethod(Rc<BoundMethod>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::ForeignFunction(a), Value::ForeignFunction(b)) => Rc::ptr_eq(a, b),
            (Value::ForeignMethod(a), Value::ForeignMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => a.id == b.id,
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// NaN is the only value that is not equal to itself; maps refuse it as a key.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Double(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                n.to_bits().hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::Function(f) => Rc::as_ptr(f).hash(state),
            Value::ForeignFunction(f) => Rc::as_ptr(f).hash(state),
            Value::ForeignMethod(m) => Rc::as_ptr(m).hash(state),
            Value::Class(c) => Rc::as_ptr(c).hash(state),
            Value::Module(m) => m.id.hash(state),
            Value::Instance(i) => Rc::as_ptr(i).hash(state),
            Value::BoundMethod(b) => Rc::as_ptr(b).hash(state),
        }
    }
}

impl Value {
    /// Returns true for `null` and `false`.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    /// Returns true if this is the internal "declared but unassigned" marker.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns the number if this is a double.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the instance if this is one.
    pub fn as_instance(&self) -> Option<&Rc<Instance>> {
        match self {
            Value::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Returns a short name for the value's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Function(_)
            | Value::ForeignFunction(_)
            | Value::ForeignMethod(_)
            | Value::BoundMethod(_) => "function",
            Value::Class(_) => "class",
            Value::Module(_) => "module",
            Value::Instance(_) => "instance",
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

/// Writes a number the way scripts see it.
pub(crate) fn format_number(n: f64, f: &mut impl fmt::Write) -> fmt::Result {
    if n.is_nan() {
        write!(f, "nan")
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Double(n) => format_number(*n, f),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(func) => match &func.name {
                Some(name) => write!(f, "<fn {}>", name),
                None => write!(f, "<script>"),
            },
            Value::ForeignFunction(func) => write!(f, "<foreign fn {}>", func.name),
            Value::ForeignMethod(method) => write!(f, "<foreign fn {}>", method.name),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Module(module) => write!(f, "<module {}>", module.name),
            Value::Instance(instance) => write!(f, "{}", instance),
            Value::BoundMethod(bound) => write!(f, "{}", bound.method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_number_display() {
        assert_eq!(Value::Double(3.0).to_string(), "3");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(Value::Double(-7.0).to_string(), "-7");
        assert_eq!(Value::Double(f64::NAN).to_string(), "nan");
        assert_eq!(Value::Double(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::Double(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_literal_display() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::from("raw text").to_string(), "raw text");
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::Double(1.0), Value::Double(1.0));
        assert_ne!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_eq!(Value::from("abc"), Value::String(Rc::from(String::from("abc"))));
        assert_ne!(Value::Null, Value::Bool(false));
        assert_ne!(Value::Double(0.0), Value::from("0"));
    }

    #[test]
    fn test_falsey() {
        assert!(Value::Null.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Double(0.0).is_falsey());
        assert!(!Value::from("").is_falsey());
    }

    #[test]
    fn test_hash_agrees_with_equality() {
        let mut set = FxHashSet::default();
        set.insert(Value::Double(0.0));
        assert!(set.contains(&Value::Double(-0.0)));
        set.insert(Value::from("key"));
        assert!(set.contains(&Value::from("key")));
        assert!(!set.contains(&Value::Bool(true)));
    }
}
