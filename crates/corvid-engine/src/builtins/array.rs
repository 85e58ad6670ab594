//! The `Array` built-in class.
//!
//! A growable list of values backed by a `Vec`. Array literals (`[1, 2]`)
//! construct one and fill it through `push`.

use std::any::Any;
use std::fmt::Write as _;

use crate::runtime::{Arity, ForeignClass, ForeignObject, Indexable, Value};

/// Native data of an `Array` instance.
#[derive(Debug, Default, Clone)]
pub struct ArrayData {
    /// The elements, in order
    pub elements: Vec<Value>,
}

impl ArrayData {
    /// Creates an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn position(&self, index: &Value, allow_end: bool) -> Result<usize, String> {
        let Value::Double(n) = index else {
            return Err("Array index must be a number.".to_string());
        };
        if n.fract() != 0.0 {
            return Err("Array index must be an integer.".to_string());
        }
        let limit = if allow_end { self.len() } else { self.len().saturating_sub(1) };
        if *n < 0.0 || *n > limit as f64 || (!allow_end && self.is_empty()) {
            return Err("Array index out of bounds.".to_string());
        }
        Ok(*n as usize)
    }
}

impl ForeignObject for ArrayData {
    fn render(&self) -> Option<String> {
        let mut out = String::from("[");
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}", element);
        }
        out.push(']');
        Some(out)
    }

    fn drain_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.elements)
    }

    fn as_indexable(&mut self) -> Option<&mut dyn Indexable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Indexable for ArrayData {
    fn get_index(&self, index: &Value) -> Result<Value, String> {
        let i = self.position(index, false)?;
        Ok(self.elements[i].clone())
    }

    fn set_index(&mut self, index: Value, value: Value) -> Result<(), String> {
        let i = self.position(&index, false)?;
        self.elements[i] = value;
        Ok(())
    }
}

fn with_array<R>(receiver: &Value, f: impl FnOnce(&mut ArrayData) -> R) -> Result<R, String> {
    receiver
        .as_instance()
        .and_then(|instance| instance.with_foreign(f))
        .ok_or_else(|| "Expected an Array receiver.".to_string())
}

/// Builds the `Array` class.
pub fn class() -> ForeignClass {
    ForeignClass::new("Array")
        .allocator(|| Box::new(ArrayData::new()))
        .method("push", Arity::Fixed(1), |_, receiver, args| {
            with_array(receiver, |array| array.elements.push(args[0].clone()))?;
            Ok(receiver.clone())
        })
        .method("pop", Arity::Fixed(0), |_, receiver, _| {
            with_array(receiver, |array| array.elements.pop().unwrap_or(Value::Null))
        })
        .method("len", Arity::Fixed(0), |_, receiver, _| {
            with_array(receiver, |array| Value::Double(array.len() as f64))
        })
        .method("insert", Arity::Fixed(2), |_, receiver, args| {
            with_array(receiver, |array| -> Result<Value, String> {
                let i = array.position(&args[0], true)?;
                array.elements.insert(i, args[1].clone());
                Ok(Value::Null)
            })?
        })
        .method("removeAt", Arity::Fixed(1), |_, receiver, args| {
            with_array(receiver, |array| -> Result<Value, String> {
                let i = array.position(&args[0], false)?;
                Ok(array.elements.remove(i))
            })?
        })
        .method("clear", Arity::Fixed(0), |_, receiver, _| {
            with_array(receiver, |array| array.elements.clear())?;
            Ok(Value::Null)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(values: &[f64]) -> ArrayData {
        ArrayData {
            elements: values.iter().map(|&n| Value::Double(n)).collect(),
        }
    }

    #[test]
    fn test_render() {
        assert_eq!(ArrayData::new().render().as_deref(), Some("[]"));
        let mut data = array(&[1.0, 2.5]);
        data.elements.push(Value::from("x"));
        assert_eq!(data.render().as_deref(), Some("[1, 2.5, x]"));
    }

    #[test]
    fn test_get_index() {
        let data = array(&[10.0, 20.0]);
        assert_eq!(data.get_index(&Value::Double(1.0)), Ok(Value::Double(20.0)));
        assert_eq!(
            data.get_index(&Value::Double(2.0)),
            Err("Array index out of bounds.".to_string())
        );
        assert_eq!(
            data.get_index(&Value::Double(-1.0)),
            Err("Array index out of bounds.".to_string())
        );
        assert!(data.get_index(&Value::Double(0.5)).is_err());
        assert!(data.get_index(&Value::from("0")).is_err());
    }

    #[test]
    fn test_empty_array_index() {
        let data = ArrayData::new();
        assert_eq!(
            data.get_index(&Value::Double(0.0)),
            Err("Array index out of bounds.".to_string())
        );
    }

    #[test]
    fn test_set_index() {
        let mut data = array(&[1.0]);
        data.set_index(Value::Double(0.0), Value::Null).unwrap();
        assert_eq!(data.elements, vec![Value::Null]);
        assert!(data.set_index(Value::Double(1.0), Value::Null).is_err());
    }

    #[test]
    fn test_insert_position_allows_end() {
        let data = array(&[1.0]);
        assert_eq!(data.position(&Value::Double(1.0), true), Ok(1));
        assert!(data.position(&Value::Double(1.0), false).is_err());
    }
}
