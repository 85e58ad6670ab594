//! The `Map` built-in class: a hash table keyed by any value.

use std::any::Any;
use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::runtime::{Arity, ForeignClass, ForeignObject, Indexable, Value};

/// Native data of a `Map` instance.
#[derive(Debug, Default, Clone)]
pub struct MapData {
    /// The entries
    pub entries: FxHashMap<Value, Value>,
}

impl MapData {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a key; absent keys read as null.
    pub fn get(&self, key: &Value) -> Value {
        self.entries.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Writes a key.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), String> {
        check_key(&key)?;
        self.entries.insert(key, value);
        Ok(())
    }
}

// NaN never equals itself, so it could be stored but never found again.
fn check_key(key: &Value) -> Result<(), String> {
    match key {
        Value::Double(n) if n.is_nan() => Err("Map key cannot be NaN.".to_string()),
        _ => Ok(()),
    }
}

impl ForeignObject for MapData {
    fn render(&self) -> Option<String> {
        let mut out = String::from("{");
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: {}", key, value);
        }
        out.push('}');
        Some(out)
    }

    fn drain_values(&mut self) -> Vec<Value> {
        self.entries.drain().flat_map(|(key, value)| [key, value]).collect()
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

impl Indexable for MapData {
    fn get_index(&self, index: &Value) -> Result<Value, String> {
        Ok(self.get(index))
    }

    fn set_index(&mut self, index: Value, value: Value) -> Result<(), String> {
        self.insert(index, value)
    }
}

fn with_map<R>(receiver: &Value, f: impl FnOnce(&mut MapData) -> R) -> Result<R, String> {
    receiver
        .as_instance()
        .and_then(|instance| instance.with_foreign(f))
        .ok_or_else(|| "Expected a Map receiver.".to_string())
}

/// Builds the `Map` class.
pub fn class() -> ForeignClass {
    ForeignClass::new("Map")
        .allocator(|| Box::new(MapData::new()))
        .method("get", Arity::Fixed(1), |_, receiver, args| {
            with_map(receiver, |map| map.get(&args[0]))
        })
        .method("has", Arity::Fixed(1), |_, receiver, args| {
            with_map(receiver, |map| Value::Bool(map.entries.contains_key(&args[0])))
        })
        .method("remove", Arity::Fixed(1), |_, receiver, args| {
            with_map(receiver, |map| map.entries.remove(&args[0]).unwrap_or(Value::Null))
        })
        .method("len", Arity::Fixed(0), |_, receiver, _| {
            with_map(receiver, |map| Value::Double(map.entries.len() as f64))
        })
        .method("clear", Arity::Fixed(0), |_, receiver, _| {
            with_map(receiver, |map| map.entries.clear())?;
            Ok(Value::Null)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_key_is_null() {
        let map = MapData::new();
        assert_eq!(map.get_index(&Value::from("missing")), Ok(Value::Null));
    }

    #[test]
    fn test_keys_by_value() {
        let mut map = MapData::new();
        map.set_index(Value::from("a"), Value::Double(1.0)).unwrap();
        map.set_index(Value::Double(2.0), Value::Bool(true)).unwrap();
        assert_eq!(map.get(&Value::from(String::from("a"))), Value::Double(1.0));
        assert_eq!(map.get(&Value::Double(2.0)), Value::Bool(true));
        assert_eq!(map.entries.len(), 2);
    }

    #[test]
    fn test_negative_zero_key() {
        let mut map = MapData::new();
        map.insert(Value::Double(0.0), Value::from("zero")).unwrap();
        assert_eq!(map.get(&Value::Double(-0.0)), Value::from("zero"));
    }

    #[test]
    fn test_nan_key_rejected() {
        let mut map = MapData::new();
        assert_eq!(
            map.set_index(Value::Double(f64::NAN), Value::Null),
            Err("Map key cannot be NaN.".to_string())
        );
    }

    #[test]
    fn test_render() {
        let mut map = MapData::new();
        assert_eq!(map.render().as_deref(), Some("{}"));
        map.insert(Value::from("a"), Value::Double(1.0)).unwrap();
        assert_eq!(map.render().as_deref(), Some("{a: 1}"));
    }
}
