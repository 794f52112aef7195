//! Dynamic Form Values
//!
//! Form fields rarely share one Rust type: a form has text inputs, checkboxes,
//! numeric inputs and repeated groups side by side. [`Value`] is the dynamic
//! type used when one aggregate spans all of them.
//!
//! Change detection follows the cell rule: scalars compare by value, `NaN`
//! equals `NaN`, and lists and maps always count as changed.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::reactive::Distinct;

/// A dynamically typed field value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is a list or a map.
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }
}

impl Distinct for Value {
    fn is_distinct(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => false,
            (Self::Bool(a), Self::Bool(b)) => a != b,
            (Self::Number(a), Self::Number(b)) => a.is_distinct(b),
            (Self::Text(a), Self::Text(b)) => a != b,
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_compare_by_value() {
        assert!(!Value::from("a").is_distinct(&Value::from("a")));
        assert!(Value::from("a").is_distinct(&Value::from("b")));
        assert!(!Value::Null.is_distinct(&Value::Null));
        assert!(Value::Null.is_distinct(&Value::from(false)));
        assert!(!Value::from(f64::NAN).is_distinct(&Value::from(f64::NAN)));
    }

    #[test]
    fn compound_values_always_differ() {
        let list = Value::from(vec![1, 2]);
        assert!(list.is_distinct(&list.clone()));

        let map = Value::Map(IndexMap::new());
        assert!(map.is_distinct(&map));
    }

    #[test]
    fn serializes_untagged() {
        let value = Value::from(vec![Value::from("x"), Value::from(1), Value::Null]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["x",1.0,null]"#);

        let parsed: Value = serde_json::from_str(r#"{"name": "Ada", "age": 36}"#).unwrap();
        assert_eq!(parsed.get("name").and_then(Value::as_str), Some("Ada"));
        assert_eq!(parsed.get("age").and_then(Value::as_f64), Some(36.0));
    }

    #[test]
    fn display_formats_scalars_plainly() {
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
