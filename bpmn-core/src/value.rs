use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved variable keys the engine itself reads or writes (spec §6).
pub mod reserved {
    pub const TOKEN_ID: &str = "_tokenID";
    pub const MESSAGE_CORRELATED: &str = "_message_correlated";
    pub const MESSAGE_ID: &str = "_message_id";
    pub const CORRELATION_KEY: &str = "_correlation_key";
    pub const CORRELATED_BY: &str = "_correlatedBy";
    pub const DATA: &str = "data";
    pub const RESPONSE: &str = "response";
}

/// A process/token variable — string, number, boolean, null, array, or
/// nested object. This is the typed value tree interior logic works with;
/// `serde_json::Value` is accepted/returned only at wire boundaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// BPMN truthiness: booleans by value, everything else non-null is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Object-shaped empty variable map, the default for a fresh token/instance.
    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }

    /// Dotted-path lookup (`a.b.c`) against an object tree. Used by the
    /// default expression evaluator and by executors resolving `=path` refs.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for seg in path.split('.') {
            cur = cur.as_object()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segs: Vec<&str> = path.split('.').collect();
        let last = segs.pop().expect("path must have at least one segment");
        let mut cur = self;
        for seg in segs {
            let map = match cur {
                Value::Object(m) => m,
                _ => {
                    *cur = Value::empty_object();
                    cur.as_object_mut().unwrap()
                }
            };
            cur = map.entry(seg.to_string()).or_insert_with(Value::empty_object);
        }
        let map = match cur {
            Value::Object(m) => m,
            _ => {
                *cur = Value::empty_object();
                cur.as_object_mut().unwrap()
            }
        };
        map.insert(last.to_string(), value);
    }

    /// Last-writer-wins, deep merge of object trees (used at gateway joins
    /// and subprocess/call-activity output mapping).
    pub fn merge_from(&mut self, other: &Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (k, v) in b {
                    match a.get_mut(k) {
                        Some(existing) if matches!((&*existing, v), (Value::Object(_), Value::Object(_))) => {
                            existing.merge_from(v);
                        }
                        _ => {
                            a.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            (slot, other) => *slot = other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        serde_json::from_value(json).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_get_set_roundtrip() {
        let mut v = Value::empty_object();
        v.set_path("a.b", Value::from(1.0));
        assert_eq!(v.get_path("a.b"), Some(&Value::Number(1.0)));
        assert_eq!(v.get_path("a.c"), None);
    }

    #[test]
    fn merge_last_writer_wins() {
        let mut a = Value::empty_object();
        a.set_path("x", Value::from(1.0));
        a.set_path("y", Value::from("keep"));
        let mut b = Value::empty_object();
        b.set_path("x", Value::from(2.0));
        a.merge_from(&b);
        assert_eq!(a.get_path("x"), Some(&Value::Number(2.0)));
        assert_eq!(a.get_path("y"), Some(&Value::String("keep".into())));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Number(1.0).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
    }
}
