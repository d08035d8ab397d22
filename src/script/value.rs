//! Parameter value model
//!
//! `Value` is what the command parser produces and what interpolation
//! consumes. `VariableRef` only exists between those two stages: the wire
//! conversion in [`Value::to_json`] refuses to send one.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::common::{Error, Result};

/// Parameter mapping, ordered by key so parsed invocations compare and
/// print deterministically
pub type Mapping = BTreeMap<String, Value>;

/// A parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    /// Only produced by bracket literals and server payloads
    Float(f64),
    Boolean(bool),
    /// Only produced by bracket literals and server payloads
    Null,
    List(Vec<Value>),
    Mapping(Mapping),
    /// `${name}`, resolved during interpolation
    VariableRef(String),
}

impl Value {
    /// True when no `VariableRef` remains anywhere inside this value
    pub fn is_resolved(&self) -> bool {
        match self {
            Value::VariableRef(_) => false,
            Value::List(items) => items.iter().all(Value::is_resolved),
            Value::Mapping(map) => map.values().all(Value::is_resolved),
            _ => true,
        }
    }

    /// Convert to wire JSON
    ///
    /// Fails with `UndefinedVariable` if a reference survived interpolation.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Null => serde_json::Value::Null,
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<Vec<_>>>()?,
            ),
            Value::Mapping(map) => serde_json::Value::Object(mapping_to_json(map)?),
            Value::VariableRef(name) => return Err(Error::UndefinedVariable(name.clone())),
        })
    }
}

/// Convert a resolved parameter mapping into a JSON object
pub fn mapping_to_json(map: &Mapping) -> Result<serde_json::Map<String, serde_json::Value>> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
        .collect()
}

/// Convert a JSON object received from the server into a mapping
pub fn mapping_from_json(map: serde_json::Map<String, serde_json::Value>) -> Mapping {
    map.into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect()
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Mapping(mapping_from_json(map)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

// Display form: unresolved references render as their source text.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Null => serializer.serialize_unit(),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::VariableRef(name) => serializer.serialize_str(&format!("${{{}}}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_structure() {
        let value = Value::from(json!({"line": 7, "ok": true, "score": 0.5, "tags": ["a"], "n": null}));
        let Value::Mapping(map) = value else {
            panic!("expected mapping");
        };
        assert_eq!(map["line"], Value::Integer(7));
        assert_eq!(map["ok"], Value::Boolean(true));
        assert_eq!(map["score"], Value::Float(0.5));
        assert_eq!(map["tags"], Value::List(vec![Value::from("a")]));
        assert_eq!(map["n"], Value::Null);
    }

    #[test]
    fn test_to_json_rejects_unresolved_reference() {
        let value = Value::List(vec![Value::Integer(1), Value::VariableRef("x".to_string())]);
        assert!(!value.is_resolved());
        let err = value.to_json().unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(name) if name == "x"));
    }

    #[test]
    fn test_serialize_renders_reference_as_source_text() {
        let mut map = Mapping::new();
        map.insert("line".to_string(), Value::VariableRef("last_result".to_string()));
        map.insert("uri".to_string(), Value::from("file:///a.ts"));
        let json = serde_json::to_value(Value::Mapping(map)).unwrap();
        assert_eq!(json, json!({"line": "${last_result}", "uri": "file:///a.ts"}));
    }

    #[test]
    fn test_to_json_of_resolved_mapping() {
        let mut map = Mapping::new();
        map.insert("character".to_string(), Value::Integer(5));
        map.insert("preview".to_string(), Value::Boolean(true));
        assert_eq!(
            serde_json::Value::Object(mapping_to_json(&map).unwrap()),
            json!({"character": 5, "preview": true})
        );
    }
}
