//! Dynamic data exchanged with compiled senders and receivers.

use crate::xml::Element;
use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered mapping of field names to values.
pub type Map = IndexMap<String, Value>;

/// Caller-facing message data.
///
/// Encode input and decode output are trees of `Value`. Maps keep insertion
/// order so that encoded output and decoded records are deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Text(String),
    List(Vec<Value>),
    Map(Map),
    /// Raw parsed element, kept when no schema reader applies
    Node(Element),
}

impl Value {
    /// Build a map from ordered pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Element> {
        match self {
            Value::Node(e) => Some(e),
            _ => None,
        }
    }

    /// Field lookup on a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Reduce to text: nodes yield their text content, scalars their value.
    pub fn text_content(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Node(e) => Some(e.text_content()),
            _ => None,
        }
    }

    /// Absent, a single value, or an ordered sequence, as a list.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            other => vec![other],
        }
    }
}

/// Insert under `key`, turning a repeated key into a list in arrival order.
pub fn insert_repeated(map: &mut Map, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::List(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::List(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<Element> for Value {
    fn from(element: Element) -> Self {
        Value::Node(element)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Node(element) => {
                let xml = element.to_xml().map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&xml)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar, sequence or mapping")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Deserialize::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }
        Ok(Value::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::QName;

    #[test]
    fn test_from_yaml_keeps_order_and_stringifies_numbers() {
        let value: Value = serde_yaml::from_str("b: 1\na: [x, true]\nc: ~\n").unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(map["b"], Value::from("1"));
        assert_eq!(map["a"], Value::List(vec!["x".into(), true.into()]));
        assert!(map["c"].is_null());
    }

    #[test]
    fn test_node_serializes_as_xml() {
        let node = Element::new(QName::unqualified("code")).with_text("42");
        let json = serde_json::to_string(&Value::map([("detail", Value::Node(node))])).unwrap();
        assert_eq!(json, r#"{"detail":"<code>42</code>"}"#);
    }

    #[test]
    fn test_into_items() {
        assert!(Value::Null.into_items().is_empty());
        assert_eq!(Value::from("x").into_items().len(), 1);
        assert_eq!(Value::List(vec!["a".into(), "b".into()]).into_items().len(), 2);
    }

    #[test]
    fn test_text_content() {
        let node = Element::new(QName::unqualified("m")).with_text("hi");
        assert_eq!(Value::Node(node).text_content().as_deref(), Some("hi"));
        assert_eq!(Value::map([("a", Value::Null)]).text_content(), None);
    }
}
