//! MessagePack ⇄ `serde_json::Value`
//!
//! Server payloads use integer map keys and binary blobs in places, neither
//! of which `serde_json::Value` accepts when deserialised directly. The
//! loose visitor below stringifies non-string keys and turns binary data
//! into an array of byte values, so every well-formed MessagePack document
//! maps onto a JSON value.

use crate::{MaxWireError, Result};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Decode a MessagePack document into a JSON value
pub fn from_msgpack(bytes: &[u8]) -> Result<Value> {
    rmp_serde::from_slice::<LooseValue>(bytes)
        .map(|v| v.0)
        .map_err(|e| MaxWireError::Decode(format!("msgpack: {}", e)))
}

/// Encode a JSON value as MessagePack (maps keep their string keys)
pub fn to_msgpack(value: &Value) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| MaxWireError::Encode(format!("msgpack: {}", e)))
}

struct LooseValue(Value);

impl<'de> Deserialize<'de> for LooseValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LooseVisitor).map(LooseValue)
    }
}

struct LooseVisitor;

impl<'de> Visitor<'de> for LooseVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any MessagePack value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Array(v.iter().map(|b| Value::from(*b)).collect()))
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        LooseValue::deserialize(deserializer).map(|v| v.0)
    }

    // msgpack ext types surface as a newtype (tag, data)
    fn visit_newtype_struct<D>(self, deserializer: D) -> std::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        LooseValue::deserialize(deserializer).map(|v| v.0)
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(LooseValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut access: A) -> std::result::Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = Map::new();
        while let Some((LooseValue(key), LooseValue(value))) = access.next_entry()? {
            let key = match key {
                Value::String(s) => s,
                Value::Null => return Err(de::Error::custom("null map key")),
                other => other.to_string(),
            };
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_integer_keys_are_stringified() {
        let mut counters = BTreeMap::new();
        counters.insert(1u32, "like");
        counters.insert(2u32, "fire");
        let bytes = rmp_serde::to_vec(&counters).unwrap();

        let value = from_msgpack(&bytes).unwrap();
        assert_eq!(value, json!({"1": "like", "2": "fire"}));
    }

    #[test]
    fn test_nested_document() {
        let original = json!({
            "chatId": -68912345,
            "message": {"text": "привет", "attaches": [], "elements": [{"from": 0, "length": 6}]},
            "ttl": false,
            "ratio": 0.5
        });
        let bytes = to_msgpack(&original).unwrap();
        assert_eq!(from_msgpack(&bytes).unwrap(), original);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = from_msgpack(&[0xc1]).unwrap_err();
        assert!(err.is_decode());
    }
}
