//! [`PackValue`], the in-memory form of everything the codec reads and writes.

use base64::Engine;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum PackValue {
    Null,
    /// Distinct from `Null`; marks an absent value on the wire.
    Undefined,
    Bool(bool),
    Integer(i64),
    /// Only for integers above `i64::MAX`.
    UInteger(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Array(Vec<PackValue>),
    Object(Vec<(String, PackValue)>),
    /// MessagePack extension: type byte and raw payload.
    Extension(i8, Vec<u8>),
}

impl PackValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, PackValue::Undefined)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PackValue::Integer(i) => Some(*i),
            PackValue::UInteger(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<PackValue>> {
        match self {
            PackValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Converts to JSON, mapping `Undefined` to `None`.
    ///
    /// Undefined array items become `null`, undefined object entries are
    /// dropped. Binary data and extensions become base64 data URIs.
    pub fn into_json(self) -> Option<Value> {
        match self {
            PackValue::Undefined => None,
            other => Some(other.into()),
        }
    }

    pub fn from_json_opt(value: Option<&Value>) -> PackValue {
        value.map_or(PackValue::Undefined, |v| PackValue::from(v.clone()))
    }
}

impl From<Value> for PackValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => PackValue::Null,
            Value::Bool(b) => PackValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PackValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    PackValue::UInteger(u)
                } else {
                    PackValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => PackValue::Str(s),
            Value::Array(arr) => PackValue::Array(arr.into_iter().map(PackValue::from).collect()),
            Value::Object(obj) => {
                PackValue::Object(obj.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<PackValue> for Value {
    fn from(v: PackValue) -> Self {
        match v {
            PackValue::Null | PackValue::Undefined => Value::Null,
            PackValue::Bool(b) => Value::Bool(b),
            PackValue::Integer(i) => Value::from(i),
            PackValue::UInteger(u) => Value::from(u),
            PackValue::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            PackValue::Bytes(b) => Value::String(data_uri("application/octet-stream", &b)),
            PackValue::Str(s) => Value::String(s),
            PackValue::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            PackValue::Object(pairs) => {
                let mut map = Map::with_capacity(pairs.len());
                for (key, val) in pairs {
                    if let Some(val) = val.into_json() {
                        map.insert(key, val);
                    }
                }
                Value::Object(map)
            }
            PackValue::Extension(tag, data) => {
                Value::String(data_uri(&format!("application/x-msgpack-ext-{tag}"), &data))
            }
        }
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{b64}")
}
