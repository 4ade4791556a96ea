//! The message type that crosses the producer/consumer boundary

use crate::{ChannelError, ChannelResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// An ordered mapping of string keys to JSON-serializable values.
///
/// Messages never carry live handles; anything a consumer needs must be
/// representable as plain data so the message can cross a process boundary.
/// Byte blobs are stored as base64 strings (see [`base64_bytes`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a message from a typed payload.
    ///
    /// The payload must serialize to a JSON object.
    pub fn from_payload<T: Serialize>(payload: &T) -> ChannelResult<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ChannelError::MalformedMessage(format!(
                "payload must serialize to an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Decode this message into a typed payload
    pub fn decode<T: DeserializeOwned>(&self) -> ChannelResult<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| ChannelError::MalformedMessage(e.to_string()))
    }

    /// Decode, consuming the message
    pub fn into_payload<T: DeserializeOwned>(self) -> ChannelResult<T> {
        serde_json::from_value(Value::Object(self.0))
            .map_err(|e| ChannelError::MalformedMessage(e.to_string()))
    }

    /// Insert a field (consuming)
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field, returning the previous value
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a JSON string (used by out-of-process backends)
    pub fn to_json(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse from a JSON string
    pub fn from_json(data: &str) -> ChannelResult<Self> {
        match serde_json::from_str::<Value>(data)
            .map_err(|e| ChannelError::MalformedMessage(e.to_string()))?
        {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ChannelError::MalformedMessage(format!(
                "expected a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Serde helper carrying `Vec<u8>` fields as base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Byte strings as latin-1 text: every byte maps to the char with the same
/// code point, so arbitrary header bytes survive a JSON hop unchanged.
pub mod latin1 {
    pub fn decode(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }

    /// Returns `None` if the string holds a char above U+00FF
    pub fn encode(text: &str) -> Option<Vec<u8>> {
        text.chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect()
    }
}
