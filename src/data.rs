//! Uniform parameter and result containers crossing every function boundary
//!
//! `AgentData` is the map-of-tagged-values type that carries function
//! parameters, function results, message payloads, and working-memory
//! context. Modeling the value as a sum type keeps the parameter-validation
//! layer a simple dispatch on the discriminator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single tagged value inside an [`AgentData`] map
///
/// The untagged serde representation maps directly onto JSON, so API
/// payloads and stored memories round-trip without a wrapper layer.
/// Variant order matters for deserialization: `Bool` must precede the
/// numeric variants, and `Int` must precede `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentDataValue {
    /// Absent / null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Array of strings
    Array(Vec<String>),
    /// Nested object
    Object(AgentData),
}

impl AgentDataValue {
    /// Human-readable tag for validation error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Returns the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns a float, coercing from int
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string-array payload, if this is an array
    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the nested object, if this is an object
    pub fn as_object(&self) -> Option<&AgentData> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl Default for AgentDataValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for AgentDataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AgentDataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for AgentDataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AgentDataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AgentDataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for AgentDataValue {
    fn from(v: Vec<String>) -> Self {
        Self::Array(v)
    }
}

impl From<AgentData> for AgentDataValue {
    fn from(v: AgentData) -> Self {
        Self::Object(v)
    }
}

/// Ordered string-keyed map of [`AgentDataValue`]s
///
/// The uniform container for function parameters and results, message
/// payloads, and working-memory context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentData {
    entries: BTreeMap<String, AgentDataValue>,
}

impl AgentData {
    /// Creates an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under `key`, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AgentDataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert for test and call-site ergonomics
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AgentDataValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Looks up a raw value
    pub fn get(&self, key: &str) -> Option<&AgentDataValue> {
        self.entries.get(key)
    }

    /// Looks up a string value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AgentDataValue::as_str)
    }

    /// Looks up an integer value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AgentDataValue::as_int)
    }

    /// Looks up a float value, coercing from int
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AgentDataValue::as_float)
    }

    /// Looks up a boolean value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(AgentDataValue::as_bool)
    }

    /// Looks up a string-array value
    pub fn get_array(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(AgentDataValue::as_array)
    }

    /// Looks up a nested object
    pub fn get_object(&self, key: &str) -> Option<&AgentData> {
        self.get(key).and_then(AgentDataValue::as_object)
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a value, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<AgentDataValue> {
        self.entries.remove(key)
    }

    /// All keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentDataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(String, AgentDataValue)> for AgentData {
    fn from_iter<T: IntoIterator<Item = (String, AgentDataValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a function invocation
///
/// Functions always return a `FunctionResult`; failures are carried in
/// `success`/`error_message` rather than thrown past the registry boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    /// Whether the invocation succeeded
    pub success: bool,
    /// Failure description when `success` is false, empty otherwise
    pub error_message: String,
    /// Payload produced by the function
    pub result_data: AgentDataValue,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
}

impl FunctionResult {
    /// Builds a successful result with the given payload
    pub fn ok(result_data: impl Into<AgentDataValue>) -> Self {
        Self {
            success: true,
            error_message: String::new(),
            result_data: result_data.into(),
            execution_time_ms: 0,
        }
    }

    /// Builds a failed result with the given message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            result_data: AgentDataValue::Null,
            execution_time_ms: 0,
        }
    }

    /// Stamps the measured execution time
    #[must_use]
    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_dispatch_on_the_discriminator() {
        let mut data = AgentData::new();
        data.set("text", "hello");
        data.set("count", 3);
        data.set("ratio", 0.5);
        data.set("flag", true);
        data.set("items", vec!["a".to_string(), "b".to_string()]);

        assert_eq!(data.get_string("text"), Some("hello"));
        assert_eq!(data.get_int("count"), Some(3));
        assert_eq!(data.get_float("ratio"), Some(0.5));
        assert_eq!(data.get_bool("flag"), Some(true));
        assert_eq!(data.get_array("items").map(<[String]>::len), Some(2));
        assert_eq!(data.get_string("count"), None);
        assert!(data.get("missing").is_none());
    }

    #[test]
    fn ints_coerce_to_float_but_not_the_reverse() {
        let data = AgentData::new().with("n", 7);
        assert_eq!(data.get_float("n"), Some(7.0));
        let data = AgentData::new().with("f", 7.5);
        assert_eq!(data.get_int("f"), None);
    }

    #[test]
    fn json_round_trip_preserves_tags() {
        let nested = AgentData::new().with("inner", "value");
        let data = AgentData::new()
            .with("s", "text")
            .with("i", 42)
            .with("f", 1.25)
            .with("b", false)
            .with("arr", vec!["x".to_string()])
            .with("obj", nested);

        let json = serde_json::to_string(&data).unwrap();
        let back: AgentData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
        assert_eq!(back.get("i").unwrap().type_name(), "int");
        assert_eq!(back.get("f").unwrap().type_name(), "float");
    }

    #[test]
    fn empty_agent_data_serializes_to_empty_object() {
        let json = serde_json::to_string(&AgentData::new()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn function_result_constructors() {
        let ok = FunctionResult::ok("done").with_execution_time(12);
        assert!(ok.success);
        assert_eq!(ok.execution_time_ms, 12);

        let err = FunctionResult::error("missing parameter 'y'");
        assert!(!err.success);
        assert_eq!(err.result_data, AgentDataValue::Null);
        assert!(err.error_message.contains('y'));
    }
}
