//! ParamSet: named input values extracted from a deep link or supplied by a caller.
//!
//! Values are stored JSON-shaped and coerced on read:
//!
//! | requested            | behaviour                                                   |
//! |----------------------|-------------------------------------------------------------|
//! | `String`             | strings pass through; numbers/bools render as text; objects and arrays render as compact JSON |
//! | integers, `f32/f64`  | parse the textual read, absent on failure (no trimming)     |
//! | `bool`               | `"true"` / `"false"`, case-insensitive, anything else absent |
//! | `Value`, `Json<T>`   | objects/arrays pass through; text must parse to an object or array, scalars read as absent |
//!
//! A stored `null` reads as absent for every type. Unsupported target types do
//! not implement [`FromParam`]; the dynamic [`ParamSet::get_typed`] read reports
//! them as [`FlowIntentError::UnsupportedType`].

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FlowIntentError;

/// A named bag of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    values: HashMap<String, Value>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a param set from every query parameter of `uri`.
    ///
    /// Values are inserted verbatim as strings. When a name repeats, the first
    /// occurrence wins.
    pub fn from_uri(uri: &str) -> Result<Self, FlowIntentError> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| FlowIntentError::InvalidUri(format!("'{}': {}", uri, e)))?;

        let mut params = ParamSet::new();
        for (key, value) in parsed.query_pairs() {
            if !params.contains_key(&key) {
                params.put(key.into_owned(), value.into_owned());
            }
        }
        tracing::debug!("[ParamSet] Parsed {} param(s) from deep link", params.len());
        Ok(params)
    }

    /// Insert or overwrite a value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(key, value);
        self
    }

    /// Read `key` coerced to `T`. Type mismatches read as `None`.
    pub fn get<T: FromParam>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(T::from_param)
    }

    /// Read `key` coerced to the type named by `type_name`.
    pub fn get_typed(&self, key: &str, type_name: &str) -> Result<Option<TypedValue>, FlowIntentError> {
        let kind = ParamKind::parse(type_name)
            .ok_or_else(|| FlowIntentError::unsupported_type(key, type_name))?;
        Ok(self.values.get(key).and_then(|v| kind.coerce(v)))
    }

    /// The stored value without coercion.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = ParamSet::new();
        for (k, v) in iter {
            params.put(k, v);
        }
        params
    }
}

/// Types a stored param can be coerced into.
pub trait FromParam: Sized {
    fn from_param(value: &Value) -> Option<Self>;
}

/// Textual read shared by every coercion.
pub(crate) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Parse `text` as a JSON object or array. Scalars such as `42` or `true` are rejected.
pub(crate) fn parse_structured(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn json_of(value: &Value) -> Option<Value> {
    match value {
        Value::Array(_) | Value::Object(_) => Some(value.clone()),
        Value::String(s) => parse_structured(s),
        _ => None,
    }
}

impl FromParam for String {
    fn from_param(value: &Value) -> Option<Self> {
        text_of(value)
    }
}

impl FromParam for bool {
    fn from_param(value: &Value) -> Option<Self> {
        match text_of(value)?.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

macro_rules! numeric_from_param {
    ($($t:ty),*) => {
        $(
            impl FromParam for $t {
                fn from_param(value: &Value) -> Option<Self> {
                    text_of(value)?.parse::<$t>().ok()
                }
            }
        )*
    };
}

numeric_from_param!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl FromParam for Value {
    fn from_param(value: &Value) -> Option<Self> {
        json_of(value)
    }
}

/// Structured read decoded into any deserializable type.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromParam for Json<T> {
    fn from_param(value: &Value) -> Option<Self> {
        json_of(value)
            .and_then(|v| serde_json::from_value(v).ok())
            .map(Json)
    }
}

/// Type names accepted by [`ParamSet::get_typed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    Float,
    Bool,
    Json,
}

impl ParamKind {
    pub fn parse(type_name: &str) -> Option<Self> {
        match type_name.to_lowercase().as_str() {
            "string" | "str" => Some(Self::String),
            "int" | "integer" | "long" => Some(Self::Int),
            "float" | "double" | "number" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "json" | "object" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Json => "json",
        }
    }

    pub fn coerce(&self, value: &Value) -> Option<TypedValue> {
        match self {
            Self::String => String::from_param(value).map(TypedValue::String),
            Self::Int => i64::from_param(value).map(TypedValue::Int),
            Self::Float => f64::from_param(value).map(TypedValue::Float),
            Self::Bool => bool::from_param(value).map(TypedValue::Bool),
            Self::Json => Value::from_param(value).map(TypedValue::Json),
        }
    }
}

/// Result of a dynamic typed read.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
}
