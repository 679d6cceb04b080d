use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Loosely typed user input handed to the uniform inferencer.
///
/// Mirrors the shape of JSON so values can come straight from config files or
/// the command line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<UniformValue>),
    Record(BTreeMap<String, UniformValue>),
}

impl UniformValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            UniformValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            UniformValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, UniformValue::Number(_))
    }
}

impl From<f64> for UniformValue {
    fn from(value: f64) -> Self {
        UniformValue::Number(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Number(f64::from(value))
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Number(f64::from(value))
    }
}

impl From<u32> for UniformValue {
    fn from(value: u32) -> Self {
        UniformValue::Number(f64::from(value))
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<&str> for UniformValue {
    fn from(value: &str) -> Self {
        UniformValue::Text(value.to_owned())
    }
}

impl From<String> for UniformValue {
    fn from(value: String) -> Self {
        UniformValue::Text(value)
    }
}

impl<T: Into<UniformValue>> From<Vec<T>> for UniformValue {
    fn from(values: Vec<T>) -> Self {
        UniformValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<const N: usize> From<[f32; N]> for UniformValue {
    fn from(values: [f32; N]) -> Self {
        UniformValue::List(values.into_iter().map(UniformValue::from).collect())
    }
}

impl From<serde_json::Value> for UniformValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => UniformValue::Null,
            serde_json::Value::Bool(flag) => UniformValue::Bool(flag),
            serde_json::Value::Number(number) => {
                number.as_f64().map_or(UniformValue::Null, UniformValue::Number)
            }
            serde_json::Value::String(text) => UniformValue::Text(text),
            serde_json::Value::Array(items) => {
                UniformValue::List(items.into_iter().map(UniformValue::from).collect())
            }
            serde_json::Value::Object(fields) => UniformValue::Record(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, UniformValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl<K: Into<String>, V: Into<UniformValue>> FromIterator<(K, V)> for UniformValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        UniformValue::Record(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
