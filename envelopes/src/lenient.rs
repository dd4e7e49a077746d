//! Deserializers that accept ids as either JSON strings or integers.

use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(&value).ok_or_else(|| D::Error::custom(format!("expected string or number, got {value}")))
}

pub(crate) fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value_to_string(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected string or number, got {value}"))),
    }
}

pub(crate) fn string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(values) = Option::<Vec<Value>>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    values
        .iter()
        .map(|value| {
            value_to_string(value).ok_or_else(|| D::Error::custom(format!("expected string or number, got {value}")))
        })
        .collect()
}
