//! Turning nested JSON objects into flat rows.
use serde_json::{Map, Value as JsonValue};

use crate::row::{Row, Value};
use crate::topics::Schema;

pub const KEY_SEPARATOR: &str = "_";

/// Recursively merge nested objects into a single level, joining parent and child keys
/// with an underscore: `{"A": {"B": 1}}` becomes `{"A_B": 1}`.
///
/// Only objects are descended into. Arrays and scalars are leaves.
pub fn flatten(object: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    let mut flat = Map::new();
    flatten_into(&mut flat, None, object);
    flat
}

fn flatten_into(
    flat: &mut Map<String, JsonValue>,
    prefix: Option<&str>,
    object: &Map<String, JsonValue>,
) {
    for (key, value) in object {
        let joined = match prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{key}"),
            None => key.clone(),
        };

        match value {
            JsonValue::Object(nested) => flatten_into(flat, Some(&joined), nested),
            leaf => {
                flat.insert(joined, leaf.clone());
            }
        }
    }
}

/// Select the schema's columns, in schema order, out of a flat mapping.
/// Absent keys become nulls and keys outside the schema are dropped.
pub fn project(object: &Map<String, JsonValue>, schema: &Schema) -> Row {
    Row(schema
        .names()
        .map(|name| object.get(name).map(Value::from).unwrap_or(Value::Null))
        .collect())
}
