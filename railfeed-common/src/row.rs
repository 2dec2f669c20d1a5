use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;

/// A single primitive value as stored in a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&JsonValue> for Value {
    /// Scalars map onto their natural storage class. Arrays and objects are kept
    /// opaque as their compact JSON text. Unsigned integers beyond `i64::MAX` are kept
    /// as their decimal text so no digits are lost.
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None if n.is_u64() => Value::Text(n.to_string()),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// One record, positionally aligned to a schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from(&json!(null)), Value::Null);
        assert_eq!(Value::from(&json!(true)), Value::Integer(1));
        assert_eq!(Value::from(&json!(42)), Value::Integer(42));
        assert_eq!(Value::from(&json!(1.5)), Value::Real(1.5));
        assert_eq!(Value::from(&json!("4")), Value::Text("4".to_owned()));
        assert_eq!(
            Value::from(&json!(["a", 1])),
            Value::Text("[\"a\",1]".to_owned())
        );
    }

    #[test]
    fn test_row_serializes_as_array() {
        let row = Row(vec![Value::from("ARRIVAL"), Value::Null, Value::Integer(4)]);
        assert_eq!(serde_json::to_string(&row).unwrap(), "[\"ARRIVAL\",null,4]");
    }

    #[test]
    fn test_value_from_json_keeps_large_unsigned_digits() {
        assert_eq!(
            Value::from(&json!(i64::MAX)),
            Value::Integer(9_223_372_036_854_775_807)
        );
        assert_eq!(
            Value::from(&json!(u64::MAX)),
            Value::Text("18446744073709551615".to_owned())
        );
        assert_eq!(Value::from(&json!(-1.0e30)), Value::Real(-1.0e30));
    }
}
