//! Per-topic extraction of rows from decoded feed messages.
//!
//! Every feed wraps its records differently. Each normalizer knows where the records
//! live in its topic's payload and how to turn one of them into a flat mapping, then
//! hands that mapping to [`project`] so the resulting rows always match the schema.
//!
//! A normalizer either accepts the whole message or rejects it with
//! [`MalformedMessage`]; it never returns rows for half a message.
use serde_json::{Map, Value as JsonValue};

use crate::error::MalformedMessage;
use crate::flatten::{flatten, project};
use crate::row::Row;
use crate::topics::Schema;

/// Column holding the message type key of train describer messages.
pub const TD_MESSAGE_COLUMN: &str = "MSG";

pub trait Normalizer: Send + Sync {
    fn normalize(&self, message: &JsonValue, schema: &Schema) -> Result<Vec<Row>, MalformedMessage>;
}

/// Decode a raw message body.
pub fn decode(body: &[u8]) -> Result<JsonValue, MalformedMessage> {
    Ok(serde_json::from_slice(body)?)
}

/// Train movement: a list of envelopes, each carrying the record in `body`.
pub struct MovementNormalizer;

impl Normalizer for MovementNormalizer {
    fn normalize(
        &self,
        message: &JsonValue,
        schema: &Schema,
    ) -> Result<Vec<Row>, MalformedMessage> {
        as_array(message, "movement message")?
            .iter()
            .map(|envelope| {
                let body = as_object(envelope, "movement envelope")?
                    .get("body")
                    .ok_or_else(|| MalformedMessage::MissingPath("body".to_owned()))?;
                Ok(project(as_object(body, "movement body")?, schema))
            })
            .collect()
    }
}

/// Public performance measure: one row per operator page entry, nested fields flattened.
pub struct PerformanceNormalizer;

const PPM_OPERATOR_PAGE: [&str; 3] = ["RTPPMDataMsgV1", "RTPPMData", "OperatorPage"];

impl Normalizer for PerformanceNormalizer {
    fn normalize(
        &self,
        message: &JsonValue,
        schema: &Schema,
    ) -> Result<Vec<Row>, MalformedMessage> {
        let page = at_path(message, &PPM_OPERATOR_PAGE)?;

        // A page holding a single operator is sent as an object instead of a list.
        let entries = match page {
            JsonValue::Array(entries) => entries.as_slice(),
            single => std::slice::from_ref(single),
        };

        entries
            .iter()
            .map(|entry| {
                let operator = as_object(entry, "operator page entry")?
                    .get("Operator")
                    .ok_or_else(|| MalformedMessage::MissingPath("Operator".to_owned()))?;
                Ok(project(&flatten(as_object(operator, "operator")?), schema))
            })
            .collect()
    }
}

/// Very short term planning: a single schedule projected as is.
pub struct PlanningNormalizer;

const VSTP_SCHEDULE: [&str; 2] = ["VSTPCIFMsgV1", "schedule"];

impl Normalizer for PlanningNormalizer {
    fn normalize(
        &self,
        message: &JsonValue,
        schema: &Schema,
    ) -> Result<Vec<Row>, MalformedMessage> {
        let schedule = at_path(message, &VSTP_SCHEDULE)?;
        Ok(vec![project(as_object(schedule, "schedule")?, schema)])
    }
}

/// Train describer: a list of `{"<message type>": {...}}` objects. The message type
/// is stored in the `MSG` column alongside the inner fields.
pub struct TrainDescriberNormalizer;

impl Normalizer for TrainDescriberNormalizer {
    fn normalize(
        &self,
        message: &JsonValue,
        schema: &Schema,
    ) -> Result<Vec<Row>, MalformedMessage> {
        as_array(message, "train describer message")?
            .iter()
            .map(|element| {
                let tagged = as_object(element, "train describer element")?;
                let mut entries = tagged.iter();
                let (Some((message_type, fields)), None) = (entries.next(), entries.next()) else {
                    return Err(MalformedMessage::UnexpectedShape(format!(
                        "train describer element has {} keys, expected exactly one",
                        tagged.len()
                    )));
                };

                let mut merged = as_object(fields, "train describer fields")?.clone();
                merged.insert(
                    TD_MESSAGE_COLUMN.to_owned(),
                    JsonValue::String(message_type.clone()),
                );
                Ok(project(&merged, schema))
            })
            .collect()
    }
}

fn at_path<'a>(message: &'a JsonValue, path: &[&str]) -> Result<&'a JsonValue, MalformedMessage> {
    path.iter()
        .try_fold(message, |value, key| value.get(key))
        .ok_or_else(|| MalformedMessage::MissingPath(path.join(".")))
}

fn as_object<'a>(
    value: &'a JsonValue,
    what: &str,
) -> Result<&'a Map<String, JsonValue>, MalformedMessage> {
    value.as_object().ok_or_else(|| {
        MalformedMessage::UnexpectedShape(format!("{what} is not an object: {}", kind(value)))
    })
}

fn as_array<'a>(value: &'a JsonValue, what: &str) -> Result<&'a Vec<JsonValue>, MalformedMessage> {
    value.as_array().ok_or_else(|| {
        MalformedMessage::UnexpectedShape(format!("{what} is not a list: {}", kind(value)))
    })
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}
