//! Lenient structural decoder for flattened Debezium records.
//!
//! The capture tool runs with the new-record-state unwrap, so each record value
//! is a flat JSON object: the row's columns plus `__`-prefixed metadata. The
//! decoder parses into a permissive map first and then projects only the keys
//! it knows about, so columns added upstream never break consumption.

use serde_json::{Map, Value};

use super::models::{Entity, Envelope, FieldMap};
use crate::error::DecodeError;

/// Operation marker (c/u/d/r)
pub const OP_FIELD: &str = "__op";
/// Source transaction timestamp in epoch millis
pub const TS_MS_FIELD: &str = "__ts_ms";
pub const SOURCE_DB_FIELD: &str = "__source_db";
pub const SOURCE_TABLE_FIELD: &str = "__source_table";

const SCHEMA_WRAPPER_FIELD: &str = "schema";
const PAYLOAD_WRAPPER_FIELD: &str = "payload";

/// Decode one record value into an envelope for entity `E`.
///
/// Fails only when the bytes are not JSON, or are JSON without key/value
/// structure. A well-formed object without a single recognized key decodes to
/// an envelope whose fields are all absent.
pub fn decode<E: Entity>(payload: &[u8]) -> Result<Envelope<E>, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    let object = into_record_object(value)?;
    let fields = FieldMap::new(&object);

    Ok(Envelope::new(
        E::from_fields(&fields),
        fields.get(OP_FIELD),
        fields.get_i64(TS_MS_FIELD),
        fields.get(SOURCE_DB_FIELD),
        fields.get(SOURCE_TABLE_FIELD),
    ))
}

/// Strip the converter's schema wrapper when present.
///
/// With `value.converter.schemas.enable = true` the record value is
/// `{"schema": {...}, "payload": {...}}`; otherwise it is the payload itself.
fn into_record_object(value: Value) -> Result<Map<String, Value>, DecodeError> {
    let mut object = match value {
        Value::Object(object) => object,
        other => return Err(DecodeError::NotAnObject(json_type_name(&other))),
    };

    if !(object.contains_key(SCHEMA_WRAPPER_FIELD) && object.contains_key(PAYLOAD_WRAPPER_FIELD)) {
        return Ok(object);
    }

    match object.remove(PAYLOAD_WRAPPER_FIELD) {
        Some(Value::Object(inner)) => Ok(inner),
        Some(Value::Null) | None => Ok(Map::new()),
        Some(other) => Err(DecodeError::NotAnObject(json_type_name(&other))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
