use super::{DataType, PropertyValue};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Raw value could not be parsed as its declared data type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert '{raw}' to {data_type}: {reason}")]
pub struct ConversionError {
    pub data_type: DataType,
    pub raw: String,
    pub reason: String,
}

impl ConversionError {
    fn new(data_type: DataType, raw: &str, reason: impl ToString) -> Self {
        Self {
            data_type,
            raw: raw.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parses a persisted or tag-supplied value string into a typed value.
///
/// Rules:
/// - STRING: taken verbatim
/// - INT / FLOAT: surrounding whitespace ignored
/// - BOOL: 1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False
/// - DATETIME: RFC 3339, or integer Unix epoch milliseconds
pub fn convert_property_value(data_type: DataType, raw: &str) -> Result<PropertyValue, ConversionError> {
    match data_type {
        DataType::String => Ok(PropertyValue::String(raw.to_string())),
        DataType::Int => raw
            .trim()
            .parse::<i64>()
            .map(PropertyValue::Int)
            .map_err(|e| ConversionError::new(data_type, raw, e)),
        DataType::Float => raw
            .trim()
            .parse::<f64>()
            .map(PropertyValue::Float)
            .map_err(|e| ConversionError::new(data_type, raw, e)),
        DataType::Bool => parse_bool(raw.trim())
            .map(PropertyValue::Bool)
            .ok_or_else(|| ConversionError::new(data_type, raw, "not a boolean literal")),
        DataType::DateTime => parse_timestamp(raw.trim())
            .map(PropertyValue::DateTime)
            .ok_or_else(|| {
                ConversionError::new(data_type, raw, "expected RFC 3339 or epoch milliseconds")
            }),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let millis = s.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
