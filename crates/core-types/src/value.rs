use crate::enums::DType;
use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The on-disk and wire format for dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// The on-disk and wire format for DateTime column values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single non-null cell value. Nulls are modelled as `Option<Value>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float64(f64),
    Int64(i64),
    Bool(bool),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::Float64(_) => DType::Float64,
            Value::Int64(_) => DType::Int64,
            Value::Bool(_) => DType::Bool,
            Value::Text(_) => DType::Text,
            Value::DateTime(_) => DType::DateTime,
        }
    }

    /// Converts the value to `dtype`. Only integer-to-float widening is
    /// performed; every other mismatch is an error.
    pub fn coerce(self, dtype: DType) -> Result<Value, CoreError> {
        match (self, dtype) {
            (value, target) if value.dtype() == target => Ok(value),
            (Value::Int64(v), DType::Float64) => Ok(Value::Float64(v as f64)),
            (value, target) => Err(CoreError::Configuration(format!(
                "Value {} of type {} does not match dtype {}",
                value,
                value.dtype(),
                target
            ))),
        }
    }

    /// Reads an untyped JSON value as a cell of `dtype`. JSON `null` is a missing cell.
    pub fn from_json(json: &JsonValue, dtype: DType) -> Result<Option<Value>, CoreError> {
        if json.is_null() {
            return Ok(None);
        }
        let mismatch = || {
            CoreError::Configuration(format!("JSON value {} is not a valid {}", json, dtype))
        };
        let value = match dtype {
            DType::Float64 => Value::Float64(json.as_f64().ok_or_else(mismatch)?),
            DType::Int64 => Value::Int64(json.as_i64().ok_or_else(mismatch)?),
            DType::Bool => Value::Bool(json.as_bool().ok_or_else(mismatch)?),
            DType::Text => Value::Text(json.as_str().ok_or_else(mismatch)?.to_string()),
            DType::DateTime => {
                let text = json.as_str().ok_or_else(mismatch)?;
                Value::DateTime(parse_datetime(text)?)
            }
        };
        Ok(Some(value))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Int64(v) => JsonValue::from(*v),
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::DateTime(v) => JsonValue::String(format_datetime(v)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::DateTime(v) => f.write_str(&format_datetime(v)),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

/// The sentinel a column writes wherever it has no value.
///
/// Integer columns have no native null, so their sentinel is always an
/// explicit integer. Text and DateTime columns may use `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MissingValue {
    Float64(f64),
    Int64(i64),
    Bool(bool),
    Text(Option<String>),
    DateTime(Option<NaiveDateTime>),
}

impl MissingValue {
    /// The sentinel used when a column declares none. `None` for Int64,
    /// which must always be explicit.
    pub fn default_for(dtype: DType) -> Option<MissingValue> {
        match dtype {
            DType::Float64 => Some(MissingValue::Float64(f64::NAN)),
            DType::Int64 => None,
            DType::Bool => Some(MissingValue::Bool(false)),
            DType::Text => Some(MissingValue::Text(None)),
            DType::DateTime => Some(MissingValue::DateTime(None)),
        }
    }

    /// Builds the sentinel for a `dtype` column from a caller-supplied value.
    pub fn from_value(value: Value, dtype: DType) -> Result<MissingValue, CoreError> {
        let sentinel = match value.coerce(dtype)? {
            Value::Float64(v) => MissingValue::Float64(v),
            Value::Int64(v) => MissingValue::Int64(v),
            Value::Bool(v) => MissingValue::Bool(v),
            Value::Text(v) => MissingValue::Text(Some(v)),
            Value::DateTime(v) => MissingValue::DateTime(Some(v)),
        };
        Ok(sentinel)
    }

    pub fn dtype(&self) -> DType {
        match self {
            MissingValue::Float64(_) => DType::Float64,
            MissingValue::Int64(_) => DType::Int64,
            MissingValue::Bool(_) => DType::Bool,
            MissingValue::Text(_) => DType::Text,
            MissingValue::DateTime(_) => DType::DateTime,
        }
    }

    /// The sentinel as a cell value, or `None` for the null-like sentinels.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            MissingValue::Float64(v) => Some(Value::Float64(*v)),
            MissingValue::Int64(v) => Some(Value::Int64(*v)),
            MissingValue::Bool(v) => Some(Value::Bool(*v)),
            MissingValue::Text(v) => v.clone().map(Value::Text),
            MissingValue::DateTime(v) => v.map(Value::DateTime),
        }
    }
}

// NaN sentinels compare equal to each other so that a column's missing value
// is always equal to itself.
impl PartialEq for MissingValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MissingValue::Float64(a), MissingValue::Float64(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (MissingValue::Int64(a), MissingValue::Int64(b)) => a == b,
            (MissingValue::Bool(a), MissingValue::Bool(b)) => a == b,
            (MissingValue::Text(a), MissingValue::Text(b)) => a == b,
            (MissingValue::DateTime(a), MissingValue::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MissingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_value() {
            Some(value) => write!(f, "{}", value),
            None => f.write_str("None"),
        }
    }
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(text: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| {
        CoreError::InvalidInput("date".to_string(), format!("'{}': {}", text, e))
    })
}

pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// Parses a timestamp in the storage format, falling back to RFC 3339 and
/// to a bare date (midnight).
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, CoreError> {
    if let Ok(value) = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        return Ok(value);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Ok(value.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(CoreError::InvalidInput(
        "datetime".to_string(),
        format!("'{}' is not a recognised timestamp", text),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widening_is_the_only_coercion() {
        assert_eq!(
            Value::Int64(3).coerce(DType::Float64).unwrap(),
            Value::Float64(3.0)
        );
        assert!(Value::Float64(3.5).coerce(DType::Int64).is_err());
        assert!(Value::Bool(true).coerce(DType::Int64).is_err());
        assert!(Value::from("x").coerce(DType::DateTime).is_err());
    }

    #[test]
    fn json_cells_follow_the_column_dtype() {
        assert_eq!(
            Value::from_json(&json!(2), DType::Float64).unwrap(),
            Some(Value::Float64(2.0))
        );
        assert_eq!(Value::from_json(&json!(null), DType::Int64).unwrap(), None);
        assert!(Value::from_json(&json!(2.5), DType::Int64).is_err());
        assert!(Value::from_json(&json!("yes"), DType::Bool).is_err());
        let ts = Value::from_json(&json!("2022-01-03T09:30:00"), DType::DateTime)
            .unwrap()
            .unwrap();
        assert_eq!(ts.to_json(), json!("2022-01-03T09:30:00"));
    }

    #[test]
    fn nan_sentinels_are_equal() {
        let a = MissingValue::default_for(DType::Float64).unwrap();
        let b = MissingValue::Float64(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(a, MissingValue::Float64(0.0));
    }

    #[test]
    fn integer_sentinel_has_no_default() {
        assert!(MissingValue::default_for(DType::Int64).is_none());
        assert_eq!(
            MissingValue::from_value(Value::Int64(-1), DType::Int64).unwrap(),
            MissingValue::Int64(-1)
        );
        assert!(MissingValue::from_value(Value::Float64(f64::NAN), DType::Int64).is_err());
    }

    #[test]
    fn datetime_parsing_fallbacks() {
        let midnight = parse_datetime("2022-01-03").unwrap();
        assert_eq!(format_datetime(&midnight), "2022-01-03T00:00:00");
        let utc = parse_datetime("2022-01-03T10:00:00+02:00").unwrap();
        assert_eq!(format_datetime(&utc), "2022-01-03T08:00:00");
        assert!(parse_datetime("not a time").is_err());
    }
}
