use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of column types a dataset may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float64,
    Int64,
    Bool,
    Text,
    DateTime,
}

/// Every accepted spelling of a dtype. Anything not listed here is rejected.
const DTYPE_NAMES: &[(&str, DType)] = &[
    ("float", DType::Float64),
    ("float64", DType::Float64),
    ("int", DType::Int64),
    ("int64", DType::Int64),
    ("bool", DType::Bool),
    ("boolean", DType::Bool),
    ("str", DType::Text),
    ("string", DType::Text),
    ("text", DType::Text),
    ("object", DType::Text),
    ("datetime", DType::DateTime),
    ("datetime64", DType::DateTime),
    ("datetime64[ns]", DType::DateTime),
];

impl DType {
    /// The canonical name, as written to store metadata.
    pub fn name(&self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Int64 => "int64",
            DType::Bool => "bool",
            DType::Text => "text",
            DType::DateTime => "datetime",
        }
    }

    /// The SQLite storage class used for this dtype.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DType::Float64 => "REAL",
            DType::Int64 | DType::Bool => "INTEGER",
            DType::Text | DType::DateTime => "TEXT",
        }
    }

    /// All accepted dtype spellings, sorted, for error messages.
    pub fn accepted_names() -> Vec<&'static str> {
        let mut names: Vec<_> = DTYPE_NAMES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DTYPE_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, dtype)| *dtype)
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "Unknown dtype specification: '{}'. Valid specifications are: {}",
                    s,
                    DType::accepted_names().join(", ")
                ))
            })
    }
}

/// A dtype as a caller may write it: either the tag itself or one of its names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DTypeSpec {
    Tag(DType),
    Name(String),
}

impl DTypeSpec {
    pub fn resolve(&self) -> Result<DType, CoreError> {
        match self {
            DTypeSpec::Tag(dtype) => Ok(*dtype),
            DTypeSpec::Name(name) => name.parse(),
        }
    }
}

impl From<DType> for DTypeSpec {
    fn from(dtype: DType) -> Self {
        DTypeSpec::Tag(dtype)
    }
}

impl From<&str> for DTypeSpec {
    fn from(name: &str) -> Self {
        DTypeSpec::Name(name.to_string())
    }
}

impl From<String> for DTypeSpec {
    fn from(name: String) -> Self {
        DTypeSpec::Name(name)
    }
}

/// The domain a dataset is specialized to. `Generic` works with any calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Domain {
    #[default]
    Generic,
    Calendar {
        country_code: String,
        calendar: String,
    },
}

impl Domain {
    pub fn calendar(country_code: &str, calendar: &str) -> Self {
        Domain::Calendar {
            country_code: country_code.to_string(),
            calendar: calendar.to_string(),
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Domain::Generic)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Generic => f.write_str("GENERIC"),
            Domain::Calendar {
                country_code,
                calendar,
            } => write!(f, "{}/{}", country_code, calendar),
        }
    }
}

/// How an adjustment rewrites the values it covers.
///
/// Serialized as its integer code, the form adjustment tables carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum AdjustmentKind {
    Multiply,
    Add,
    Overwrite,
}

impl AdjustmentKind {
    /// The integer code used in adjustment tables (0 multiply, 1 add, 2 overwrite).
    pub fn code(&self) -> i64 {
        match self {
            AdjustmentKind::Multiply => 0,
            AdjustmentKind::Add => 1,
            AdjustmentKind::Overwrite => 2,
        }
    }

    /// Multiply and Add are arithmetic and only make sense on float columns.
    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, AdjustmentKind::Overwrite)
    }
}

impl TryFrom<i64> for AdjustmentKind {
    type Error = CoreError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(AdjustmentKind::Multiply),
            1 => Ok(AdjustmentKind::Add),
            2 => Ok(AdjustmentKind::Overwrite),
            other => Err(CoreError::Configuration(format!(
                "Unknown adjustment kind code: {}",
                other
            ))),
        }
    }
}

impl From<AdjustmentKind> for i64 {
    fn from(kind: AdjustmentKind) -> Self {
        kind.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_alias() {
        assert_eq!("float".parse::<DType>().unwrap(), DType::Float64);
        assert_eq!("int64".parse::<DType>().unwrap(), DType::Int64);
        assert_eq!("boolean".parse::<DType>().unwrap(), DType::Bool);
        assert_eq!("object".parse::<DType>().unwrap(), DType::Text);
        assert_eq!("datetime64[ns]".parse::<DType>().unwrap(), DType::DateTime);
        assert_eq!(
            DTypeSpec::from(DType::Bool).resolve().unwrap(),
            DType::Bool
        );
    }

    #[test]
    fn rejects_unknown_spelling() {
        let err = "complex128".parse::<DType>().unwrap_err();
        match err {
            CoreError::Configuration(msg) => {
                assert!(msg.contains("Unknown dtype specification"));
                assert!(msg.contains("float64"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Names are matched exactly, never coerced.
        assert!("Float".parse::<DType>().is_err());
    }

    #[test]
    fn canonical_names_round_trip() {
        for dtype in [
            DType::Float64,
            DType::Int64,
            DType::Bool,
            DType::Text,
            DType::DateTime,
        ] {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
    }

    #[test]
    fn adjustment_kind_codes() {
        assert_eq!(AdjustmentKind::try_from(0).unwrap(), AdjustmentKind::Multiply);
        assert_eq!(AdjustmentKind::Overwrite.code(), 2);
        assert!(AdjustmentKind::try_from(7).is_err());
        assert!(!AdjustmentKind::Overwrite.is_arithmetic());
    }
}
