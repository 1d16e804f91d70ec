//! # Core Types Crate
//!
//! The shared vocabulary of the custom data subsystem: dtypes, cell values and
//! missing-value sentinels, dataset schemas, query grids, dense column arrays,
//! and adjustment events.
//!
//! This is a pure crate with no I/O. The `database` and `loaders` crates build
//! on it.

pub mod array;
pub mod dataset;
pub mod enums;
pub mod error;
pub mod grid;
pub mod structs;
pub mod value;

// Re-export the core types to provide a clean public API.
pub use array::ColumnData;
pub use dataset::{
    define, validate_identifier, BoundColumn, Column, ColumnMetadata, Dataset, DatasetBuilder,
    DatasetOptions,
};
pub use enums::{AdjustmentKind, DType, DTypeSpec, Domain};
pub use error::CoreError;
pub use grid::{ensure_strictly_ascending, AssetId, QueryGrid};
pub use structs::{AdjustmentEvent, ColumnAdjustment};
pub use value::{
    format_date, format_datetime, parse_date, parse_datetime, MissingValue, Value, DATE_FORMAT,
    DATETIME_FORMAT,
};
