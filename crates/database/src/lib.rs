//! # Database Crate
//!
//! The durable time-series store. Each store is one SQLite file under a
//! catalog root, holding a metadata table (code, bar size, column dtypes,
//! creation time) and a data table keyed by `(date, asset_id)`.
//!
//! ## Architectural Principles
//!
//! - **One file per store:** `StoreCatalog` maps a store code to `<root>/<code>.db`.
//!   The root directory is always explicit.
//! - **Short-lived connections:** every operation opens its own `sqlx`
//!   connection and closes it before returning, on error paths too.
//! - **Atomic writes:** an insert runs in a single transaction. `update` mode is
//!   an `INSERT ... ON CONFLICT DO UPDATE` upsert.
//! - **Single writer:** no locking is done between writers and readers of the
//!   same file; callers serialize their writes.
//!
//! ## Public API
//!
//! - `StoreCatalog`: create, list, info, insert, query and drop stores.
//! - `InsertFrame` / `InsertMode` / `Record`: the input shapes `insert` accepts.
//! - `QueryFilter` / `QueryResult`: range filters and long-form output.
//! - `fetch_rows` / `RangeQuery`: the single ranged read used by loaders.
//! - `StoreError`: the specific error types that can be returned from this crate.

pub mod catalog;
pub mod connection;
pub mod error;
pub mod frame;
pub mod rows;
pub mod schema;

pub use catalog::{QueryFilter, StoreCatalog, StoreInfo};
pub use connection::{open, store_path, validate_code, OpenMode, STORE_EXTENSION};
pub use error::StoreError;
pub use frame::{InsertFrame, InsertMode, Record};
pub use rows::{fetch_rows, QueryResult, RangeQuery, StoreRow};
pub use schema::{data_table_columns, resolve_columns, StoreColumn, StoreSchema, RESERVED_COLUMNS};
