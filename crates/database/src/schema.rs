use crate::error::{StoreError, StoreResultExt};
use chrono::{DateTime, Utc};
use core_types::{validate_identifier, DType, DTypeSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row};
use std::collections::{HashMap, HashSet};

pub const DATA_TABLE: &str = "data";
pub const METADATA_TABLE: &str = "metadata";

/// Key columns and bookkeeping columns every data table carries.
pub const RESERVED_COLUMNS: [&str; 3] = ["date", "asset_id", "inserted_at"];

/// A declared store column and its dtype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreColumn {
    pub name: String,
    pub dtype: DType,
}

/// The metadata persisted alongside a store's data table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub code: String,
    pub bar_size: String,
    pub columns: Vec<StoreColumn>,
    pub created_at: DateTime<Utc>,
}

impl StoreSchema {
    pub fn new(code: &str, columns: Vec<StoreColumn>, bar_size: &str) -> Self {
        Self {
            code: code.to_string(),
            bar_size: bar_size.to_string(),
            columns,
            created_at: Utc::now(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&StoreColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// The named columns in the requested order, or every column for `None`.
    pub fn select(&self, names: Option<&[String]>) -> Result<Vec<StoreColumn>, StoreError> {
        let Some(names) = names else {
            return Ok(self.columns.clone());
        };
        names
            .iter()
            .map(|name| {
                self.column(name).cloned().ok_or_else(|| {
                    StoreError::Configuration(format!(
                        "Store '{}' has no column '{}'. Available columns: {}",
                        self.code,
                        name,
                        self.column_names().join(", ")
                    ))
                })
            })
            .collect()
    }

    /// Creates the metadata and data tables in one transaction.
    pub(crate) async fn write(&self, conn: &mut SqliteConnection) -> Result<(), StoreError> {
        let mut tx = conn.begin().await.context("starting schema transaction")?;

        sqlx::query(&format!(
            "CREATE TABLE {} (key TEXT PRIMARY KEY, value TEXT)",
            METADATA_TABLE
        ))
        .execute(&mut *tx)
        .await
        .context("creating metadata table")?;

        let column_map: Map<String, JsonValue> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), JsonValue::String(c.dtype.name().to_string())))
            .collect();
        let entries = [
            ("code", self.code.clone()),
            ("bar_size", self.bar_size.clone()),
            ("columns", serde_json::to_string(&column_map)?),
            ("created_at", self.created_at.to_rfc3339()),
        ];
        for (key, value) in entries {
            sqlx::query(&format!(
                "INSERT INTO {} (key, value) VALUES (?, ?)",
                METADATA_TABLE
            ))
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .context("writing store metadata")?;
        }

        let mut column_defs = vec![
            "date TEXT NOT NULL".to_string(),
            "asset_id INTEGER NOT NULL".to_string(),
            "inserted_at TEXT".to_string(),
        ];
        column_defs.extend(
            self.columns
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.dtype.sql_type())),
        );
        sqlx::query(&format!(
            "CREATE TABLE {} ({}, PRIMARY KEY (date, asset_id))",
            DATA_TABLE,
            column_defs.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .context("creating data table")?;

        sqlx::query(&format!("CREATE INDEX idx_date ON {}(date)", DATA_TABLE))
            .execute(&mut *tx)
            .await
            .context("creating date index")?;
        sqlx::query(&format!("CREATE INDEX idx_asset_id ON {}(asset_id)", DATA_TABLE))
            .execute(&mut *tx)
            .await
            .context("creating asset index")?;

        tx.commit().await.context("committing store schema")?;
        Ok(())
    }

    /// Reads the schema back from the metadata table.
    pub(crate) async fn read(conn: &mut SqliteConnection) -> Result<Self, StoreError> {
        let rows = sqlx::query(&format!("SELECT key, value FROM {}", METADATA_TABLE))
            .fetch_all(&mut *conn)
            .await
            .context("reading store metadata")?;

        let mut entries = HashMap::new();
        for row in rows {
            let key: String = row.try_get("key").context("decoding metadata key")?;
            let value: Option<String> = row.try_get("value").context("decoding metadata value")?;
            if let Some(value) = value {
                entries.insert(key, value);
            }
        }

        let code = entries
            .remove("code")
            .ok_or_else(|| StoreError::CorruptMetadata("missing 'code' entry".to_string()))?;
        let bar_size = entries
            .remove("bar_size")
            .unwrap_or_else(|| "unknown".to_string());

        let raw_columns = entries
            .remove("columns")
            .ok_or_else(|| StoreError::CorruptMetadata("missing 'columns' entry".to_string()))?;
        let column_map: Map<String, JsonValue> = serde_json::from_str(&raw_columns)?;
        let mut columns = Vec::with_capacity(column_map.len());
        for (name, dtype) in column_map {
            let dtype = dtype
                .as_str()
                .ok_or_else(|| {
                    StoreError::CorruptMetadata(format!("dtype of column '{}' is not a string", name))
                })?
                .parse::<DType>()
                .map_err(|e| StoreError::CorruptMetadata(e.to_string()))?;
            columns.push(StoreColumn { name, dtype });
        }

        let created_at = entries
            .remove("created_at")
            .ok_or_else(|| StoreError::CorruptMetadata("missing 'created_at' entry".to_string()))
            .and_then(|text| {
                DateTime::parse_from_rfc3339(&text)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| StoreError::CorruptMetadata(format!("created_at '{}': {}", text, e)))
            })?;

        Ok(Self {
            code,
            bar_size,
            columns,
            created_at,
        })
    }
}

/// Validates column names and resolves their dtypes, keeping declaration order.
pub fn resolve_columns<N, S>(
    columns: impl IntoIterator<Item = (N, S)>,
) -> Result<Vec<StoreColumn>, StoreError>
where
    N: Into<String>,
    S: Into<DTypeSpec>,
{
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for (name, spec) in columns {
        let name = name.into();
        validate_identifier(&name)?;
        if RESERVED_COLUMNS.contains(&name.as_str()) {
            return Err(StoreError::Configuration(format!(
                "Column name '{}' is reserved",
                name
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(StoreError::Configuration(format!(
                "Column '{}' is declared more than once",
                name
            )));
        }
        let dtype = spec.into().resolve()?;
        resolved.push(StoreColumn { name, dtype });
    }
    if resolved.is_empty() {
        return Err(StoreError::Configuration(
            "A store needs at least one column".to_string(),
        ));
    }
    Ok(resolved)
}

/// The column names of the data table, or `None` when there is no data table.
pub async fn data_table_columns(
    conn: &mut SqliteConnection,
) -> Result<Option<Vec<String>>, StoreError> {
    let table = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(DATA_TABLE)
        .fetch_optional(&mut *conn)
        .await
        .context("looking up the data table")?;
    if table.is_none() {
        return Ok(None);
    }

    let rows = sqlx::query(&format!("PRAGMA table_info({})", DATA_TABLE))
        .fetch_all(&mut *conn)
        .await
        .context("reading data table layout")?;
    let names = rows
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<Vec<_>, _>>()
        .context("decoding data table layout")?;
    Ok(Some(names))
}

/// Quotes an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
