use crate::connection::{self, OpenMode, STORE_EXTENSION};
use crate::error::{StoreError, StoreResultExt};
use crate::frame::{InsertFrame, InsertMode, WriteRow};
use crate::rows::{fetch_rows, QueryResult, RangeQuery};
use crate::schema::{quote_ident, resolve_columns, StoreColumn, StoreSchema, DATA_TABLE};
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{format_date, format_datetime, AssetId, DTypeSpec, Value};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::query::Query;
use sqlx::{Connection, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary of one store, as reported by `list` and `info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub code: String,
    pub path: PathBuf,
    pub bar_size: String,
    pub columns: Vec<StoreColumn>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub row_count: u64,
}

/// Filters for `query`. Every bound is inclusive and every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub asset_ids: Option<Vec<AssetId>>,
    pub columns: Option<Vec<String>>,
}

impl QueryFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Self::default()
        }
    }

    pub fn assets(mut self, asset_ids: impl IntoIterator<Item = AssetId>) -> Self {
        self.asset_ids = Some(asset_ids.into_iter().collect());
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// The directory holding every store, one SQLite file per store code.
///
/// All store management goes through a catalog; the root directory is always
/// given explicitly.
#[derive(Debug, Clone)]
pub struct StoreCatalog {
    root: PathBuf,
}

impl StoreCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, code: &str) -> PathBuf {
        connection::store_path(&self.root, code)
    }

    pub fn exists(&self, code: &str) -> bool {
        self.path_of(code).is_file()
    }

    /// Opens a connection to an existing store.
    pub async fn connect(&self, code: &str, mode: OpenMode) -> Result<SqliteConnection, StoreError> {
        let path = self.existing_path(code)?;
        connection::open(&path, mode).await
    }

    /// Creates an empty store and returns its file path.
    ///
    /// The code and every column are validated before anything touches disk.
    /// If writing the schema fails, the partial file is removed.
    pub async fn create<N, S>(
        &self,
        code: &str,
        columns: impl IntoIterator<Item = (N, S)>,
        bar_size: &str,
    ) -> Result<PathBuf, StoreError>
    where
        N: Into<String>,
        S: Into<DTypeSpec>,
    {
        connection::validate_code(code)?;
        let columns = resolve_columns(columns)?;

        let path = self.path_of(code);
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                code: code.to_string(),
                path: path.display().to_string(),
            });
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .context("creating the store directory")?;

        let schema = StoreSchema::new(code, columns, bar_size);
        if let Err(e) = write_new_store(&path, &schema).await {
            remove_store_files(&path).await;
            return Err(e);
        }

        info!(
            code,
            path = %path.display(),
            columns = schema.columns.len(),
            "Created custom data store."
        );
        Ok(path)
    }

    /// Reads the persisted schema of a store.
    pub async fn schema(&self, code: &str) -> Result<StoreSchema, StoreError> {
        let mut conn = self.connect(code, OpenMode::ReadOnly).await?;
        let schema = StoreSchema::read(&mut conn).await;
        close(conn).await;
        schema
    }

    /// All readable stores under the root, sorted by code. Files that cannot
    /// be read as stores are skipped.
    pub async fn list(&self) -> Result<Vec<StoreInfo>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    context: format!("listing {}", self.root.display()),
                    source: e,
                });
            }
        };

        let mut stores = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("listing the store directory")?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                continue;
            }
            match read_info(&path).await {
                Ok(info) => stores.push(info),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable store file."),
            }
        }
        stores.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(stores)
    }

    pub async fn info(&self, code: &str) -> Result<StoreInfo, StoreError> {
        let path = self.existing_path(code)?;
        read_info(&path).await
    }

    /// Writes `frame` into the store and returns the number of rows written.
    ///
    /// The whole write runs in one transaction; on any error nothing is kept.
    pub async fn insert(
        &self,
        code: &str,
        frame: &InsertFrame,
        mode: InsertMode,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connect(code, OpenMode::ReadWrite).await?;
        let result = insert_with(&mut conn, frame, mode).await;
        close(conn).await;

        let written = result?;
        info!(code, %mode, rows = written, "Inserted rows into custom data store.");
        Ok(written)
    }

    /// Long-form rows matching `filter`, ordered by (date, asset_id).
    pub async fn query(&self, code: &str, filter: &QueryFilter) -> Result<QueryResult, StoreError> {
        let mut conn = self.connect(code, OpenMode::ReadOnly).await?;
        let result = query_with(&mut conn, filter).await;
        close(conn).await;

        let result = result?;
        debug!(code, rows = result.len(), "Queried custom data store.");
        Ok(result)
    }

    /// Deletes the store file.
    pub async fn drop_store(&self, code: &str) -> Result<(), StoreError> {
        let path = self.existing_path(code)?;
        tokio::fs::remove_file(&path)
            .await
            .context(&format!("removing {}", path.display()))?;
        remove_store_files(&path).await;
        info!(code, path = %path.display(), "Dropped custom data store.");
        Ok(())
    }

    fn existing_path(&self, code: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_of(code);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::NotFound(code.to_string()))
        }
    }
}

async fn write_new_store(path: &Path, schema: &StoreSchema) -> Result<(), StoreError> {
    let mut conn = connection::open(path, OpenMode::Create).await?;
    let result = schema.write(&mut conn).await;
    close(conn).await;
    result
}

async fn read_info(path: &Path) -> Result<StoreInfo, StoreError> {
    let mut conn = connection::open(path, OpenMode::ReadOnly).await?;
    let result = read_schema_and_count(&mut conn).await;
    close(conn).await;
    let (schema, row_count) = result?;

    let size_bytes = tokio::fs::metadata(path)
        .await
        .context(&format!("reading size of {}", path.display()))?
        .len();
    Ok(StoreInfo {
        code: schema.code,
        path: path.to_path_buf(),
        bar_size: schema.bar_size,
        columns: schema.columns,
        created_at: schema.created_at,
        size_bytes,
        row_count,
    })
}

async fn read_schema_and_count(conn: &mut SqliteConnection) -> Result<(StoreSchema, u64), StoreError> {
    let schema = StoreSchema::read(conn).await?;
    let count: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM {}", DATA_TABLE))
        .fetch_one(&mut *conn)
        .await
        .context("counting rows")?
        .try_get(0)
        .context("decoding row count")?;
    Ok((schema, count.max(0) as u64))
}

async fn insert_with(
    conn: &mut SqliteConnection,
    frame: &InsertFrame,
    mode: InsertMode,
) -> Result<u64, StoreError> {
    let schema = StoreSchema::read(conn).await?;
    let rows = frame.to_rows(&schema)?;
    debug!(code = %schema.code, %mode, rows = rows.len(), "Prepared rows for insert.");

    let mut tx = conn.begin().await.context("starting insert transaction")?;
    match write_rows(&mut *tx, &schema, &rows, mode).await {
        Ok(written) => {
            tx.commit().await.context("committing insert")?;
            Ok(written)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rolling back a failed insert also failed.");
            }
            Err(e)
        }
    }
}

async fn write_rows(
    conn: &mut SqliteConnection,
    schema: &StoreSchema,
    rows: &[WriteRow],
    mode: InsertMode,
) -> Result<u64, StoreError> {
    if mode == InsertMode::Replace {
        sqlx::query(&format!("DELETE FROM {}", DATA_TABLE))
            .execute(&mut *conn)
            .await
            .context("clearing rows for replace")?;
    }

    let sql = insert_sql(schema, mode);
    let inserted_at = format_datetime(&Utc::now().naive_utc());
    let mut written = 0;
    for row in rows {
        let mut query = sqlx::query(&sql)
            .bind(format_date(&row.date))
            .bind(row.asset_id)
            .bind(inserted_at.clone());
        for cell in &row.values {
            query = bind_cell(query, cell.as_ref());
        }

        match query.execute(&mut *conn).await {
            Ok(done) => written += done.rows_affected(),
            Err(sqlx::Error::Database(db))
                if mode == InsertMode::Append && is_unique_violation(db.as_ref()) =>
            {
                return Err(StoreError::Conflict(format!(
                    "date {}, asset {}",
                    format_date(&row.date),
                    row.asset_id
                )));
            }
            Err(e) => {
                return Err(StoreError::Storage {
                    context: "inserting rows".to_string(),
                    source: e,
                });
            }
        }
    }
    Ok(written)
}

fn insert_sql(schema: &StoreSchema, mode: InsertMode) -> String {
    let mut names = vec!["date".to_string(), "asset_id".to_string(), "inserted_at".to_string()];
    names.extend(schema.columns.iter().map(|c| quote_ident(&c.name)));
    let slots = vec!["?"; names.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        DATA_TABLE,
        names.join(", "),
        slots
    );
    if mode == InsertMode::Update {
        // Every non-key column is overwritten, so fields missing from the new
        // row become NULL.
        let updates = names[2..]
            .iter()
            .map(|name| format!("{} = excluded.{}", name, name))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " ON CONFLICT(date, asset_id) DO UPDATE SET {}",
            updates
        ));
    }
    sql
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: Option<&Value>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        None => query.bind(None::<String>),
        Some(Value::Float64(v)) => query.bind(*v),
        Some(Value::Int64(v)) => query.bind(*v),
        Some(Value::Bool(v)) => query.bind(*v),
        Some(Value::Text(v)) => query.bind(v.clone()),
        Some(Value::DateTime(v)) => query.bind(format_datetime(v)),
    }
}

fn is_unique_violation(error: &dyn sqlx::error::DatabaseError) -> bool {
    error.is_unique_violation() || error.message().contains("UNIQUE constraint failed")
}

async fn query_with(
    conn: &mut SqliteConnection,
    filter: &QueryFilter,
) -> Result<QueryResult, StoreError> {
    let schema = StoreSchema::read(conn).await?;
    let columns = schema.select(filter.columns.as_deref())?;

    let range = RangeQuery {
        start: filter.start_date,
        end: filter.end_date,
        asset_ids: filter.asset_ids.as_deref(),
        columns: &columns,
        include_inserted_at: true,
    };
    let rows = fetch_rows(conn, &range).await?;
    Ok(QueryResult { columns, rows })
}

/// Closes a connection, logging rather than failing if the close itself errors.
pub(crate) async fn close(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close store connection cleanly.");
    }
}

/// Removes a store file and any SQLite side files next to it.
async fn remove_store_files(path: &Path) {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        targets.push(PathBuf::from(side));
    }
    for target in targets {
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to remove store file."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::DType;

    fn schema() -> StoreSchema {
        StoreSchema::new(
            "x",
            vec![StoreColumn {
                name: "v".into(),
                dtype: DType::Float64,
            }],
            "1d",
        )
    }

    #[test]
    fn append_is_a_plain_insert() {
        assert_eq!(
            insert_sql(&schema(), InsertMode::Append),
            "INSERT INTO data (date, asset_id, inserted_at, \"v\") VALUES (?, ?, ?, ?)"
        );
    }

    #[test]
    fn update_overwrites_every_non_key_column() {
        let sql = insert_sql(&schema(), InsertMode::Update);
        assert!(sql.ends_with(
            "ON CONFLICT(date, asset_id) DO UPDATE SET inserted_at = excluded.inserted_at, \"v\" = excluded.\"v\""
        ));
    }
}
