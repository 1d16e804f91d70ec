use crate::adjustments::AdjustmentSchedule;
use crate::error::LoaderError;
use crate::output::{AdjustedColumn, LoadedColumns};
use crate::{check_mask, PipelineLoader};
use async_trait::async_trait;
use core_types::{BoundColumn, ColumnData, Dataset, Domain, QueryGrid, Value};
use database::{
    data_table_columns, fetch_rows, OpenMode, RangeQuery, StoreCatalog, StoreColumn, StoreError,
};
use ndarray::Array2;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Loads dataset columns from a store with one ranged read per `load`.
///
/// Store-backed loads never carry adjustments: every returned schedule is
/// empty.
#[derive(Debug, Clone)]
pub struct StoreLoader {
    catalog: StoreCatalog,
    code: String,
    dataset: Dataset,
    /// Dataset column name to store column name.
    column_map: HashMap<String, String>,
}

impl StoreLoader {
    /// Binds `dataset` to store `code`, reading each column from the store
    /// column of the same name.
    pub async fn new(catalog: StoreCatalog, code: &str, dataset: Dataset) -> Result<Self, LoaderError> {
        Self::with_column_map(catalog, code, dataset, HashMap::new()).await
    }

    /// Like [`StoreLoader::new`], with some dataset columns read from
    /// differently named store columns.
    ///
    /// The store must exist and have a data table holding the key columns and
    /// every mapped column, each stored with the dtype the dataset declares;
    /// otherwise this fails with `SchemaMismatch`.
    pub async fn with_column_map(
        catalog: StoreCatalog,
        code: &str,
        dataset: Dataset,
        overrides: HashMap<String, String>,
    ) -> Result<Self, LoaderError> {
        if let Some(unknown) = overrides.keys().find(|name| dataset.get(name).is_none()) {
            return Err(LoaderError::Configuration(format!(
                "Column map names '{}', which is not a column of {}",
                unknown,
                dataset.name()
            )));
        }
        let column_map: HashMap<String, String> = dataset
            .columns()
            .iter()
            .map(|c| {
                let stored = overrides.get(c.name()).cloned().unwrap_or_else(|| c.name().to_string());
                (c.name().to_string(), stored)
            })
            .collect();

        let mut conn = match catalog.connect(code, OpenMode::ReadOnly).await {
            Ok(conn) => conn,
            Err(StoreError::NotFound(_)) => {
                return Err(LoaderError::SchemaMismatch(format!(
                    "store '{}' does not exist under {}",
                    code,
                    catalog.root().display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let table = data_table_columns(&mut conn).await;
        close(conn).await;

        let Some(table) = table? else {
            return Err(LoaderError::SchemaMismatch(format!(
                "store '{}' has no data table",
                code
            )));
        };
        let mut required: Vec<&str> = vec!["date", "asset_id"];
        required.extend(column_map.values().map(String::as_str));
        if let Some(missing) = required.iter().find(|name| !table.iter().any(|t| t.as_str() == **name)) {
            return Err(LoaderError::SchemaMismatch(format!(
                "store '{}' has no column '{}'. Its data table has: {}",
                code,
                missing,
                table.join(", ")
            )));
        }

        let schema = catalog.schema(code).await.map_err(|e| {
            LoaderError::SchemaMismatch(format!("store '{}' metadata is unreadable: {}", code, e))
        })?;
        for column in dataset.columns() {
            let stored = &column_map[column.name()];
            match schema.column(stored) {
                Some(found) if found.dtype == column.dtype() => {}
                Some(found) => {
                    return Err(LoaderError::SchemaMismatch(format!(
                        "column '{}' is declared {} but store '{}' holds '{}' as {}",
                        column.name(),
                        column.dtype(),
                        code,
                        stored,
                        found.dtype
                    )));
                }
                None => {
                    return Err(LoaderError::SchemaMismatch(format!(
                        "store '{}' metadata does not describe column '{}'",
                        code, stored
                    )));
                }
            }
        }

        Ok(Self {
            catalog,
            code: code.to_string(),
            dataset,
            column_map,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    async fn read(
        &self,
        columns: &[BoundColumn],
        grid: &QueryGrid,
        mask: &Array2<bool>,
    ) -> Result<LoadedColumns, LoaderError> {
        let mut outputs: Vec<ColumnData> = columns
            .iter()
            .map(|c| ColumnData::filled(grid.shape(), c.missing_value()))
            .collect();

        if let Some((start, end)) = grid.date_bounds().filter(|_| !grid.is_empty()) {
            let store_columns: Vec<StoreColumn> = columns
                .iter()
                .map(|c| StoreColumn {
                    name: self.column_map[c.name()].clone(),
                    dtype: c.dtype(),
                })
                .collect();
            let range = RangeQuery {
                start: Some(start),
                end: Some(end),
                asset_ids: Some(grid.assets()),
                columns: &store_columns,
                include_inserted_at: false,
            };

            let mut conn = self.catalog.connect(&self.code, OpenMode::ReadOnly).await?;
            let rows = fetch_rows(&mut conn, &range).await;
            close(conn).await;
            let rows = rows?;

            let mut placed = 0usize;
            for row in &rows {
                let (Some(i), Some(j)) = (grid.date_position(&row.date), grid.asset_position(row.asset_id)) else {
                    continue;
                };
                if !mask[[i, j]] {
                    continue;
                }
                for (output, cell) in outputs.iter_mut().zip(&row.values) {
                    if let Some(value) = cell {
                        set_cell(output, (i, j), value)?;
                        placed += 1;
                    }
                }
            }
            debug!(
                code = %self.code,
                rows = rows.len(),
                cells = placed,
                "Loaded columns from store."
            );
        }

        Ok(columns
            .iter()
            .zip(outputs)
            .map(|(column, data)| {
                (
                    column.name().to_string(),
                    AdjustedColumn::new(data, AdjustmentSchedule::new(), column.missing_value().clone()),
                )
            })
            .collect())
    }
}

#[async_trait]
impl PipelineLoader for StoreLoader {
    async fn load(
        &self,
        domain: &Domain,
        columns: &[BoundColumn],
        grid: &QueryGrid,
        mask: &Array2<bool>,
    ) -> Result<LoadedColumns, LoaderError> {
        check_mask(grid, mask)?;
        if let Some(column) = columns.iter().find(|c| !self.dataset.owns(c)) {
            return Err(LoaderError::WrongDataset {
                column: column.qualname(),
                dataset: self.dataset.name().to_string(),
            });
        }
        debug!(%domain, code = %self.code, columns = columns.len(), "Store load requested.");
        self.read(columns, grid, mask).await
    }
}

/// Builds a dataset from a store's metadata, named after the store, together
/// with a loader bound to it.
///
/// Integer columns have no default sentinel, so `missing_values` must name
/// one for each of them.
pub async fn open_store_dataset(
    catalog: &StoreCatalog,
    code: &str,
    missing_values: HashMap<String, Value>,
) -> Result<(Dataset, StoreLoader), LoaderError> {
    let schema = catalog.schema(code).await?;

    let mut builder = Dataset::builder(&schema.code).doc(format!(
        "Custom data from store '{}' ({} bars).",
        schema.code, schema.bar_size
    ));
    for column in &schema.columns {
        builder = builder.column(column.name.clone(), column.dtype);
    }
    for (name, value) in missing_values {
        builder = builder.missing_value(name, value);
    }
    let dataset = builder.build()?;

    let loader = StoreLoader::new(catalog.clone(), code, dataset.clone()).await?;
    Ok((dataset, loader))
}

fn set_cell(output: &mut ColumnData, index: (usize, usize), value: &Value) -> Result<(), LoaderError> {
    output.set(index, value.clone()).map_err(|e| {
        LoaderError::SchemaMismatch(format!("stored value does not fit its column: {}", e))
    })
}

async fn close(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close store connection cleanly.");
    }
}
