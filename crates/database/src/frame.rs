use crate::error::StoreError;
use crate::schema::StoreSchema;
use chrono::NaiveDate;
use core_types::{parse_date, AssetId, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// How `insert` treats rows that are already in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// Deletes every stored row, then inserts.
    #[default]
    Replace,
    /// Inserts; any existing (date, asset) key is a conflict.
    Append,
    /// Upserts. A new row replaces the stored row with the same key.
    Update,
}

impl InsertMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertMode::Replace => "replace",
            InsertMode::Append => "append",
            InsertMode::Update => "update",
        }
    }
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsertMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(InsertMode::Replace),
            "append" => Ok(InsertMode::Append),
            "update" => Ok(InsertMode::Update),
            other => Err(StoreError::Configuration(format!(
                "Invalid insert mode '{}'. Must be one of: replace, append, update",
                other
            ))),
        }
    }
}

/// One long-form input row. Fields left out, or set to `None`, are not written.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub date: NaiveDate,
    pub asset_id: AssetId,
    pub values: BTreeMap<String, Option<Value>>,
}

impl Record {
    pub fn new(date: NaiveDate, asset_id: AssetId) -> Self {
        Self {
            date,
            asset_id,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.values.insert(field.to_string(), Some(value.into()));
        self
    }

    /// Reads a JSON object `{"date": "YYYY-MM-DD", "asset_id": n, <field>: value, ...}`
    /// using the store's dtypes to interpret each field.
    pub fn from_json(object: &Map<String, JsonValue>, schema: &StoreSchema) -> Result<Self, StoreError> {
        let date = object
            .get("date")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| StoreError::Configuration("Record is missing a 'date' string".to_string()))?;
        let date = parse_date(date)?;
        let asset_id = object
            .get("asset_id")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| {
                StoreError::Configuration("Record is missing an integer 'asset_id'".to_string())
            })?;

        let mut values = BTreeMap::new();
        for (field, json) in object {
            if field == "date" || field == "asset_id" {
                continue;
            }
            let column = schema.column(field).ok_or_else(|| unknown_field(field, schema))?;
            values.insert(field.clone(), Value::from_json(json, column.dtype)?);
        }
        Ok(Self {
            date,
            asset_id,
            values,
        })
    }
}

/// Data handed to `insert`, in one of the shapes it can convert to long form.
///
/// Wide frames are indexed by `dates`; `values[i][j]` is the cell for `dates[i]`
/// and the `j`-th key.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertFrame {
    /// Columns keyed by (field, asset).
    MultiField {
        dates: Vec<NaiveDate>,
        keys: Vec<(String, AssetId)>,
        values: Vec<Vec<Option<Value>>>,
    },
    /// Columns keyed by asset; only valid for stores with exactly one column.
    SingleField {
        dates: Vec<NaiveDate>,
        assets: Vec<AssetId>,
        values: Vec<Vec<Option<Value>>>,
    },
    /// Already long form.
    Records(Vec<Record>),
}

/// A fully validated row, its values aligned with the schema's columns.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteRow {
    pub date: NaiveDate,
    pub asset_id: AssetId,
    pub values: Vec<Option<Value>>,
}

type Cells = BTreeMap<(NaiveDate, AssetId), Vec<Option<Value>>>;

impl InsertFrame {
    /// Converts the frame to long-form rows ordered by (date, asset).
    ///
    /// Null cells (and NaN floats) are skipped; a key with no remaining value
    /// produces no row.
    pub(crate) fn to_rows(&self, schema: &StoreSchema) -> Result<Vec<WriteRow>, StoreError> {
        let mut cells: Cells = BTreeMap::new();
        match self {
            InsertFrame::MultiField {
                dates,
                keys,
                values,
            } => {
                check_wide_shape(dates, keys.len(), values)?;
                let mut seen = HashSet::new();
                let mut targets = Vec::with_capacity(keys.len());
                for (field, asset) in keys {
                    if !seen.insert((field.as_str(), *asset)) {
                        return Err(StoreError::Configuration(format!(
                            "Column key ({}, {}) appears more than once",
                            field, asset
                        )));
                    }
                    let index = schema
                        .columns
                        .iter()
                        .position(|c| &c.name == field)
                        .ok_or_else(|| unknown_field(field, schema))?;
                    targets.push((index, *asset));
                }
                for (date, row) in dates.iter().zip(values) {
                    for (&(index, asset), cell) in targets.iter().zip(row) {
                        place(&mut cells, schema, *date, asset, index, cell.clone())?;
                    }
                }
            }
            InsertFrame::SingleField {
                dates,
                assets,
                values,
            } => {
                if schema.columns.len() != 1 {
                    return Err(StoreError::Configuration(format!(
                        "Single-field input needs a store with exactly one column, but '{}' has {}",
                        schema.code,
                        schema.columns.len()
                    )));
                }
                check_wide_shape(dates, assets.len(), values)?;
                if assets.iter().collect::<HashSet<_>>().len() != assets.len() {
                    return Err(StoreError::Configuration(
                        "Asset columns must be unique".to_string(),
                    ));
                }
                for (date, row) in dates.iter().zip(values) {
                    for (asset, cell) in assets.iter().zip(row) {
                        place(&mut cells, schema, *date, *asset, 0, cell.clone())?;
                    }
                }
            }
            InsertFrame::Records(records) => {
                let mut seen = HashSet::new();
                for record in records {
                    if !seen.insert((record.date, record.asset_id)) {
                        return Err(StoreError::Configuration(format!(
                            "Duplicate record for date {} and asset {}",
                            record.date, record.asset_id
                        )));
                    }
                    for (field, cell) in &record.values {
                        let index = schema
                            .columns
                            .iter()
                            .position(|c| &c.name == field)
                            .ok_or_else(|| unknown_field(field, schema))?;
                        place(&mut cells, schema, record.date, record.asset_id, index, cell.clone())?;
                    }
                }
            }
        }

        Ok(cells
            .into_iter()
            .map(|((date, asset_id), values)| WriteRow {
                date,
                asset_id,
                values,
            })
            .collect())
    }
}

fn check_wide_shape(
    dates: &[NaiveDate],
    width: usize,
    values: &[Vec<Option<Value>>],
) -> Result<(), StoreError> {
    if values.len() != dates.len() {
        return Err(StoreError::Configuration(format!(
            "Frame has {} dates but {} value rows",
            dates.len(),
            values.len()
        )));
    }
    if let Some(row) = values.iter().find(|row| row.len() != width) {
        return Err(StoreError::Configuration(format!(
            "Frame rows must have {} values, found a row with {}",
            width,
            row.len()
        )));
    }
    if dates.iter().collect::<HashSet<_>>().len() != dates.len() {
        return Err(StoreError::Configuration(
            "Frame dates must be unique".to_string(),
        ));
    }
    Ok(())
}

fn place(
    cells: &mut Cells,
    schema: &StoreSchema,
    date: NaiveDate,
    asset: AssetId,
    index: usize,
    cell: Option<Value>,
) -> Result<(), StoreError> {
    let Some(value) = cell else {
        return Ok(());
    };
    if matches!(value, Value::Float64(v) if v.is_nan()) {
        return Ok(());
    }
    let column = &schema.columns[index];
    let value = value.coerce(column.dtype).map_err(|e| {
        StoreError::Configuration(format!("Column '{}': {}", column.name, e))
    })?;
    cells
        .entry((date, asset))
        .or_insert_with(|| vec![None; schema.columns.len()])[index] = Some(value);
    Ok(())
}

fn unknown_field(field: &str, schema: &StoreSchema) -> StoreError {
    StoreError::Configuration(format!(
        "Field '{}' is not a column of store '{}'. Available columns: {}",
        field,
        schema.code,
        schema.column_names().join(", ")
    ))
}
