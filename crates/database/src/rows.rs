use crate::error::{StoreError, StoreResultExt};
use crate::schema::{quote_ident, StoreColumn, DATA_TABLE};
use chrono::{NaiveDate, NaiveDateTime};
use core_types::{format_date, format_datetime, parse_date, parse_datetime, AssetId, DType, Value};
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// One stored row, its values aligned with the columns it was read with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub date: NaiveDate,
    pub asset_id: AssetId,
    pub inserted_at: Option<NaiveDateTime>,
    pub values: Vec<Option<Value>>,
}

/// Long-form query output ordered by (date, asset_id).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<StoreColumn>,
    pub rows: Vec<StoreRow>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The value of `column` in row `row`, `None` when null or unknown.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.values.get(index)?.as_ref()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                object.insert("date".to_string(), JsonValue::String(format_date(&row.date)));
                object.insert("asset_id".to_string(), JsonValue::from(row.asset_id));
                for (column, value) in self.columns.iter().zip(&row.values) {
                    let json = value.as_ref().map(Value::to_json).unwrap_or(JsonValue::Null);
                    object.insert(column.name.clone(), json);
                }
                if let Some(ts) = &row.inserted_at {
                    object.insert(
                        "inserted_at".to_string(),
                        JsonValue::String(format_datetime(ts)),
                    );
                }
                JsonValue::Object(object)
            })
            .collect()
    }
}

/// A filtered read of the data table. Bounds are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct RangeQuery<'a> {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub asset_ids: Option<&'a [AssetId]>,
    /// Store column names with the dtype each is decoded as.
    pub columns: &'a [StoreColumn],
    pub include_inserted_at: bool,
}

impl<'a> RangeQuery<'a> {
    pub fn new(columns: &'a [StoreColumn]) -> Self {
        Self {
            start: None,
            end: None,
            asset_ids: None,
            columns,
            include_inserted_at: false,
        }
    }

    fn sql(&self) -> String {
        let mut select = vec!["date".to_string(), "asset_id".to_string()];
        if self.include_inserted_at {
            select.push("inserted_at".to_string());
        }
        select.extend(self.columns.iter().map(|c| quote_ident(&c.name)));

        let mut filters = Vec::new();
        if self.start.is_some() {
            filters.push("date >= ?".to_string());
        }
        if self.end.is_some() {
            filters.push("date <= ?".to_string());
        }
        // One JSON array parameter keeps any universe size under SQLite's variable limit.
        if self.asset_ids.is_some() {
            filters.push("asset_id IN (SELECT value FROM json_each(?))".to_string());
        }

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), DATA_TABLE);
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        sql.push_str(" ORDER BY date, asset_id");
        sql
    }
}

/// Runs `range` as a single statement and decodes every row.
pub async fn fetch_rows(
    conn: &mut SqliteConnection,
    range: &RangeQuery<'_>,
) -> Result<Vec<StoreRow>, StoreError> {
    if matches!(range.asset_ids, Some(assets) if assets.is_empty()) {
        return Ok(Vec::new());
    }

    let sql = range.sql();
    let mut query = sqlx::query(&sql);
    if let Some(start) = range.start {
        query = query.bind(format_date(&start));
    }
    if let Some(end) = range.end {
        query = query.bind(format_date(&end));
    }
    if let Some(assets) = range.asset_ids {
        query = query.bind(serde_json::to_string(assets)?);
    }

    let rows = query
        .fetch_all(&mut *conn)
        .await
        .context("querying the data table")?;
    rows.iter().map(|row| decode_row(row, range)).collect()
}

fn decode_row(row: &SqliteRow, range: &RangeQuery<'_>) -> Result<StoreRow, StoreError> {
    let date: String = row.try_get(0).context("decoding date")?;
    let date = parse_date(&date)?;
    let asset_id: i64 = row.try_get(1).context("decoding asset_id")?;

    let mut offset = 2;
    let inserted_at = if range.include_inserted_at {
        offset += 1;
        let text: Option<String> = row.try_get(2).context("decoding inserted_at")?;
        text.as_deref().map(parse_datetime).transpose()?
    } else {
        None
    };

    let values = range
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| decode_cell(row, offset + i, column))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StoreRow {
        date,
        asset_id,
        inserted_at,
        values,
    })
}

fn decode_cell(
    row: &SqliteRow,
    index: usize,
    column: &StoreColumn,
) -> Result<Option<Value>, StoreError> {
    let context = format!("decoding column '{}'", column.name);
    let value = match column.dtype {
        DType::Float64 => row
            .try_get::<Option<f64>, _>(index)
            .context(&context)?
            .map(Value::Float64),
        DType::Int64 => row
            .try_get::<Option<i64>, _>(index)
            .context(&context)?
            .map(Value::Int64),
        DType::Bool => row
            .try_get::<Option<bool>, _>(index)
            .context(&context)?
            .map(Value::Bool),
        DType::Text => row
            .try_get::<Option<String>, _>(index)
            .context(&context)?
            .map(Value::Text),
        DType::DateTime => row
            .try_get::<Option<String>, _>(index)
            .context(&context)?
            .as_deref()
            .map(parse_datetime)
            .transpose()?
            .map(Value::DateTime),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filtered_select() {
        let columns = vec![StoreColumn {
            name: "pe_ratio".into(),
            dtype: DType::Float64,
        }];
        let assets = [1, 2];
        let mut range = RangeQuery::new(&columns);
        range.start = NaiveDate::from_ymd_opt(2022, 1, 3);
        range.asset_ids = Some(&assets);
        assert_eq!(
            range.sql(),
            "SELECT date, asset_id, \"pe_ratio\" FROM data WHERE date >= ? AND asset_id IN (SELECT value FROM json_each(?)) ORDER BY date, asset_id"
        );
    }

    #[test]
    fn unfiltered_select_includes_insert_time() {
        let mut range = RangeQuery::new(&[]);
        range.include_inserted_at = true;
        assert_eq!(
            range.sql(),
            "SELECT date, asset_id, inserted_at FROM data ORDER BY date, asset_id"
        );
    }
}
