use crate::adjustments::EventTable;
use crate::error::LoaderError;
use crate::output::{AdjustedColumn, LoadedColumns};
use crate::{check_mask, PipelineLoader};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{
    ensure_strictly_ascending, AdjustmentEvent, AssetId, BoundColumn, ColumnAdjustment,
    ColumnData, DType, Dataset, Domain, MissingValue, QueryGrid, Value,
};
use database::Record;
use ndarray::Array2;
use std::collections::HashMap;
use tracing::debug;

/// The stored values of one column: ascending unique dates by ascending
/// unique assets.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFrame {
    dates: Vec<NaiveDate>,
    assets: Vec<AssetId>,
    data: ColumnData,
}

impl SourceFrame {
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<AssetId>, data: ColumnData) -> Result<Self, LoaderError> {
        ensure_strictly_ascending(&dates, "frame dates")?;
        ensure_strictly_ascending(&assets, "frame assets")?;
        if data.shape() != (dates.len(), assets.len()) {
            return Err(LoaderError::Configuration(format!(
                "Frame data has shape {:?} but its axes describe {:?}",
                data.shape(),
                (dates.len(), assets.len())
            )));
        }
        Ok(Self { dates, assets, data })
    }

    /// Builds a frame from row-major cells, `None` cells taking `missing`.
    pub fn from_rows(
        dates: Vec<NaiveDate>,
        assets: Vec<AssetId>,
        rows: &[Vec<Option<Value>>],
        missing: &MissingValue,
    ) -> Result<Self, LoaderError> {
        let data = if rows.is_empty() {
            ColumnData::filled((0, assets.len()), missing)
        } else {
            ColumnData::from_rows(rows, missing)?
        };
        Self::new(dates, assets, data)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }
}

/// Loads dataset columns from frames held in memory.
///
/// Frames and adjustment events are validated once, at construction. Every
/// `load` allocates fresh output arrays, so one loader can serve concurrent
/// loads without locking.
#[derive(Debug, Clone)]
pub struct FrameLoader {
    dataset: Dataset,
    baselines: HashMap<String, SourceFrame>,
    adjustments: HashMap<String, EventTable>,
}

impl FrameLoader {
    pub fn new(
        dataset: Dataset,
        baselines: HashMap<String, SourceFrame>,
        adjustments: HashMap<String, Vec<AdjustmentEvent>>,
    ) -> Result<Self, LoaderError> {
        let mut checked = HashMap::with_capacity(baselines.len());
        for (name, frame) in baselines {
            let column = dataset.get(&name).ok_or_else(|| unknown_column(&dataset, &name))?;
            let frame = match (column.dtype(), frame.data) {
                (dtype, data) if data.dtype() == dtype => SourceFrame { data, ..frame },
                (DType::Float64, ColumnData::Int64(ints)) => SourceFrame {
                    data: ColumnData::Float64(ints.mapv(|v| v as f64)),
                    ..frame
                },
                (dtype, data) => {
                    return Err(LoaderError::Configuration(format!(
                        "Frame for column '{}' holds {} values, expected {}",
                        name,
                        data.dtype(),
                        dtype
                    )));
                }
            };
            checked.insert(name, frame);
        }

        let mut tables = HashMap::with_capacity(adjustments.len());
        for (name, events) in adjustments {
            let column = dataset.get(&name).ok_or_else(|| unknown_column(&dataset, &name))?;
            tables.insert(name.clone(), EventTable::new(events, &name, column.dtype())?);
        }

        debug!(
            dataset = dataset.name(),
            columns = checked.len(),
            adjusted = tables.values().filter(|t| t.len() > 0).count(),
            "Built frame loader."
        );
        Ok(Self {
            dataset,
            baselines: checked,
            adjustments: tables,
        })
    }

    /// Builds a loader from one long-form frame, split into a frame per
    /// column, and one adjustment table whose events name their column.
    ///
    /// Only dataset columns that appear in some record get a baseline.
    pub fn from_long_form(
        dataset: Dataset,
        records: &[Record],
        adjustments: Vec<ColumnAdjustment>,
    ) -> Result<Self, LoaderError> {
        let axes = QueryGrid::normalized(
            records.iter().map(|r| r.date).collect(),
            records.iter().map(|r| r.asset_id).collect(),
        );
        let (dates, assets) = (axes.dates(), axes.assets());

        let mut arrays: HashMap<String, (ColumnData, Array2<bool>)> = HashMap::new();
        for record in records {
            let (Ok(row) | Err(row)) = dates.binary_search(&record.date);
            let (Ok(col) | Err(col)) = assets.binary_search(&record.asset_id);
            for (field, value) in &record.values {
                let column = dataset.get(field).ok_or_else(|| unknown_column(&dataset, field))?;
                let (data, seen) = arrays.entry(field.clone()).or_insert_with(|| {
                    (
                        ColumnData::filled((dates.len(), assets.len()), column.missing_value()),
                        Array2::from_elem((dates.len(), assets.len()), false),
                    )
                });
                if seen[[row, col]] {
                    return Err(LoaderError::Configuration(format!(
                        "Field '{}' is given twice for date {} and asset {}",
                        field, record.date, record.asset_id
                    )));
                }
                seen[[row, col]] = true;
                if let Some(value) = value {
                    data.set((row, col), value.clone().coerce(column.dtype())?)?;
                }
            }
        }

        let baselines = arrays
            .into_iter()
            .map(|(name, (data, _))| {
                let frame = SourceFrame::new(dates.to_vec(), assets.to_vec(), data)?;
                Ok((name, frame))
            })
            .collect::<Result<HashMap<_, _>, LoaderError>>()?;
        Self::new(dataset, baselines, split_adjustments(adjustments))
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Loads synchronously; the trait's `load` wraps this.
    pub fn load_now(
        &self,
        columns: &[BoundColumn],
        grid: &QueryGrid,
        mask: &Array2<bool>,
    ) -> Result<LoadedColumns, LoaderError> {
        check_mask(grid, mask)?;

        let mut out = LoadedColumns::new();
        for column in columns {
            if !self.dataset.owns(column) {
                return Err(LoaderError::WrongDataset {
                    column: column.qualname(),
                    dataset: self.dataset.name().to_string(),
                });
            }
            let frame = self.baselines.get(column.name()).ok_or_else(|| {
                let mut available: Vec<&str> = self.baselines.keys().map(String::as_str).collect();
                available.sort_unstable();
                LoaderError::ColumnNotProvided {
                    column: column.qualname(),
                    available: available.join(", "),
                }
            })?;

            let rows: Vec<Option<usize>> = grid
                .dates()
                .iter()
                .map(|d| frame.dates.binary_search(d).ok())
                .collect();
            let cols: Vec<Option<usize>> = grid
                .assets()
                .iter()
                .map(|a| frame.assets.binary_search(a).ok())
                .collect();
            let data = take(&frame.data, &rows, &cols, mask, column.missing_value())?;

            let adjustments = self
                .adjustments
                .get(column.name())
                .map(|table| table.schedule(grid))
                .unwrap_or_default();

            out.insert(
                column.name().to_string(),
                AdjustedColumn::new(data, adjustments, column.missing_value().clone()),
            );
        }
        debug!(
            dataset = self.dataset.name(),
            columns = out.len(),
            dates = grid.dates().len(),
            assets = grid.assets().len(),
            "Loaded columns from frames."
        );
        Ok(out)
    }
}

#[async_trait]
impl PipelineLoader for FrameLoader {
    async fn load(
        &self,
        domain: &Domain,
        columns: &[BoundColumn],
        grid: &QueryGrid,
        mask: &Array2<bool>,
    ) -> Result<LoadedColumns, LoaderError> {
        debug!(%domain, "Frame load requested.");
        self.load_now(columns, grid, mask)
    }
}

/// Groups a combined adjustment table by the column each event names.
pub fn split_adjustments(
    adjustments: Vec<ColumnAdjustment>,
) -> HashMap<String, Vec<AdjustmentEvent>> {
    let mut split: HashMap<String, Vec<AdjustmentEvent>> = HashMap::new();
    for adjustment in adjustments {
        split.entry(adjustment.column).or_default().push(adjustment.event);
    }
    split
}

/// Gathers `source[rows[i], cols[j]]` into a new array; unmatched or masked
/// cells take the sentinel.
fn take(
    source: &ColumnData,
    rows: &[Option<usize>],
    cols: &[Option<usize>],
    mask: &Array2<bool>,
    missing: &MissingValue,
) -> Result<ColumnData, LoaderError> {
    fn gather<T: Clone>(
        source: &Array2<T>,
        rows: &[Option<usize>],
        cols: &[Option<usize>],
        mask: &Array2<bool>,
        fill: T,
    ) -> Array2<T> {
        Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| match (rows[i], cols[j]) {
            (Some(r), Some(c)) if mask[[i, j]] => source[[r, c]].clone(),
            _ => fill.clone(),
        })
    }

    let data = match (source, missing) {
        (ColumnData::Float64(a), MissingValue::Float64(m)) => {
            ColumnData::Float64(gather(a, rows, cols, mask, *m))
        }
        (ColumnData::Int64(a), MissingValue::Int64(m)) => {
            ColumnData::Int64(gather(a, rows, cols, mask, *m))
        }
        (ColumnData::Bool(a), MissingValue::Bool(m)) => {
            ColumnData::Bool(gather(a, rows, cols, mask, *m))
        }
        (ColumnData::Text(a), MissingValue::Text(m)) => {
            ColumnData::Text(gather(a, rows, cols, mask, m.clone()))
        }
        (ColumnData::DateTime(a), MissingValue::DateTime(m)) => {
            ColumnData::DateTime(gather(a, rows, cols, mask, *m))
        }
        (data, missing) => {
            return Err(LoaderError::Configuration(format!(
                "Sentinel of dtype {} does not fit {} data",
                missing.dtype(),
                data.dtype()
            )));
        }
    };
    Ok(data)
}

fn unknown_column(dataset: &Dataset, name: &str) -> LoaderError {
    LoaderError::Configuration(format!(
        "{} has no column '{}'. Available columns: {}",
        dataset.name(),
        name,
        dataset.column_names().join(", ")
    ))
}
