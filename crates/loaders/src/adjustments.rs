use crate::error::LoaderError;
use chrono::NaiveDate;
use core_types::{AdjustmentEvent, AdjustmentKind, ColumnData, DType, QueryGrid, Value};
use std::collections::BTreeMap;

/// An adjustment resolved to grid coordinates.
///
/// It rewrites rows `first_row..=last_row` of one asset column. An empty
/// window (`first_row > last_row`) touches nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub first_row: usize,
    pub last_row: usize,
    pub column: usize,
    pub kind: AdjustmentKind,
    pub value: Value,
}

impl Adjustment {
    /// Applies the adjustment to `data`, clipped to the rows it has.
    pub fn apply(&self, data: &mut ColumnData) -> Result<(), LoaderError> {
        let (rows, columns) = data.shape();
        if self.column >= columns {
            return Err(LoaderError::InvalidRequest(format!(
                "adjustment targets asset column {} of an array with {} columns",
                self.column, columns
            )));
        }
        if rows == 0 || self.first_row >= rows {
            return Ok(());
        }
        let last = self.last_row.min(rows - 1);

        match (self.kind, data) {
            (AdjustmentKind::Overwrite, data) => {
                for row in self.first_row..=last {
                    data.set((row, self.column), self.value.clone())?;
                }
            }
            (kind, ColumnData::Float64(array)) => {
                let factor = self.value.as_f64().ok_or_else(|| {
                    LoaderError::Configuration(format!("{:?} needs a numeric value", kind))
                })?;
                for row in self.first_row..=last {
                    let cell = &mut array[[row, self.column]];
                    match kind {
                        AdjustmentKind::Multiply => *cell *= factor,
                        AdjustmentKind::Add => *cell += factor,
                        AdjustmentKind::Overwrite => *cell = factor,
                    }
                }
            }
            (kind, data) => {
                return Err(LoaderError::Configuration(format!(
                    "{:?} adjustments only apply to float64 arrays, not {}",
                    kind,
                    data.dtype()
                )));
            }
        }
        Ok(())
    }
}

/// Adjustments keyed by the output row at which they become known.
pub type AdjustmentSchedule = BTreeMap<usize, Vec<Adjustment>>;

/// The adjustment events of one column, sorted by apply date.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventTable {
    events: Vec<AdjustmentEvent>,
}

impl EventTable {
    /// Validates events against the column they target and sorts them
    /// stably by `apply_date`.
    pub(crate) fn new(
        mut events: Vec<AdjustmentEvent>,
        column: &str,
        dtype: DType,
    ) -> Result<Self, LoaderError> {
        for event in &mut events {
            if event.kind.is_arithmetic() && dtype != DType::Float64 {
                return Err(LoaderError::Configuration(format!(
                    "{:?} adjustment for column '{}' needs a float64 column, found {}",
                    event.kind, column, dtype
                )));
            }
            event.value = event.value.clone().coerce(dtype).map_err(|e| {
                LoaderError::Configuration(format!("Adjustment for column '{}': {}", column, e))
            })?;
            if let Some(start) = event.start_date {
                if start > event.end_date {
                    return Err(LoaderError::Configuration(format!(
                        "Adjustment for column '{}' starts on {} after it ends on {}",
                        column, start, event.end_date
                    )));
                }
            }
        }
        events.sort_by_key(|event| event.apply_date);
        Ok(Self { events })
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Resolves the events relevant to `grid` into a schedule.
    ///
    /// An event survives when its apply date falls within the grid's date
    /// range, its end date is not before the first date, and its asset is on
    /// the grid. It is keyed by the first grid date at or after its apply
    /// date. Events sharing a row keep their table order.
    pub(crate) fn schedule(&self, grid: &QueryGrid) -> AdjustmentSchedule {
        let mut schedule = AdjustmentSchedule::new();
        let Some((min_date, max_date)) = grid.date_bounds() else {
            return schedule;
        };
        let dates = grid.dates();

        let lo = self.events.partition_point(|e| e.apply_date < min_date);
        let hi = self.events.partition_point(|e| e.apply_date <= max_date);
        for event in &self.events[lo..hi] {
            if event.end_date < min_date {
                continue;
            }
            let Some(column) = grid.asset_position(event.asset_id) else {
                continue;
            };
            let row = first_at_or_after(dates, event.apply_date);
            let first_row = event
                .start_date
                .map_or(0, |start| first_at_or_after(dates, start));
            // end_date >= min_date, so at least one date is <= end_date.
            let last_row = dates.partition_point(|d| *d <= event.end_date) - 1;

            schedule.entry(row).or_default().push(Adjustment {
                first_row,
                last_row,
                column,
                kind: event.kind,
                value: event.value.clone(),
            });
        }
        schedule
    }
}

fn first_at_or_after(dates: &[NaiveDate], date: NaiveDate) -> usize {
    dates.partition_point(|d| *d < date)
}
