use crate::adjustments::AdjustmentSchedule;
use crate::error::LoaderError;
use core_types::{ColumnData, MissingValue};
use std::collections::BTreeMap;

/// A loaded column: the dense baseline plus the adjustments that become known
/// at later rows.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedColumn {
    pub data: ColumnData,
    pub adjustments: AdjustmentSchedule,
    pub missing_value: MissingValue,
}

/// Loader output keyed by column name.
pub type LoadedColumns = BTreeMap<String, AdjustedColumn>;

impl AdjustedColumn {
    pub fn new(data: ColumnData, adjustments: AdjustmentSchedule, missing_value: MissingValue) -> Self {
        Self {
            data,
            adjustments,
            missing_value,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    /// The array as it was known on row `row`: rows after it are cut off and
    /// every adjustment scheduled at or before it is applied.
    pub fn as_of(&self, row: usize) -> Result<ColumnData, LoaderError> {
        let rows = self.data.shape().0;
        if row >= rows {
            return Err(LoaderError::InvalidRequest(format!(
                "row {} is outside an array with {} rows",
                row, rows
            )));
        }
        let mut view = self.data.head_rows(row + 1);
        for adjustments in self.adjustments.range(..=row).map(|(_, a)| a) {
            for adjustment in adjustments {
                adjustment.apply(&mut view)?;
            }
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjustments::Adjustment;
    use core_types::{AdjustmentKind, Value};
    use ndarray::array;

    #[test]
    fn as_of_never_looks_ahead() {
        let split = Adjustment {
            first_row: 0,
            last_row: 1,
            column: 0,
            kind: AdjustmentKind::Multiply,
            value: Value::Float64(0.5),
        };
        let column = AdjustedColumn::new(
            ColumnData::Float64(array![[100.0], [102.0], [51.0]]),
            AdjustmentSchedule::from([(2, vec![split])]),
            MissingValue::Float64(f64::NAN),
        );

        assert_eq!(column.as_of(1).unwrap(), ColumnData::Float64(array![[100.0], [102.0]]));
        assert_eq!(
            column.as_of(2).unwrap(),
            ColumnData::Float64(array![[50.0], [51.0], [51.0]])
        );
        assert!(matches!(column.as_of(3), Err(LoaderError::InvalidRequest(_))));
    }
}
