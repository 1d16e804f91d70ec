use crate::enums::DType;
use crate::error::CoreError;
use crate::value::{MissingValue, Value};
use chrono::NaiveDateTime;
use ndarray::Array2;

/// A dense, dtype-matched 2-D array, rows are dates and columns are assets.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float64(Array2<f64>),
    Int64(Array2<i64>),
    Bool(Array2<bool>),
    Text(Array2<Option<String>>),
    DateTime(Array2<Option<NaiveDateTime>>),
}

impl ColumnData {
    /// An array of `shape` holding only the sentinel.
    pub fn filled(shape: (usize, usize), missing: &MissingValue) -> ColumnData {
        match missing {
            MissingValue::Float64(v) => ColumnData::Float64(Array2::from_elem(shape, *v)),
            MissingValue::Int64(v) => ColumnData::Int64(Array2::from_elem(shape, *v)),
            MissingValue::Bool(v) => ColumnData::Bool(Array2::from_elem(shape, *v)),
            MissingValue::Text(v) => ColumnData::Text(Array2::from_elem(shape, v.clone())),
            MissingValue::DateTime(v) => ColumnData::DateTime(Array2::from_elem(shape, *v)),
        }
    }

    /// Builds an array from row-major cells; `None` cells take the sentinel.
    pub fn from_rows(
        rows: &[Vec<Option<Value>>],
        missing: &MissingValue,
    ) -> Result<ColumnData, CoreError> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|row| row.len() != width) {
            return Err(CoreError::InvalidInput(
                "frame".to_string(),
                format!("row {} has {} cells, expected {}", bad, rows[bad].len(), width),
            ));
        }
        let mut data = ColumnData::filled((rows.len(), width), missing);
        for (i, row) in rows.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                if let Some(value) = cell {
                    data.set((i, j), value.clone())?;
                }
            }
        }
        Ok(data)
    }

    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::Float64(_) => DType::Float64,
            ColumnData::Int64(_) => DType::Int64,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Text(_) => DType::Text,
            ColumnData::DateTime(_) => DType::DateTime,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            ColumnData::Float64(a) => a.dim(),
            ColumnData::Int64(a) => a.dim(),
            ColumnData::Bool(a) => a.dim(),
            ColumnData::Text(a) => a.dim(),
            ColumnData::DateTime(a) => a.dim(),
        }
    }

    /// The cell at `index`, or `None` where a null-like sentinel sits.
    pub fn get(&self, index: (usize, usize)) -> Option<Value> {
        let (i, j) = index;
        match self {
            ColumnData::Float64(a) => a.get((i, j)).map(|v| Value::Float64(*v)),
            ColumnData::Int64(a) => a.get((i, j)).map(|v| Value::Int64(*v)),
            ColumnData::Bool(a) => a.get((i, j)).map(|v| Value::Bool(*v)),
            ColumnData::Text(a) => a.get((i, j)).and_then(|v| v.clone().map(Value::Text)),
            ColumnData::DateTime(a) => a.get((i, j)).and_then(|v| v.map(Value::DateTime)),
        }
    }

    /// Writes `value` at `index`, widening integers into float arrays.
    pub fn set(&mut self, index: (usize, usize), value: Value) -> Result<(), CoreError> {
        let shape = self.shape();
        if index.0 >= shape.0 || index.1 >= shape.1 {
            return Err(CoreError::InvalidInput(
                "index".to_string(),
                format!("{:?} is outside an array of shape {:?}", index, shape),
            ));
        }
        match (self, value) {
            (ColumnData::Float64(a), Value::Float64(v)) => a[index] = v,
            (ColumnData::Float64(a), Value::Int64(v)) => a[index] = v as f64,
            (ColumnData::Int64(a), Value::Int64(v)) => a[index] = v,
            (ColumnData::Bool(a), Value::Bool(v)) => a[index] = v,
            (ColumnData::Text(a), Value::Text(v)) => a[index] = Some(v),
            (ColumnData::DateTime(a), Value::DateTime(v)) => a[index] = Some(v),
            (data, value) => {
                return Err(CoreError::Configuration(format!(
                    "Cannot store {} value {} in a {} array",
                    value.dtype(),
                    value,
                    data.dtype()
                )));
            }
        }
        Ok(())
    }

    /// The first `rows` rows as a new array.
    pub fn head_rows(&self, rows: usize) -> ColumnData {
        fn head<T: Clone>(a: &Array2<T>, rows: usize) -> Array2<T> {
            let rows = rows.min(a.nrows());
            a.slice(ndarray::s![..rows, ..]).to_owned()
        }
        match self {
            ColumnData::Float64(a) => ColumnData::Float64(head(a, rows)),
            ColumnData::Int64(a) => ColumnData::Int64(head(a, rows)),
            ColumnData::Bool(a) => ColumnData::Bool(head(a, rows)),
            ColumnData::Text(a) => ColumnData::Text(head(a, rows)),
            ColumnData::DateTime(a) => ColumnData::DateTime(head(a, rows)),
        }
    }

    pub fn as_float64(&self) -> Option<&Array2<f64>> {
        match self {
            ColumnData::Float64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<&Array2<i64>> {
        match self {
            ColumnData::Int64(a) => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn filled_uses_sentinel() {
        let data = ColumnData::filled((2, 3), &MissingValue::Int64(-1));
        assert_eq!(data.as_int64().unwrap(), &Array2::from_elem((2, 3), -1i64));
        assert_eq!(data.shape(), (2, 3));
    }

    #[test]
    fn set_widens_and_rejects() {
        let mut data = ColumnData::filled((1, 2), &MissingValue::Float64(f64::NAN));
        data.set((0, 0), Value::Float64(1.5)).unwrap();
        data.set((0, 1), Value::Int64(2)).unwrap();
        assert_eq!(data.get((0, 1)), Some(Value::Float64(2.0)));
        assert!(data.set((0, 0), Value::Bool(true)).is_err());
        assert!(data.set((3, 0), Value::Float64(1.0)).is_err());
    }

    #[test]
    fn from_rows_and_head() {
        let rows = vec![
            vec![Some(Value::Int64(1)), None],
            vec![None, Some(Value::Int64(4))],
        ];
        let data = ColumnData::from_rows(&rows, &MissingValue::Int64(-1)).unwrap();
        assert_eq!(data.as_int64().unwrap(), &array![[1i64, -1], [-1, 4]]);
        assert_eq!(data.head_rows(1).as_int64().unwrap(), &array![[1i64, -1]]);

        let ragged = vec![vec![Some(Value::Int64(1))], vec![]];
        assert!(ColumnData::from_rows(&ragged, &MissingValue::Int64(-1)).is_err());
    }

    #[test]
    fn text_sentinel_reads_as_none() {
        let mut data = ColumnData::filled((1, 2), &MissingValue::Text(None));
        data.set((0, 1), Value::from("AAPL")).unwrap();
        assert_eq!(data.get((0, 0)), None);
        assert_eq!(data.get((0, 1)), Some(Value::from("AAPL")));
    }
}
