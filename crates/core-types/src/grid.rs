use crate::error::CoreError;
use chrono::NaiveDate;
use ndarray::Array2;

/// Integer asset identifier (the store's `asset_id` key component).
pub type AssetId = i64;

/// The (dates x assets) coordinate system a loader must fill.
///
/// Both axes are strictly ascending, which also makes them duplicate-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryGrid {
    dates: Vec<NaiveDate>,
    assets: Vec<AssetId>,
}

impl QueryGrid {
    /// Validates that both axes are strictly ascending.
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<AssetId>) -> Result<Self, CoreError> {
        ensure_strictly_ascending(&dates, "dates")?;
        ensure_strictly_ascending(&assets, "asset_ids")?;
        Ok(Self { dates, assets })
    }

    /// Sorts and deduplicates both axes instead of rejecting them.
    pub fn normalized(mut dates: Vec<NaiveDate>, mut assets: Vec<AssetId>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        assets.sort_unstable();
        assets.dedup();
        Self { dates, assets }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    /// `(|dates|, |assets|)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.dates.len(), self.assets.len())
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.assets.is_empty()
    }

    /// `(min(dates), max(dates))`, or `None` for an empty date axis.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.dates.first()?, *self.dates.last()?))
    }

    pub fn date_position(&self, date: &NaiveDate) -> Option<usize> {
        self.dates.binary_search(date).ok()
    }

    pub fn asset_position(&self, asset: AssetId) -> Option<usize> {
        self.assets.binary_search(&asset).ok()
    }

    /// A mask that lets every cell through.
    pub fn full_mask(&self) -> Array2<bool> {
        Array2::from_elem(self.shape(), true)
    }
}

/// Fails unless `values` is strictly ascending.
pub fn ensure_strictly_ascending<T: PartialOrd + std::fmt::Debug>(
    values: &[T],
    what: &str,
) -> Result<(), CoreError> {
    match values.windows(2).find(|pair| pair[0] >= pair[1]) {
        Some(pair) => Err(CoreError::InvalidInput(
            what.to_string(),
            format!(
                "values must be ascending and unique, found {:?} before {:?}",
                pair[0], pair[1]
            ),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, day).unwrap()
    }

    #[test]
    fn rejects_unsorted_or_duplicate_axes() {
        assert!(QueryGrid::new(vec![d(4), d(3)], vec![1]).is_err());
        assert!(QueryGrid::new(vec![d(3)], vec![2, 2]).is_err());
        assert!(QueryGrid::new(vec![d(3), d(4)], vec![1, 2]).is_ok());
    }

    #[test]
    fn normalized_sorts_and_dedups() {
        let grid = QueryGrid::normalized(vec![d(5), d(3), d(5)], vec![9, 1, 9]);
        assert_eq!(grid.dates(), &[d(3), d(5)]);
        assert_eq!(grid.assets(), &[1, 9]);
        assert_eq!(grid.shape(), (2, 2));
        assert_eq!(grid.date_bounds(), Some((d(3), d(5))));
        assert_eq!(grid.asset_position(9), Some(1));
        assert_eq!(grid.date_position(&d(4)), None);
    }

    #[test]
    fn empty_grid_has_no_bounds() {
        let grid = QueryGrid::new(vec![], vec![1, 2]).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.date_bounds(), None);
        assert_eq!(grid.full_mask().dim(), (0, 2));
    }
}
