use crate::enums::AdjustmentKind;
use crate::grid::AssetId;
use crate::value::Value;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A retroactive correction (split, dividend, restatement) to historical values.
///
/// The correction becomes known on `apply_date` and rewrites values for
/// `asset_id` between `start_date` (open when `None`) and `end_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEvent {
    pub asset_id: AssetId,
    pub value: Value,
    pub kind: AdjustmentKind,
    pub start_date: Option<NaiveDate>,
    pub end_date: NaiveDate,
    pub apply_date: NaiveDate,
}

/// An adjustment event tagged with the column it targets, as found in a
/// single combined adjustment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAdjustment {
    pub column: String,
    #[serde(flatten)]
    pub event: AdjustmentEvent,
}
