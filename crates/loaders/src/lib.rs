//! # Loaders Crate
//!
//! Fills a caller's (dates x assets) query grid with dense, dtype-matched
//! arrays for the requested dataset columns.
//!
//! ## Architectural Principles
//!
//! - **Grid-shaped output:** every loaded array has exactly the grid's shape.
//!   Cells with no data, or masked out by the caller, hold the column's
//!   missing-value sentinel.
//! - **Exact alignment:** stored dates and assets are matched exactly. Nothing
//!   is forward-filled.
//! - **No lookahead:** adjustments are never baked into the data. They come as
//!   a schedule keyed by the first grid row on which they are known.
//!
//! ## Public API
//!
//! - `PipelineLoader`: the trait every loader implements.
//! - `FrameLoader`: loads from in-memory frames and builds adjustment schedules.
//! - `StoreLoader` / `open_store_dataset`: load from a store, one ranged read per call.
//! - `AdjustedColumn` / `Adjustment`: loader output.
//! - `LoaderError`: the specific error types that can be returned from this crate.

pub mod adjustments;
pub mod error;
pub mod frame_loader;
pub mod output;
pub mod store_loader;

pub use adjustments::{Adjustment, AdjustmentSchedule};
pub use error::LoaderError;
pub use frame_loader::{split_adjustments, FrameLoader, SourceFrame};
pub use output::{AdjustedColumn, LoadedColumns};
pub use store_loader::{open_store_dataset, StoreLoader};

use async_trait::async_trait;
use core_types::{BoundColumn, Domain, QueryGrid};
use ndarray::Array2;

/// A source of column data for the computation engine.
///
/// Loaders are stateless between calls: `load` never mutates the loader and
/// concurrent calls each get their own output arrays.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    /// Loads `columns` onto `grid`.
    ///
    /// `mask` has the grid's shape; a `false` cell always comes back as the
    /// column's missing value.
    async fn load(
        &self,
        domain: &Domain,
        columns: &[BoundColumn],
        grid: &QueryGrid,
        mask: &Array2<bool>,
    ) -> Result<LoadedColumns, LoaderError>;
}

pub(crate) fn check_mask(grid: &QueryGrid, mask: &Array2<bool>) -> Result<(), LoaderError> {
    if mask.dim() != grid.shape() {
        return Err(LoaderError::InvalidRequest(format!(
            "mask has shape {:?} but the grid is {:?}",
            mask.dim(),
            grid.shape()
        )));
    }
    Ok(())
}
