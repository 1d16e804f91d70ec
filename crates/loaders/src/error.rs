use core_types::CoreError;
use database::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Column {column} does not belong to dataset {dataset}")]
    WrongDataset { column: String, dataset: String },

    #[error("No data provided for column {column}. Available columns: {available}")]
    ColumnNotProvided { column: String, available: String },

    #[error("Store schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid load request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<CoreError> for LoaderError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Configuration(msg) => LoaderError::Configuration(msg),
            other => LoaderError::Configuration(other.to_string()),
        }
    }
}
