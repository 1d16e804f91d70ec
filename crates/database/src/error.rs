use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store '{code}' already exists at {path}. Use drop_store() to delete it first.")]
    AlreadyExists { code: String, path: String },

    #[error("Store '{0}' does not exist")]
    NotFound(String),

    #[error(
        "Data already exists for some date/asset combinations ({0}). Use update or replace mode instead."
    )]
    Conflict(String),

    #[error("Storage error while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Store metadata is corrupt: {0}")]
    CorruptMetadata(String),
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Configuration(msg) => StoreError::Configuration(msg),
            other => StoreError::Configuration(other.to_string()),
        }
    }
}

/// Attaches what the store was doing to a low-level failure.
pub trait StoreResultExt<T> {
    fn context(self, context: &str) -> Result<T, StoreError>;
}

impl<T> StoreResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Storage {
            context: context.to_string(),
            source,
        })
    }
}

impl<T> StoreResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Io {
            context: context.to_string(),
            source,
        })
    }
}
