use crate::error::{StoreError, StoreResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File extension of every store file under a catalog root.
pub const STORE_EXTENSION: &str = "db";

/// How a store file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Creates the file; used only by `create`.
    Create,
    /// Opens an existing file for writing.
    ReadWrite,
    /// Opens an existing file for reading. Readers never block each other.
    ReadOnly,
}

/// The file that holds the store `code` under `root`.
pub fn store_path(root: &Path, code: &str) -> PathBuf {
    root.join(format!("{}.{}", code, STORE_EXTENSION))
}

/// Store codes are lowercase letters, digits and hyphens.
pub fn validate_code(code: &str) -> Result<(), StoreError> {
    if code.is_empty() {
        return Err(StoreError::Configuration(
            "Store code cannot be empty".to_string(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(StoreError::Configuration(format!(
            "Store code '{}' must contain only lowercase letters, numbers, and hyphens",
            code
        )));
    }
    Ok(())
}

/// Opens a single connection to the store file at `path`.
///
/// Connections are short-lived: callers open one per operation and close it
/// when the operation ends.
pub async fn open(path: &Path, mode: OpenMode) -> Result<SqliteConnection, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(mode == OpenMode::Create)
        .read_only(mode == OpenMode::ReadOnly)
        .busy_timeout(Duration::from_secs(5));

    options
        .connect()
        .await
        .context(&format!("opening {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_lowercase_alphanumeric_and_hyphen() {
        assert!(validate_code("fundamentals-daily").is_ok());
        assert!(validate_code("db1").is_ok());
        for bad in ["", "Test-DB", "test_db", "a b", "x.db"] {
            assert!(
                matches!(validate_code(bad), Err(StoreError::Configuration(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn one_file_per_code() {
        let path = store_path(Path::new("/data/custom"), "my-data");
        assert_eq!(path, PathBuf::from("/data/custom/my-data.db"));
    }
}
