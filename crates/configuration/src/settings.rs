use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The root configuration structure for the custom data tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where stores live and how new ones are labelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// The catalog root: one `<code>.db` file per store.
    pub root: PathBuf,
    /// Bar size recorded on stores created without an explicit one (e.g. "1d").
    pub default_bar_size: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/custom"),
            default_bar_size: "1d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// An `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// When set, logs also go to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
        }
    }
}
