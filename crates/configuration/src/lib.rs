use crate::error::ConfigError;
use crate::settings::Settings;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::{env_filter, init_tracing, LOG_FILE_PREFIX};
pub use settings::{LoggingSettings, StorageSettings};

/// Settings file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "custom-data";
/// Prefix of environment overrides, e.g. `CUSTOM_DATA__STORAGE__ROOT`.
pub const ENV_PREFIX: &str = "CUSTOM_DATA";

/// Loads the settings.
///
/// Reads `path` when given (it must exist), otherwise an optional
/// `custom-data.toml` in the working directory. `CUSTOM_DATA__*` environment
/// variables override file values, and anything left unset takes its default.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let environment = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__");
    load_settings_from(path, environment)
}

fn load_settings_from(
    path: Option<&Path>,
    environment: config::Environment,
) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let builder = config::Config::builder()
        .add_source(file)
        .add_source(environment)
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.storage.root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.root cannot be empty".to_string(),
        ));
    }
    if settings.storage.default_bar_size.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.default_bar_size cannot be empty".to_string(),
        ));
    }
    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&settings.logging.filter) {
        return Err(ConfigError::ValidationError(format!(
            "logging.filter '{}' is not a valid filter: {}",
            settings.logging.filter, e
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn no_env() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .source(Some(config::Map::new()))
    }

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom-data.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_file_and_fills_defaults() {
        let (_dir, path) = write("[storage]\nroot = \"/srv/custom\"\n");
        let settings = load_settings_from(Some(&path), no_env()).unwrap();
        assert_eq!(settings.storage.root, PathBuf::from("/srv/custom"));
        assert_eq!(settings.storage.default_bar_size, "1d");
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn environment_overrides_the_file() {
        let (_dir, path) = write("[storage]\nroot = \"/srv/custom\"\n\n[logging]\nfilter = \"warn\"\n");
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .source(Some(
                [("CUSTOM_DATA__STORAGE__ROOT".to_string(), "/tmp/stores".to_string())]
                    .into_iter()
                    .collect(),
            ));
        let settings = load_settings_from(Some(&path), env).unwrap();
        assert_eq!(settings.storage.root, PathBuf::from("/tmp/stores"));
        assert_eq!(settings.logging.filter, "warn");
    }

    #[test]
    fn explicit_path_must_exist() {
        let missing = Path::new("/definitely/not/here/custom-data.toml");
        assert!(matches!(
            load_settings_from(Some(missing), no_env()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let (_dir, path) = write("[storage]\ndefault_bar_size = \"  \"\n");
        assert!(matches!(
            load_settings_from(Some(&path), no_env()),
            Err(ConfigError::ValidationError(_))
        ));
        let (_dir, path) = write("[logging]\nfilter = \"info,store=loudest\"\n");
        assert!(matches!(
            load_settings_from(Some(&path), no_env()),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
