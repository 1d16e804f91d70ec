use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    ValidationError(String),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
