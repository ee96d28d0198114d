use crate::request::FetchStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Environment override error: {0}")]
    Environment(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Statistics store is corrupt: {0}")]
    StoreCorruption(String),

    #[error("Statistics store write failed: {0}")]
    StoreWrite(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: FetchStatus, to: FetchStatus },

    #[error("Pipeline is shutting down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
