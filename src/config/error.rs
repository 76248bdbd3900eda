use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid load target: {0}")]
    InvalidTarget(String),

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsupported config type: {0}")]
    UnsupportedFormat(String),

    #[error("unable to get config keys from schema: {0}")]
    SchemaDecode(String),

    #[error("unable to bind key '{key}' to the environment: {reason}")]
    EnvironmentBind { key: String, reason: String },

    #[error("invalid value for '{key}' from {var}: {message}")]
    Decode {
        key: String,
        var: String,
        message: String,
    },

    #[error("failed to decode config at '{key}': {message}")]
    DeserializeError { key: String, message: String },
}
