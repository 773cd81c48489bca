//! Error types for template loading and validation.

use thiserror::Error;

/// Errors that can occur while loading or validating templates.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Reading a template or config file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Config file extension is neither `.json` nor `.toml`.
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Articulated model topology or joint data is inconsistent.
    #[error("invalid articulated model {model}: {reason}")]
    InvalidModel {
        /// Model name.
        model: String,
        /// Reason for rejection.
        reason: String,
    },
}

/// Result type for metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;
