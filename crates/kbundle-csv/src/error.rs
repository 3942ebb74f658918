//! Error types for kbundle-csv

use thiserror::Error;

/// Result type for descriptor generation
pub type Result<T> = std::result::Result<T, CsvError>;

/// Errors that can occur while generating or writing a descriptor
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CsvError {
    /// Manifest collection failed
    #[error(transparent)]
    Core(#[from] kbundle_core::CoreError),

    /// Version string is not strict semver
    #[error("invalid {field} {value:?}: {message}")]
    InvalidVersion {
        field: String,
        value: String,
        message: String,
    },

    /// Explicitly requested base descriptor does not exist
    #[error("base ClusterServiceVersion not found: {path}")]
    BaseNotFound { path: String },

    /// Base descriptor could not be parsed
    #[error("invalid base ClusterServiceVersion: {0}")]
    InvalidBase(String),

    /// Generated descriptor failed validation
    #[error("invalid generated ClusterServiceVersion ({} error(s)):\n  - {}", .errors.len(), .errors.join("\n  - "))]
    InvalidDescriptor { errors: Vec<String> },

    /// Two standalone objects map to the same bundle file
    #[error("bundle file {file} would be written twice")]
    BundleFileCollision { file: String },

    /// Embedded validation schema could not be compiled
    #[error("invalid descriptor schema: {0}")]
    Schema(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid generator configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CsvError {
    fn from(e: serde_json::Error) -> Self {
        CsvError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CsvError {
    fn from(e: serde_yaml::Error) -> Self {
        CsvError::Serialization(e.to_string())
    }
}
