//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse {kind} {name:?} from {source_name}: {message}")]
    Parse {
        source_name: String,
        kind: String,
        name: String,
        message: String,
    },

    #[error("Invalid document in {source_name}: {message}")]
    InvalidDocument {
        source_name: String,
        message: String,
    },

    #[error("CRD file name collision: {first} and {second} would both be written to {file}")]
    CrdFileCollision {
        file: String,
        first: String,
        second: String,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
