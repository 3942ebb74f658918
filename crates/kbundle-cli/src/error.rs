//! CLI error types with exit code handling
//!
//! Library errors are mapped onto a small set of diagnostics, each with its
//! own exit code.

use kbundle_core::CoreError;
use kbundle_csv::CsvError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid arguments or options
    #[error("{message}")]
    #[diagnostic(code(kbundle::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid project configuration or baseline descriptor
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kbundle::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A manifest could not be collected
    #[error("Manifest error: {message}")]
    #[diagnostic(code(kbundle::cli::manifest))]
    Manifest { message: String },

    /// The generated descriptor is invalid
    #[error("Validation failed: {message}")]
    #[diagnostic(code(kbundle::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// An existing descriptor failed validation
    #[error("Validation failed with {errors} error(s) and {warnings} warning(s)")]
    #[diagnostic(code(kbundle::cli::validate))]
    ValidationFailed { errors: usize, warnings: usize },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kbundle::cli::io))]
    Io { message: String },

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(kbundle::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Manifest { .. } => exit_codes::MANIFEST_ERROR,
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::ValidationFailed { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a usage error with help text
    pub fn usage(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => CliError::from(e),
            other => CliError::Manifest {
                message: other.to_string(),
            },
        }
    }
}

impl From<CsvError> for CliError {
    fn from(err: CsvError) -> Self {
        match err {
            CsvError::Core(e) => CliError::from(e),
            CsvError::Io(e) => CliError::from(e),
            CsvError::InvalidDescriptor { errors } => CliError::Validation {
                message: format!("generated descriptor has {} error(s)", errors.len()),
                help: Some(errors.join("\n")),
            },
            e @ (CsvError::InvalidVersion { .. } | CsvError::InvalidConfig(_)) => {
                CliError::Usage {
                    message: e.to_string(),
                    help: None,
                }
            }
            e @ (CsvError::BaseNotFound { .. } | CsvError::InvalidBase(_)) => CliError::Config {
                message: e.to_string(),
                help: Some("pass an existing descriptor with --base, or omit it".to_string()),
            },
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
