//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - the descriptor failed validation
pub const VALIDATION_ERROR: i32 = 2;

/// Manifest error - a manifest could not be read or parsed
pub const MANIFEST_ERROR: i32 = 3;

/// Config error - invalid kbundle.yaml or baseline descriptor
pub const CONFIG_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
