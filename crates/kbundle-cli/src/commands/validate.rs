//! Validate command - check an existing bundle descriptor

use std::path::Path;

use console::style;
use kbundle_csv::DescriptorValidator;
use serde_json::Value;

use crate::display;
use crate::error::{CliError, Result};

pub fn run(file: &Path, strict: bool) -> Result<()> {
    println!("{} Validating {}", style("→").blue(), file.display());

    let content = std::fs::read_to_string(file)?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| CliError::Validation {
        message: format!("{} is not valid YAML", file.display()),
        help: Some(e.to_string()),
    })?;

    let report = DescriptorValidator::new()?.validate_value(&value);
    display::display_report(&file.display().to_string(), &report);
    display::print_summary(&report);

    let (errors, warnings) = report.summary();
    if errors > 0 || (strict && warnings > 0) {
        return Err(CliError::ValidationFailed { errors, warnings });
    }
    Ok(())
}
