//! Display formatting for CLI output
//!
//! Validation reports are grouped by severity, errors first.

use console::style;
use kbundle_csv::{BundleFiles, Severity, ValidationIssue, ValidationReport};

/// Print every issue of a report under a file heading
pub fn display_report(file: &str, report: &ValidationReport) {
    if report.is_empty() {
        return;
    }

    println!();
    println!("{}", style(file).cyan().bold());

    let mut issues: Vec<&ValidationIssue> = report.issues.iter().collect();
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));

    for issue in issues {
        let icon = match issue.severity {
            Severity::Error => style("✗").red(),
            Severity::Warning => style("⚠").yellow(),
        };

        let path_display = if issue.path.is_empty() {
            String::new()
        } else {
            format!(" at {}", style(&issue.path).dim())
        };

        println!("  {} {}{}", icon, issue.message, path_display);
    }
}

/// Print summary line
pub fn print_summary(report: &ValidationReport) {
    let (errors, warnings) = report.summary();
    println!();
    if errors > 0 {
        println!(
            "{} Validation failed: {} error(s), {} warning(s)",
            style("✗").red().bold(),
            errors,
            warnings
        );
    } else if warnings > 0 {
        println!(
            "{} Validation passed with {} warning(s)",
            style("⚠").yellow().bold(),
            warnings
        );
    } else {
        println!("{} Validation passed!", style("✓").green().bold());
    }
}

/// List the files of a written bundle
pub fn print_bundle(files: &BundleFiles) {
    println!(
        "  {} {}",
        style("✓").green(),
        files.descriptor.display()
    );
    for path in files.crds.iter().chain(files.standalone.iter()) {
        println!("  {} {}", style("✓").green(), path.display());
    }
}
