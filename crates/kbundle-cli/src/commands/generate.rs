//! Generate command - build a bundle descriptor from operator manifests

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use console::style;
use kbundle_core::Manifests;
use kbundle_csv::{Generator, find_base, load_base, write_bundle, write_descriptor};

use crate::config::ProjectConfig;
use crate::display;
use crate::error::{CliError, Result};

#[derive(Args, Debug, Clone, Default)]
pub struct GenerateArgs {
    /// Project config file (default: ./kbundle.yaml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Package name
    #[arg(short, long, env = "KBUNDLE_PACKAGE")]
    pub package: Option<String>,

    /// Directory of manifests to collect
    #[arg(short, long, conflicts_with = "stdin")]
    pub manifests_dir: Option<PathBuf>,

    /// Read manifests from stdin instead of a directory
    #[arg(long)]
    pub stdin: bool,

    /// Directory holding the CRDs
    #[arg(long)]
    pub crds_dir: Option<PathBuf>,

    /// Version of the generated descriptor
    #[arg(long = "version", value_name = "VERSION")]
    pub bundle_version: Option<String>,

    /// Version the generated descriptor replaces
    #[arg(long)]
    pub from_version: Option<String>,

    /// Service accounts treated like the deployments' own
    #[arg(long, value_delimiter = ',')]
    pub extra_service_accounts: Vec<String>,

    /// Baseline descriptor file
    ///
    /// Without it, the descriptor already in --output-dir is the baseline,
    /// then a ClusterServiceVersion found among the manifests (such as
    /// config/manifests/bases), then a minimal default.
    #[arg(long)]
    pub base: Option<PathBuf>,

    /// Write the whole bundle here instead of the descriptor to stdout
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

pub fn run(args: &GenerateArgs) -> Result<()> {
    let config = ProjectConfig::load(args.config.as_deref())?;

    let package = args
        .package
        .clone()
        .or(config.package_name)
        .ok_or_else(|| {
            CliError::usage(
                "no package name given",
                "pass --package, set KBUNDLE_PACKAGE or add packageName to kbundle.yaml",
            )
        })?;
    let output_dir = args.output_dir.clone().or(config.output_dir);
    let crds_dir = args.crds_dir.clone().or(config.crds_dir);
    let extra_service_accounts = if args.extra_service_accounts.is_empty() {
        config.extra_service_accounts
    } else {
        args.extra_service_accounts.clone()
    };

    // Progress goes to stdout only when stdout is not the descriptor itself
    let verbose = output_dir.is_some();
    let manifests = if args.stdin {
        if let Some(crds_dir) = &crds_dir {
            tracing::warn!(
                crds_dir = %crds_dir.display(),
                "CRDs are read inline from stdin, ignoring the CRD directory"
            );
        }
        Manifests::from_reader(std::io::stdin().lock())?
    } else {
        let manifests_dir = args
            .manifests_dir
            .clone()
            .or(config.manifests_dir)
            .ok_or_else(|| {
                CliError::usage(
                    "no manifests directory given",
                    "pass --manifests-dir or --stdin, or add manifestsDir to kbundle.yaml",
                )
            })?;
        if verbose {
            println!(
                "{} Collecting manifests from {}",
                style("→").blue(),
                manifests_dir.display()
            );
        }
        Manifests::from_dirs(&manifests_dir, crds_dir.as_deref())?
    };
    tracing::debug!(documents = manifests.len(), "manifests collected");

    let mut builder = Generator::builder(&package).extra_service_accounts(extra_service_accounts);
    if let Some(version) = &args.bundle_version {
        builder = builder.version(version);
    }
    if let Some(from_version) = &args.from_version {
        builder = builder.from_version(from_version);
    }

    let base = match (&args.base, &output_dir) {
        (Some(path), _) => Some(load_base(path)?),
        (None, Some(dir)) => {
            let base = find_base(dir, &package)?;
            if base.is_some() {
                tracing::info!(
                    dir = %dir.display(),
                    "using the descriptor of the previous bundle as baseline"
                );
            }
            base
        }
        (None, None) => None,
    };
    if let Some(base) = base {
        builder = builder.base(base);
    }

    let generation = builder.build()?.generate(&manifests)?;

    match output_dir {
        None => {
            let mut stdout = std::io::stdout().lock();
            write_descriptor(&mut stdout, &generation.descriptor)?;
            stdout.flush()?;
        }
        Some(dir) => {
            println!(
                "{} Writing bundle for {} to {}",
                style("→").blue(),
                generation.descriptor.name(),
                dir.display()
            );
            let files = write_bundle(&dir, &generation, &manifests)?;
            display::print_bundle(&files);

            let (_, warnings) = generation.report.summary();
            println!();
            if warnings > 0 {
                println!(
                    "{} Generated {} file(s) with {} warning(s)",
                    style("⚠").yellow().bold(),
                    files.count(),
                    warnings
                );
            } else {
                println!(
                    "{} Generated {} file(s)",
                    style("✓").green().bold(),
                    files.count()
                );
            }
        }
    }

    Ok(())
}
