//! `validate` command
//!
//! Loads each configuration file, runs the validator, and builds the phase
//! registry and topology without starting anything.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::SignalmanError;
use crate::scheduler::Scheduler;
use crate::signal::LoggingActuator;

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    intersection: String,
    phases: usize,
    poles: usize,
    warnings: Vec<String>,
}

/// Validate configuration files.
///
/// # Errors
///
/// Returns the first loading, validation, or build error encountered.
pub fn run(args: &ValidateArgs) -> Result<(), SignalmanError> {
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });

    let mut reports = Vec::with_capacity(args.files.len());
    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let report = validate_file(&loader, path)?;
        tracing::info!(file = %path.display(), "configuration valid");
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => {
            for r in &reports {
                println!(
                    "{}: ok ({}, {} phases, {} poles)",
                    r.file, r.intersection, r.phases, r.poles
                );
                for w in &r.warnings {
                    println!("  warning: {w}");
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }
    Ok(())
}

fn validate_file(loader: &ConfigLoader, path: &Path) -> Result<FileReport, SignalmanError> {
    let loaded = loader.load(path)?;

    // registry-level checks the schema validator does not cover
    Scheduler::from_config(&loaded.config, Arc::new(LoggingActuator::new()))?;

    Ok(FileReport {
        file: path.display().to_string(),
        intersection: loaded.config.intersection.name.clone(),
        phases: loaded.config.phases.len(),
        poles: loaded.config.poles.len(),
        warnings: loaded
            .warnings
            .iter()
            .map(|w| match &w.location {
                Some(loc) => format!("{} at {loc}", w.message),
                None => w.message.clone(),
            })
            .collect(),
    })
}
