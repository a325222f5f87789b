//! `run` command
//!
//! Loads a configuration (file or preset), wires the controller to a
//! logging actuator and the event stream, and runs until a signal, the
//! cycle limit, or an unrecoverable scheduler failure.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::config::loader::{ConfigLoader, LoadResult, LoaderOptions};
use crate::controller::{ControllerOptions, IntersectionController};
use crate::error::SignalmanError;
use crate::observability::events::EventEmitter;
use crate::observability::{init_metrics, metrics};
use crate::signal::{Actuator, LoggingActuator};

/// Run the controller.
///
/// # Errors
///
/// Returns a usage error if no configuration source is given, a config
/// error if it fails to load, an I/O error if an output file cannot be
/// created, or a scheduler error if the restart budget runs out.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), SignalmanError> {
    let loaded = load(args)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    if args.metrics_file.is_some() {
        init_metrics()?;
    }

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });
    let actuator: Arc<dyn Actuator> = Arc::new(LoggingActuator::new());
    let options = ControllerOptions {
        max_restarts: args.max_restarts,
        restart_backoff: args.restart_backoff,
        emergencies: args.emergencies.clone(),
    };

    let controller =
        IntersectionController::from_config(&loaded.config, actuator, events, options, args.cycles)?;

    let shutdown = controller.shutdown_token();
    let forward = tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.cancel();
    });

    let result = controller.run().await;
    forward.abort();

    if let Some(path) = &args.metrics_file {
        metrics::write_snapshot(path)?;
        tracing::info!(file = %path.display(), "metrics snapshot written");
    }

    let report = result?;
    tracing::info!(
        reason = ?report.reason,
        cycles = report.cycles_completed,
        emergencies = report.emergencies,
        restarts = report.restarts,
        "run finished"
    );
    Ok(())
}

fn load(args: &RunArgs) -> Result<LoadResult, SignalmanError> {
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });

    if let Some(path) = &args.config {
        tracing::info!(config = %path.display(), "loading configuration");
        Ok(loader.load(path)?)
    } else if let Some(name) = &args.preset {
        tracing::info!(preset = %name, "loading built-in preset");
        Ok(loader.load_preset(name)?)
    } else {
        Err(SignalmanError::Usage(
            "either --config or --preset is required".to_string(),
        ))
    }
}
