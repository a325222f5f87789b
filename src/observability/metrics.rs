//! Metrics collection for `signalman`.
//!
//! Counters, gauges, and histograms recorded through the `metrics` facade.
//! The Prometheus recorder is installed without an HTTP listener; the
//! snapshot is rendered on demand and written to a file at shutdown.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::SignalmanError;

/// Handle of the installed recorder; set once per process.
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Maximum length for labels derived from configuration ids.
const MAX_LABEL_LEN: usize = 64;

/// Installs the global Prometheus recorder.
///
/// Repeated calls return the handle of the first installation.
///
/// # Errors
///
/// Returns `SignalmanError::Io` if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, SignalmanError> {
    if let Some(handle) = RECORDER.get() {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SignalmanError::Io(std::io::Error::other(e.to_string())))?;
    describe_metrics();

    Ok(RECORDER.get_or_init(|| handle).clone())
}

/// Renders the current Prometheus text snapshot, if a recorder is installed.
#[must_use]
pub fn render() -> Option<String> {
    RECORDER.get().map(PrometheusHandle::render)
}

/// Writes the current snapshot to `path`.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_snapshot(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, render().unwrap_or_default())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "signalman_phase_transitions_total",
        "Total number of phase state changes"
    );
    describe_counter!(
        "signalman_actuation_failures_total",
        "Light commands that failed"
    );
    describe_gauge!(
        "signalman_active_phases",
        "Number of phases currently showing green"
    );
    describe_counter!("signalman_cycles_total", "Completed scheduler cycles");
    describe_histogram!(
        "signalman_cycle_duration_ms",
        "Wall time of one complete cycle in milliseconds"
    );
    describe_counter!(
        "signalman_emergencies_total",
        "Emergency green requests served"
    );
    describe_histogram!(
        "signalman_preemption_latency_ms",
        "Time from emergency request until every phase is inactive"
    );
    describe_histogram!(
        "signalman_lock_wait_ms",
        "Time spent waiting for the registry lock"
    );
    describe_counter!(
        "signalman_scheduler_restarts_total",
        "Scheduler restarts after a failure"
    );
}

/// Records a phase state change.
pub fn record_phase_transition(phase_id: &str, from: &'static str, to: &'static str) {
    counter!(
        "signalman_phase_transitions_total",
        "phase" => sanitize_label(phase_id),
        "from" => from,
        "to" => to,
    )
    .increment(1);
}

/// Records a failed light command for a phase.
pub fn record_actuation_failure(phase_id: &str) {
    counter!("signalman_actuation_failures_total", "phase" => sanitize_label(phase_id))
        .increment(1);
}

/// Sets the number of Active phases.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_phases(count: usize) {
    gauge!("signalman_active_phases").set(count as f64);
}

/// Records a completed cycle.
pub fn record_cycle_completed(duration: Duration) {
    counter!("signalman_cycles_total").increment(1);
    histogram!("signalman_cycle_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records a served emergency and how long clearance took.
pub fn record_emergency(road: &str, clearance: Duration) {
    counter!("signalman_emergencies_total", "road" => sanitize_label(road)).increment(1);
    histogram!("signalman_preemption_latency_ms").record(clearance.as_secs_f64() * 1000.0);
}

/// Records time spent waiting for the registry lock.
pub fn record_lock_wait(operation: &'static str, waited: Duration) {
    histogram!("signalman_lock_wait_ms", "operation" => operation)
        .record(waited.as_secs_f64() * 1000.0);
}

/// Records a scheduler restart.
pub fn record_scheduler_restart() {
    counter!("signalman_scheduler_restarts_total").increment(1);
}

/// Sanitizes a configuration id for use as a metrics label.
///
/// Truncates to [`MAX_LABEL_LEN`] characters and replaces any character
/// invalid in Prometheus labels with an underscore.
fn sanitize_label(name: &str) -> String {
    name.chars()
        .take(MAX_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_simple_ids() {
        assert_eq!(sanitize_label("northGreen"), "northGreen");
        assert_eq!(sanitize_label("north-road_1"), "north-road_1");
    }

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_label("a b/c"), "a_b_c");
    }

    #[test]
    fn sanitize_truncates_long_ids() {
        assert_eq!(sanitize_label(&"x".repeat(500)).len(), MAX_LABEL_LEN);
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_phase_transition("p1", "inactive", "active");
        record_actuation_failure("p1");
        set_active_phases(2);
        record_cycle_completed(Duration::from_secs(12));
        record_emergency("north-road", Duration::from_secs(1));
        record_lock_wait("cycle", Duration::from_millis(3));
        record_scheduler_restart();
    }
}
