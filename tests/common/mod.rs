//! Shared integration-test helpers: building schedulers from inline YAML,
//! capturing the event stream, and running the `signalman` binary.

#![allow(dead_code)]

use std::io::Write;
use std::process::Output;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use signalman::config::ConfigLoader;
use signalman::observability::EventEmitter;
use signalman::scheduler::Scheduler;
use signalman::signal::{Actuator, LightColor, RecordingActuator};
use tokio::task::JoinHandle;

/// Two conflicting phases, 3s green / 1s yellow, one light each, plus a
/// pole on road `r` that no phase drives.
pub const TWO_PHASE: &str = r"
intersection:
  name: scenario
  emergency_duration: 10s
poles:
  - { id: pole-1, road: main, direction: north, lights: [l1] }
  - { id: pole-2, road: cross, direction: east, lights: [l2] }
  - { id: pole-r, road: r, direction: south, lights: [r1, r2] }
phases:
  - { id: p1, green: 3s, yellow: 1s, lights: [l1] }
  - { id: p2, green: 3s, yellow: 1s, lights: [l2] }
";

/// Loads `yaml` through the regular loader and builds a scheduler over a
/// recording actuator.
pub fn scheduler_from_yaml(yaml: &str) -> (Arc<Scheduler>, Arc<RecordingActuator>) {
    scheduler_with_events(yaml, Arc::new(EventEmitter::noop()))
}

/// Same as [`scheduler_from_yaml`] with a caller-supplied event emitter.
pub fn scheduler_with_events(
    yaml: &str,
    events: Arc<EventEmitter>,
) -> (Arc<Scheduler>, Arc<RecordingActuator>) {
    let loaded = ConfigLoader::with_defaults()
        .load_from_str(yaml)
        .expect("fixture config should load");
    let recorder = Arc::new(RecordingActuator::new());
    let actuator: Arc<dyn Actuator> = recorder.clone();
    let scheduler = Scheduler::from_config(&loaded.config, actuator)
        .expect("fixture config should build")
        .with_events(events);
    (Arc::new(scheduler), recorder)
}

/// Spawns `scheduler.start()` on the test runtime.
pub fn spawn_scheduler(
    scheduler: &Arc<Scheduler>,
) -> JoinHandle<Result<(), signalman::error::SchedulerError>> {
    let scheduler = Arc::clone(scheduler);
    tokio::spawn(async move { scheduler.start().await })
}

/// Advances paused time by whole seconds, letting spawned tasks run.
pub async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// Asserts every light shows `color`.
pub fn assert_lights(recorder: &RecordingActuator, lights: &[&str], color: LightColor) {
    for light in lights {
        assert_eq!(
            recorder.color(light),
            Some(color),
            "light {light} should be {color}"
        );
    }
}

// ============================================================================
// Event capture
// ============================================================================

/// In-memory writer for capturing the JSONL event stream.
#[derive(Clone, Default)]
pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    /// Creates an emitter writing into a fresh capture buffer.
    pub fn emitter() -> (Arc<EventEmitter>, Self) {
        let writer = Self::default();
        (Arc::new(EventEmitter::new(Box::new(writer.clone()))), writer)
    }

    /// Parsed events written so far.
    pub fn events(&self) -> Vec<serde_json::Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    /// Event `type` tags in emission order.
    pub fn types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Binary
// ============================================================================

/// Runs the `signalman` binary to completion.
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_signalman"))
        .args(args)
        .env_remove("SIGNALMAN_LOG_LEVEL")
        .output()
        .expect("failed to spawn signalman")
}
