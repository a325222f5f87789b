//! Structured event stream for `signalman`.
//!
//! Discrete, typed events emitted while the controller runs. Events are
//! serialized as newline-delimited JSON (JSONL) with a run id and a
//! monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::schema::RoadDirection;
use crate::phase::PhaseState;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// Why the controller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Shutdown was requested (signal or caller).
    Shutdown,
    /// The configured number of cycles completed.
    CycleLimit,
    /// The scheduler kept failing and the restart budget ran out.
    Failed,
}

/// A discrete event emitted during a controller run.
///
/// Each variant is tagged with `"type"` when serialized to JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The controller started cycling.
    ControllerStarted {
        /// When the controller started.
        timestamp: DateTime<Utc>,
        /// Intersection name.
        intersection: String,
        /// Number of registered phases.
        phases: usize,
        /// Number of entries in the cycle.
        cycle_length: usize,
    },

    /// The controller stopped.
    ControllerStopped {
        /// When the controller stopped.
        timestamp: DateTime<Utc>,
        /// Stop reason.
        reason: StopReason,
        /// Cycles completed over the whole run.
        cycles_completed: u64,
        /// Emergencies served over the whole run.
        emergencies: u64,
    },

    /// A phase changed state.
    PhaseChanged {
        /// When the change happened.
        timestamp: DateTime<Utc>,
        /// Phase id.
        phase_id: String,
        /// Previous state.
        from: PhaseState,
        /// New state.
        to: PhaseState,
        /// Lights whose command failed.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failed_lights: Vec<String>,
    },

    /// One pass over the cycle completed.
    CycleCompleted {
        /// When the cycle completed.
        timestamp: DateTime<Utc>,
        /// One-based cycle number.
        cycle: u64,
        /// Wall time of the pass in milliseconds.
        duration_ms: u64,
    },

    /// An emergency green started on a pole.
    EmergencyStarted {
        /// When the pole turned green.
        timestamp: DateTime<Utc>,
        /// Requested road.
        road: String,
        /// Requested approach.
        direction: RoadDirection,
        /// Pole whose lights turned green.
        pole: String,
        /// Time from request to all phases Inactive, in milliseconds.
        clearance_ms: u64,
        /// Configured hold in milliseconds.
        hold_ms: u64,
    },

    /// An emergency green ended and the pole reverted to red.
    EmergencyCleared {
        /// When the pole reverted.
        timestamp: DateTime<Utc>,
        /// Requested road.
        road: String,
        /// Requested approach.
        direction: RoadDirection,
        /// Whether shutdown cut the hold short.
        interrupted: bool,
    },

    /// The scheduler loop returned an error.
    SchedulerFailed {
        /// When the failure was observed.
        timestamp: DateTime<Utc>,
        /// Error message.
        error: String,
        /// Consecutive failure count.
        attempt: u32,
        /// Whether the controller will restart the scheduler.
        will_restart: bool,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with the run id and a sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// Identifier shared by every event of one run.
    run_id: &'a str,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped: the event stream must never
/// stop the signals.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
    run_id: String,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("run_id", &self.run_id)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Run identifier stamped on every event.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        // sequence is taken under the lock so file order matches it
        let Ok(mut w) = self.writer.lock() else {
            return;
        };
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: &self.run_id,
            event,
        };
        if let Ok(line) = serde_json::to_string(&envelope) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::noop()
    }
}

/// Converts a duration to whole milliseconds, saturating.
#[must_use]
pub fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
