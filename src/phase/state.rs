//! Per-phase state machine
//!
//! A [`Phase`] owns its state, its timestamps, and the lights bound to it.
//! Every transition updates all three under the phase's own lock, so a
//! reader never sees a state whose lights have not been commanded yet.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::observability::metrics;
use crate::signal::{Actuator, LightColor};

// ============================================================================
// State & Timing
// ============================================================================

/// Signal state of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    /// Red
    #[default]
    Inactive,
    /// Green
    Active,
    /// Yellow clearance
    Yellowing,
}

impl PhaseState {
    /// Color every light bound to a phase in this state must show.
    #[must_use]
    pub const fn color(self) -> LightColor {
        match self {
            Self::Inactive => LightColor::Red,
            Self::Active => LightColor::Green,
            Self::Yellowing => LightColor::Yellow,
        }
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Yellowing => "yellowing",
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durations governing one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseTiming {
    /// Green hold.
    pub green: Duration,
    /// Yellow clearance.
    pub yellow: Duration,
    /// All-red clearance after yellow.
    pub all_red: Duration,
}

// ============================================================================
// Transition Record
// ============================================================================

/// Whether a transition changed the state or re-asserted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// New state; lights were commanded.
    Changed,
    /// Same state re-asserted; only `last_extended` moved.
    Extended,
}

/// Record of one call to [`Phase::transition`].
#[derive(Debug, Clone)]
pub struct Transition {
    /// Phase that transitioned.
    pub phase_id: String,
    /// State before the call.
    pub from: PhaseState,
    /// State after the call.
    pub to: PhaseState,
    /// Changed or extended.
    pub kind: TransitionKind,
    /// Lights whose command failed. The logical state moved regardless.
    pub failed_lights: Vec<String>,
}

impl Transition {
    /// Returns `true` if the state actually changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.kind == TransitionKind::Changed
    }
}

/// Point-in-time view of a phase, readable without the registry lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSnapshot {
    /// Phase id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: PhaseState,
    /// Color the phase's lights show.
    pub color: LightColor,
    /// Time spent in the current state.
    #[serde(rename = "in_state_ms", serialize_with = "as_millis")]
    pub in_state: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Phase
// ============================================================================

struct PhaseInner {
    state: PhaseState,
    started_at: Instant,
    last_extended: Option<Instant>,
}

/// One signal group with its own timing, concurrency set, and lights.
pub struct Phase {
    id: String,
    name: String,
    timing: PhaseTiming,
    /// Declared order is kept for deterministic companion activation.
    concurrent_with: Vec<String>,
    concurrent_lookup: BTreeSet<String>,
    lights: Vec<String>,
    actuator: Arc<dyn Actuator>,
    inner: Mutex<PhaseInner>,
}

impl Phase {
    /// Creates an inactive phase.
    ///
    /// Self-references and duplicates in `concurrent_with` are dropped.
    /// No light is commanded until the first transition or
    /// [`resync`](Self::resync).
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        timing: PhaseTiming,
        concurrent_with: Vec<String>,
        lights: Vec<String>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        let id = id.into();
        let mut concurrent_lookup = BTreeSet::new();
        let concurrent_with: Vec<String> = concurrent_with
            .into_iter()
            .filter(|other| *other != id && concurrent_lookup.insert(other.clone()))
            .collect();

        Self {
            id,
            name: name.into(),
            timing,
            concurrent_with,
            concurrent_lookup,
            lights,
            actuator,
            inner: Mutex::new(PhaseInner {
                state: PhaseState::Inactive,
                started_at: Instant::now(),
                last_extended: None,
            }),
        }
    }

    /// Phase id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timing parameters.
    #[must_use]
    pub const fn timing(&self) -> PhaseTiming {
        self.timing
    }

    /// Ids of phases that may be Active together with this one, in
    /// declaration order.
    #[must_use]
    pub fn concurrent_with(&self) -> &[String] {
        &self.concurrent_with
    }

    /// Returns `true` if `other_id` is declared concurrent with this phase.
    #[must_use]
    pub fn is_concurrent_with(&self, other_id: &str) -> bool {
        self.concurrent_lookup.contains(other_id)
    }

    /// Lights bound to this phase.
    #[must_use]
    pub fn lights(&self) -> &[String] {
        &self.lights
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PhaseState {
        self.lock().state
    }

    /// When the current state was entered.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.lock().started_at
    }

    /// When the current state was last re-asserted, if ever.
    #[must_use]
    pub fn last_extended(&self) -> Option<Instant> {
        self.lock().last_extended
    }

    /// Time spent in the current state.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().started_at.elapsed()
    }

    /// Green time left if the phase is Active, `None` otherwise.
    #[must_use]
    pub fn remaining_green(&self) -> Option<Duration> {
        let inner = self.lock();
        (inner.state == PhaseState::Active)
            .then(|| self.timing.green.saturating_sub(inner.started_at.elapsed()))
    }

    /// Moves the phase to `to`.
    ///
    /// Re-asserting the current state is an extension: only
    /// `last_extended` moves and no light is commanded. Any other target
    /// resets `started_at`, clears `last_extended`, and commands every
    /// bound light to the matching color before the lock is released.
    /// Light failures are logged and reported in the returned record but
    /// never undo the state change.
    pub fn transition(&self, to: PhaseState) -> Transition {
        let mut inner = self.lock();
        let from = inner.state;
        let now = Instant::now();

        if from == to {
            inner.last_extended = Some(now);
            debug!(phase = %self.id, state = %to, "phase extended");
            return Transition {
                phase_id: self.id.clone(),
                from,
                to,
                kind: TransitionKind::Extended,
                failed_lights: Vec::new(),
            };
        }

        inner.state = to;
        inner.started_at = now;
        inner.last_extended = None;
        let failed_lights = self.drive_lights(to.color());
        drop(inner);

        info!(phase = %self.id, %from, %to, "phase transition");
        metrics::record_phase_transition(&self.id, from.as_str(), to.as_str());

        Transition {
            phase_id: self.id.clone(),
            from,
            to,
            kind: TransitionKind::Changed,
            failed_lights,
        }
    }

    /// Re-issues the color matching the current state to every light.
    ///
    /// Recovery path after actuation failures or a foreign write to the
    /// lights (for example an emergency hold). Returns the lights that
    /// failed again.
    pub fn resync(&self) -> Vec<String> {
        let inner = self.lock();
        self.drive_lights(inner.state.color())
    }

    /// Returns a point-in-time view of the phase.
    #[must_use]
    pub fn snapshot(&self) -> PhaseSnapshot {
        let inner = self.lock();
        PhaseSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: inner.state,
            color: inner.state.color(),
            in_state: inner.started_at.elapsed(),
        }
    }

    /// Commands every bound light; the caller holds the state lock.
    fn drive_lights(&self, color: LightColor) -> Vec<String> {
        let mut failed = Vec::new();
        for light in &self.lights {
            if let Err(e) = self.actuator.set_color(light, color) {
                warn!(phase = %self.id, light = %light, %color, error = %e, "actuation failed");
                metrics::record_actuation_failure(&self.id);
                failed.push(light.clone());
            }
        }
        failed
    }

    fn lock(&self) -> MutexGuard<'_, PhaseInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("concurrent_with", &self.concurrent_with)
            .field("lights", &self.lights)
            .finish_non_exhaustive()
    }
}
