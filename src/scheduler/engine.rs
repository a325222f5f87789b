//! Scheduler loop and emergency preemption
//!
//! [`Scheduler::start`] walks the cycle, running one conflict-resolution
//! transaction per entry under the registry lock. An emergency request
//! raises the preemption signal, takes the lock once the loop lets go,
//! clears the intersection, holds the requested pole green, and then
//! clears the signal so the loop restarts from the top of the cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::MutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::schema::{IntersectionConfig, RoadDirection};
use crate::error::{ConfigError, SchedulerError, SignalmanError};
use crate::observability::events::{Event, EventEmitter, millis};
use crate::observability::metrics;
use crate::phase::{PhaseRegistry, PhaseSnapshot, Transition};
use crate::scheduler::preempt::PreemptionChannel;
use crate::scheduler::resolver::{ConflictResolver, Resolution, Wait, wait};
use crate::signal::{Actuator, LightColor, Topology};

// ============================================================================
// Options & Status
// ============================================================================

/// Runtime options for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// How long an emergency green holds.
    pub emergency_duration: Duration,
    /// Upper bound on waiting for the registry lock.
    pub lock_timeout: Duration,
    /// Stop after this many completed cycles.
    pub max_cycles: Option<u64>,
}

impl SchedulerOptions {
    /// Options taken from an intersection configuration.
    #[must_use]
    pub const fn from_config(config: &IntersectionConfig) -> Self {
        Self {
            emergency_duration: config.intersection.emergency_duration,
            lock_timeout: config.intersection.lock_timeout,
            max_cycles: None,
        }
    }
}

/// What the scheduler is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchedulerStatus {
    /// Not started, or waiting between runs.
    Idle,
    /// Resolving or holding the given phase.
    Cycling {
        /// Phase currently targeted by the cycle.
        target: String,
    },
    /// An emergency green is in progress.
    Preempted {
        /// Requested road.
        road: String,
        /// Requested approach.
        direction: RoadDirection,
    },
    /// Shut down; `start` returns immediately.
    Stopped,
}

/// Outcome of one pass over the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every entry was resolved and held.
    Completed {
        /// One-based cycle number.
        cycle: u64,
        /// Wall time of the pass.
        duration: Duration,
    },
    /// The preemption signal (or shutdown) cut the pass short.
    Interrupted {
        /// Entry being processed when the signal was seen.
        at: Option<String>,
    },
}

/// Result of a served emergency request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyReport {
    /// Pole whose lights were held green.
    pub pole: String,
    /// Phases that were yellowed by the preemption.
    pub yielded: Vec<String>,
    /// Time from the request until every phase was Inactive.
    pub clearance: Duration,
    /// How long the pole actually stayed green.
    pub held: Duration,
    /// Whether shutdown cut the emergency short.
    pub interrupted: bool,
    /// Lights that failed to switch at any point.
    pub failed_lights: Vec<String>,
}

/// Diagnostic view readable without the registry lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    /// Current status.
    pub status: SchedulerStatus,
    /// Cycles completed since construction.
    pub cycles_completed: u64,
    /// Emergencies served since construction.
    pub emergencies: u64,
    /// Every phase, in declaration order.
    pub phases: Vec<PhaseSnapshot>,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns the phase registry and drives it through the cycle.
///
/// `start` and `request_emergency_green` may run concurrently from
/// different tasks; only they mutate phases, and never at the same time.
pub struct Scheduler {
    registry: PhaseRegistry,
    topology: Topology,
    actuator: Arc<dyn Actuator>,
    options: SchedulerOptions,
    transaction: tokio::sync::Mutex<()>,
    preemption: PreemptionChannel,
    status: Mutex<SchedulerStatus>,
    running: AtomicBool,
    pending_emergencies: Mutex<u32>,
    cycles_completed: AtomicU64,
    emergencies: AtomicU64,
    events: Arc<EventEmitter>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("status", &self.status())
            .field("cycle", &self.registry.cycle())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Clears the running flag when `start` returns.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One in-flight emergency request.
///
/// The last ticket to drop clears the preemption signal, so a request that
/// gives up never releases the loop while another emergency is queued or
/// holding its pole green.
struct EmergencyTicket<'a> {
    pending: &'a Mutex<u32>,
    preemption: &'a PreemptionChannel,
}

impl<'a> EmergencyTicket<'a> {
    /// Registers a request and returns it with the number queued ahead.
    fn issue(pending: &'a Mutex<u32>, preemption: &'a PreemptionChannel) -> (Self, u32) {
        let mut count = pending.lock().unwrap_or_else(PoisonError::into_inner);
        let ahead = *count;
        *count += 1;
        preemption.raise();
        drop(count);
        (Self { pending, preemption }, ahead)
    }
}

impl Drop for EmergencyTicket<'_> {
    fn drop(&mut self) {
        let mut count = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.preemption.clear();
        }
    }
}

impl Scheduler {
    /// Creates a scheduler over an already-built registry and topology.
    #[must_use]
    pub fn new(
        registry: PhaseRegistry,
        topology: Topology,
        actuator: Arc<dyn Actuator>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry,
            topology,
            actuator,
            options,
            transaction: tokio::sync::Mutex::new(()),
            preemption: PreemptionChannel::new(CancellationToken::new()),
            status: Mutex::new(SchedulerStatus::Idle),
            running: AtomicBool::new(false),
            pending_emergencies: Mutex::new(0),
            cycles_completed: AtomicU64::new(0),
            emergencies: AtomicU64::new(0),
            events: Arc::new(EventEmitter::noop()),
        }
    }

    /// Builds registry, topology, and scheduler from a configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the phases or poles are inconsistent,
    /// or a phase drives a light that no pole carries.
    pub fn from_config(
        config: &IntersectionConfig,
        actuator: Arc<dyn Actuator>,
    ) -> Result<Self, ConfigError> {
        let topology = Topology::from_config(&config.poles)?;
        let registry = PhaseRegistry::from_config(config, &actuator)?;

        if !topology.is_empty() {
            for phase in registry.phases() {
                if let Some(light) = phase.lights().iter().find(|l| !topology.has_light(l)) {
                    return Err(ConfigError::InvalidLight {
                        light: light.clone(),
                        phase: phase.id().to_string(),
                        reason: "not mounted on any pole".to_string(),
                    });
                }
            }
        }

        Ok(Self::new(
            registry,
            topology,
            actuator,
            SchedulerOptions::from_config(config),
        ))
    }

    /// Routes events to `events` instead of discarding them.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Stops after `max_cycles` completed cycles.
    #[must_use]
    pub const fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.options.max_cycles = max_cycles;
        self
    }

    // ------------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------------

    /// Runs the cycle until stopped or the cycle limit is reached.
    ///
    /// On the way out the intersection is cleared: Active phases get a
    /// yellow window and everything ends Inactive.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::AlreadyRunning`] if another `start` is active
    /// - [`SchedulerError::LockTimeout`] if the registry lock could not be
    ///   taken within the configured bound
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        info!(
            phases = self.registry.len(),
            cycle = ?self.registry.cycle(),
            "scheduler started"
        );
        let failed = self.registry.resync();
        if !failed.is_empty() {
            warn!(lights = ?failed, "lights did not accept their initial color");
        }

        let result = self.run_loop().await;
        let cleared = self.safe_stop().await;

        if self.preemption.is_shutdown() {
            self.set_status(SchedulerStatus::Stopped);
        } else {
            self.set_status(SchedulerStatus::Idle);
        }
        info!(cycles = self.cycles_completed(), "scheduler stopped");
        result.and(cleared)
    }

    async fn run_loop(&self) -> Result<(), SchedulerError> {
        loop {
            if self.preemption.is_shutdown() {
                return Ok(());
            }
            if self
                .options
                .max_cycles
                .is_some_and(|max| self.cycles_completed() >= max)
            {
                info!(cycles = self.cycles_completed(), "cycle limit reached");
                return Ok(());
            }

            let token = self.preemption.token();
            if token.is_cancelled() {
                debug!("waiting for preemption to clear");
                self.preemption.wait_cleared().await;
                continue;
            }

            if let CycleOutcome::Completed { duration, .. } = self.run_cycle(&token).await? {
                if duration.is_zero() {
                    self.idle_hold(&token).await;
                }
            }
        }
    }

    /// Runs one pass over the cycle with the given preemption token.
    ///
    /// The token is checked before each entry and observed by every wait
    /// inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::LockTimeout`] if the registry lock could
    /// not be taken in time.
    pub async fn run_cycle(&self, token: &CancellationToken) -> Result<CycleOutcome, SchedulerError> {
        let started = Instant::now();

        for id in self.registry.cycle() {
            if token.is_cancelled() {
                return Ok(CycleOutcome::Interrupted {
                    at: Some(id.clone()),
                });
            }
            let Some(phase) = self.registry.get(id) else {
                continue;
            };

            let guard = tokio::select! {
                biased;
                () = token.cancelled() => None,
                guard = self.lock_registry("cycle") => Some(guard?),
            };
            let Some(_guard) = guard else {
                return Ok(CycleOutcome::Interrupted {
                    at: Some(id.clone()),
                });
            };

            self.set_status(SchedulerStatus::Cycling { target: id.clone() });
            let resolution = ConflictResolver::new(&self.registry)
                .resolve(phase, token)
                .await;
            self.publish_transitions(&resolution.transitions);

            if !resolution.completed() {
                debug!(phase = %id, stage = ?resolution.interrupted, "cycle interrupted");
                return Ok(CycleOutcome::Interrupted {
                    at: Some(id.clone()),
                });
            }
            self.check_clique(&resolution);
        }

        let cycle = self.cycles_completed.fetch_add(1, Ordering::SeqCst) + 1;
        let duration = started.elapsed();
        metrics::record_cycle_completed(duration);
        info!(cycle, duration = ?duration, "cycle completed");
        self.events.emit(Event::CycleCompleted {
            timestamp: Utc::now(),
            cycle,
            duration_ms: millis(duration),
        });
        Ok(CycleOutcome::Completed { cycle, duration })
    }

    /// Waits before the next pass when a whole pass held nothing.
    ///
    /// Happens only when every cycle entry was already green with its
    /// time spent, i.e. nothing in the cycle conflicts.
    async fn idle_hold(&self, token: &CancellationToken) {
        let shortest = self
            .registry
            .cycle()
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|p| p.timing().green)
            .filter(|g| !g.is_zero())
            .min()
            .unwrap_or(Duration::from_secs(1));
        debug!(hold = ?shortest, "no conflicts in cycle; holding");
        let _ = wait(shortest, token).await;
    }

    /// Yellows whatever is still green and turns everything red.
    async fn safe_stop(&self) -> Result<(), SchedulerError> {
        let _guard = self.lock_registry("stop").await?;
        let clearance = ConflictResolver::new(&self.registry)
            .clear_all(&CancellationToken::new())
            .await;
        self.publish_transitions(&clearance.transitions);
        Ok(())
    }

    fn check_clique(&self, resolution: &Resolution) {
        if let Some((a, b)) = self.registry.conflicting_active_pair() {
            error!(
                phase = %resolution.target,
                first = %a,
                second = %b,
                "conflicting phases active together"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Emergency
    // ------------------------------------------------------------------------

    /// Preempts the cycle and holds the pole serving `road` from
    /// `direction` green for the configured emergency duration.
    ///
    /// Returns once the pole is back to red and the loop has been told to
    /// resume. Shutdown cuts the hold short. Requests made while another
    /// emergency is in flight queue behind it; the loop resumes only after
    /// the last of them.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownRoad`] if no pole serves the approach; the
    ///   running cycle is left untouched
    /// - [`SchedulerError::Stopped`] if the scheduler has been shut down
    /// - [`SchedulerError::LockTimeout`] if the registry lock was not
    ///   released in time; the cycle resumes unless another emergency
    ///   is still in flight
    pub async fn request_emergency_green(
        &self,
        road: &str,
        direction: RoadDirection,
    ) -> Result<EmergencyReport, SignalmanError> {
        let pole = self.topology.pole(road, direction)?.clone();
        if self.is_stopped() {
            return Err(SchedulerError::Stopped.into());
        }
        let requested = Instant::now();
        info!(road, %direction, pole = %pole.id, "emergency requested");

        let (ticket, ahead) = EmergencyTicket::issue(&self.pending_emergencies, &self.preemption);
        let patience = self.emergency_patience(ahead);
        let guard = match self.lock_registry_within("emergency", patience).await {
            Ok(guard) => guard,
            Err(e) => {
                error!(road, %direction, error = %e, "emergency abandoned");
                return Err(e.into());
            }
        };
        if self.is_stopped() {
            return Err(SchedulerError::Stopped.into());
        }
        self.set_status(SchedulerStatus::Preempted {
            road: road.to_string(),
            direction,
        });

        let shutdown = self.preemption.shutdown_token().clone();
        let clearance = ConflictResolver::new(&self.registry)
            .clear_all(&shutdown)
            .await;
        self.publish_transitions(&clearance.transitions);
        let cleared_after = requested.elapsed();
        metrics::record_emergency(road, cleared_after);

        let mut failed_lights = self.drive_pole(&pole.lights, LightColor::Green);
        let green_at = Instant::now();
        info!(road, %direction, pole = %pole.id, hold = ?self.options.emergency_duration, "emergency green");
        self.events.emit(Event::EmergencyStarted {
            timestamp: Utc::now(),
            road: road.to_string(),
            direction,
            pole: pole.id.clone(),
            clearance_ms: millis(cleared_after),
            hold_ms: millis(self.options.emergency_duration),
        });

        let interrupted = clearance.interrupted.is_some()
            || wait(self.options.emergency_duration, &shutdown).await == Wait::Cancelled;
        let held = green_at.elapsed();

        failed_lights.extend(self.drive_pole(&pole.lights, LightColor::Red));
        self.emergencies.fetch_add(1, Ordering::SeqCst);
        self.events.emit(Event::EmergencyCleared {
            timestamp: Utc::now(),
            road: road.to_string(),
            direction,
            interrupted,
        });
        info!(road, %direction, held = ?held, interrupted, "emergency cleared");

        self.set_status(SchedulerStatus::Idle);
        drop(ticket);
        drop(guard);

        failed_lights.sort_unstable();
        failed_lights.dedup();
        Ok(EmergencyReport {
            pole: pole.id,
            yielded: clearance.yielded,
            clearance: cleared_after,
            held,
            interrupted,
            failed_lights,
        })
    }

    /// Lock wait for an emergency with `ahead` requests queued before it.
    ///
    /// Each of those may hold the lock for its clearance and green, so the
    /// plain lock timeout is extended by one emergency duration per request.
    fn emergency_patience(&self, ahead: u32) -> Duration {
        self.options
            .emergency_duration
            .saturating_mul(ahead)
            .saturating_add(self.options.lock_timeout)
    }

    fn drive_pole(&self, lights: &[String], color: LightColor) -> Vec<String> {
        let mut failed = Vec::new();
        for light in lights {
            if let Err(e) = self.actuator.set_color(light, color) {
                warn!(light = %light, %color, error = %e, "emergency actuation failed");
                failed.push(light.clone());
            }
        }
        failed
    }

    // ------------------------------------------------------------------------
    // Control & diagnostics
    // ------------------------------------------------------------------------

    /// Requests shutdown; every wait returns and `start` winds down.
    pub fn stop(&self) {
        info!("scheduler stop requested");
        self.preemption.shutdown();
    }

    /// Returns `true` once `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.preemption.is_shutdown()
    }

    /// Returns `true` while `start` is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns `true` while an emergency holds the preemption signal.
    #[must_use]
    pub fn is_preempted(&self) -> bool {
        self.preemption.is_raised() && !self.preemption.is_shutdown()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cycles completed since construction.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    /// Emergencies served since construction.
    #[must_use]
    pub fn emergencies(&self) -> u64 {
        self.emergencies.load(Ordering::SeqCst)
    }

    /// Diagnostic view built from per-phase locks only.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            status: self.status(),
            cycles_completed: self.cycles_completed(),
            emergencies: self.emergencies(),
            phases: self.registry.snapshot(),
        }
    }

    /// The phase registry.
    #[must_use]
    pub const fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// The pole topology.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> SchedulerOptions {
        self.options
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn lock_registry(
        &self,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, ()>, SchedulerError> {
        self.lock_registry_within(operation, self.options.lock_timeout)
            .await
    }

    async fn lock_registry_within(
        &self,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, ()>, SchedulerError> {
        let started = Instant::now();
        let guard = tokio::time::timeout(timeout, self.transaction.lock())
            .await
            .map_err(|_| SchedulerError::LockTimeout {
                operation,
                waited: timeout,
            })?;
        let waited = started.elapsed();
        metrics::record_lock_wait(operation, waited);
        debug!(operation, waited = ?waited, "registry lock acquired");
        Ok(guard)
    }

    fn set_status(&self, status: SchedulerStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn publish_transitions(&self, transitions: &[Transition]) {
        for t in transitions {
            self.events.emit(Event::PhaseChanged {
                timestamp: Utc::now(),
                phase_id: t.phase_id.clone(),
                from: t.from,
                to: t.to,
                failed_lights: t.failed_lights.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PoleConfig;
    use crate::phase::{PhaseSpec, PhaseState};
    use crate::signal::RecordingActuator;

    const S: Duration = Duration::from_secs(1);

    fn scheduler(max_cycles: Option<u64>) -> (Arc<Scheduler>, Arc<RecordingActuator>) {
        scheduler_with(SchedulerOptions {
            emergency_duration: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(30),
            max_cycles,
        })
    }

    fn scheduler_with(options: SchedulerOptions) -> (Arc<Scheduler>, Arc<RecordingActuator>) {
        let rec = Arc::new(RecordingActuator::new());
        let act: Arc<dyn Actuator> = rec.clone();
        let registry = PhaseRegistry::builder()
            .phase(PhaseSpec::new("p1", Duration::from_secs(3), S).lights(["l1"]))
            .phase(PhaseSpec::new("p2", Duration::from_secs(3), S).lights(["l2"]))
            .build(&act)
            .unwrap();
        let topology = Topology::from_config(&[PoleConfig {
            id: "pole-r".into(),
            road: "r".into(),
            direction: RoadDirection::North,
            lights: vec!["e1".into()],
        }])
        .unwrap();
        (
            Arc::new(Scheduler::new(registry, topology, act, options)),
            rec,
        )
    }

    fn spawn_emergency(
        sched: &Arc<Scheduler>,
    ) -> tokio::task::JoinHandle<Result<EmergencyReport, SignalmanError>> {
        let sched = Arc::clone(sched);
        tokio::spawn(async move {
            sched
                .request_emergency_green("r", RoadDirection::North)
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_limit_ends_start() {
        let (sched, rec) = scheduler(Some(2));
        sched.start().await.unwrap();

        assert_eq!(sched.cycles_completed(), 2);
        assert_eq!(sched.status(), SchedulerStatus::Idle);
        assert!(sched.registry().active_ids().is_empty());
        assert_eq!(rec.color("l1"), Some(LightColor::Red));
        assert_eq!(rec.color("l2"), Some(LightColor::Red));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let (sched, _) = scheduler(None);
        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.start().await })
        };
        tokio::time::sleep(S).await;

        assert!(sched.is_running());
        assert!(matches!(
            sched.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        sched.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(sched.status(), SchedulerStatus::Stopped);
        assert!(!sched.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_tracks_target() {
        let (sched, _) = scheduler(None);
        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.start().await })
        };

        tokio::time::sleep(S).await;
        assert_eq!(
            sched.status(),
            SchedulerStatus::Cycling {
                target: "p1".into()
            }
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            sched.status(),
            SchedulerStatus::Cycling {
                target: "p2".into()
            }
        );

        sched.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_road_leaves_cycle_alone() {
        let (sched, _) = scheduler(None);
        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.start().await })
        };
        tokio::time::sleep(S).await;

        let err = sched
            .request_emergency_green("nowhere", RoadDirection::North)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalmanError::Config(ConfigError::UnknownRoad { .. })
        ));
        assert!(!sched.is_preempted());
        assert_eq!(sched.registry().active_ids(), ["p1"]);

        sched.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_without_running_loop() {
        let (sched, rec) = scheduler(None);
        let report = sched
            .request_emergency_green("r", RoadDirection::North)
            .await
            .unwrap();

        assert_eq!(report.pole, "pole-r");
        assert_eq!(report.held, Duration::from_secs(10));
        assert!(!report.interrupted);
        assert_eq!(rec.colors_for("e1"), [LightColor::Green, LightColor::Red]);
        assert!(!sched.is_preempted());
        assert_eq!(sched.emergencies(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout_reported() {
        let rec = Arc::new(RecordingActuator::new());
        let act: Arc<dyn Actuator> = rec;
        let registry = PhaseRegistry::builder()
            .phase(PhaseSpec::new("p1", S, S))
            .build(&act)
            .unwrap();
        let topology = Topology::from_config(&[PoleConfig {
            id: "pole".into(),
            road: "r".into(),
            direction: RoadDirection::East,
            lights: vec!["e".into()],
        }])
        .unwrap();
        let sched = Scheduler::new(
            registry,
            topology,
            act,
            SchedulerOptions {
                emergency_duration: S,
                lock_timeout: Duration::from_millis(100),
                max_cycles: None,
            },
        );

        let _held = sched.transaction.lock().await;
        let err = sched
            .request_emergency_green("r", RoadDirection::East)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalmanError::Scheduler(SchedulerError::LockTimeout {
                operation: "emergency",
                ..
            })
        ));
        assert!(!sched.is_preempted(), "failed request must clear the signal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_after_stop_rejected() {
        let (sched, rec) = scheduler(None);
        sched.stop();

        let err = sched
            .request_emergency_green("r", RoadDirection::North)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalmanError::Scheduler(SchedulerError::Stopped)
        ));
        assert!(rec.colors_for("e1").is_empty());
        assert_eq!(sched.emergencies(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_light_listed_once() {
        let (sched, rec) = scheduler(None);
        rec.fail_light("e1");

        let report = sched
            .request_emergency_green("r", RoadDirection::North)
            .await
            .unwrap();
        assert_eq!(report.failed_lights, ["e1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_emergency_waits_its_turn() {
        let (sched, rec) = scheduler_with(SchedulerOptions {
            emergency_duration: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(5),
            max_cycles: None,
        });
        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.start().await })
        };
        tokio::time::sleep(S).await;

        let first = spawn_emergency(&sched);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = spawn_emergency(&sched);

        assert_eq!(first.await.unwrap().unwrap().held, Duration::from_secs(60));
        assert!(sched.is_preempted(), "second request still queued");
        assert_eq!(second.await.unwrap().unwrap().held, Duration::from_secs(60));
        assert_eq!(
            rec.colors_for("e1"),
            [LightColor::Green, LightColor::Red, LightColor::Green, LightColor::Red]
        );
        assert_eq!(sched.emergencies(), 2);
        assert!(!runner.is_finished());

        sched.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_emergency_keeps_loop_preempted() {
        let (sched, rec) = scheduler_with(SchedulerOptions {
            emergency_duration: Duration::from_secs(60),
            lock_timeout: Duration::from_millis(100),
            max_cycles: None,
        });
        let runner = {
            let sched = Arc::clone(&sched);
            tokio::spawn(async move { sched.start().await })
        };
        tokio::time::sleep(S).await;

        // first: yellow 1s then green from 2s to 62s
        let first = spawn_emergency(&sched);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // second gives up at about 61.1s
        let second = spawn_emergency(&sched);
        tokio::time::sleep(Duration::from_millis(60_490)).await;

        assert!(second.is_finished());
        assert!(matches!(
            second.await.unwrap(),
            Err(SignalmanError::Scheduler(SchedulerError::LockTimeout {
                operation: "emergency",
                ..
            }))
        ));
        assert!(sched.is_preempted());
        assert_eq!(rec.color("e1"), Some(LightColor::Green));
        assert!(sched.registry().active_ids().is_empty());
        assert!(!runner.is_finished());

        tokio::time::sleep(Duration::from_secs(2)).await;
        first.await.unwrap().unwrap();
        assert!(!sched.is_preempted());
        assert_eq!(sched.registry().active_ids(), ["p1"]);

        sched.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_without_lock() {
        let (sched, _) = scheduler(None);
        let _held = sched.transaction.lock().await;
        sched
            .registry()
            .get("p2")
            .unwrap()
            .transition(PhaseState::Active);

        let snap = sched.snapshot();
        assert_eq!(snap.status, SchedulerStatus::Idle);
        assert_eq!(snap.phases.len(), 2);
        assert_eq!(snap.phases[1].state, PhaseState::Active);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"]["status"], "idle");
    }

    #[test]
    fn test_from_config_rejects_unmounted_light() {
        let yaml = r"
intersection: { name: t, emergency_duration: 1s }
poles:
  - { id: n, road: r, direction: north, lights: [n1] }
phases:
  - { id: a, green: 1s, yellow: 1s, lights: [n1, ghost] }
";
        let config: IntersectionConfig = serde_yaml::from_str(yaml).unwrap();
        let err = Scheduler::from_config(&config, Arc::new(RecordingActuator::new())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLight { ref light, .. } if light == "ghost"));
    }
}
