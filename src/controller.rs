//! Intersection controller
//!
//! Process-level owner of a [`Scheduler`]: starts it, restarts it after
//! failures with a fixed backoff, fires scheduled emergency requests, and
//! turns a shutdown token into an orderly stop.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::schema::{IntersectionConfig, RoadDirection};
use crate::error::{ConfigError, SchedulerError, SignalmanError};
use crate::observability::events::{Event, EventEmitter, StopReason};
use crate::observability::metrics;
use crate::scheduler::resolver::{Wait, wait};
use crate::scheduler::Scheduler;
use crate::signal::Actuator;

// ============================================================================
// Scheduled emergencies
// ============================================================================

/// An emergency request fired a fixed delay after the controller starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEmergency {
    /// Road whose pole turns green.
    pub road: String,
    /// Approach direction.
    pub direction: RoadDirection,
    /// Delay after start.
    pub after: Duration,
}

impl FromStr for ScheduledEmergency {
    type Err = String;

    /// Parses `ROAD:DIRECTION[@DELAY]`, e.g. `north-road:north@10s`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, after) = match s.rsplit_once('@') {
            Some((target, delay)) => (
                target,
                humantime::parse_duration(delay.trim())
                    .map_err(|e| format!("invalid delay '{delay}': {e}"))?,
            ),
            None => (s, Duration::ZERO),
        };
        let (road, direction) = target
            .rsplit_once(':')
            .ok_or_else(|| format!("expected ROAD:DIRECTION[@DELAY], got '{s}'"))?;
        if road.trim().is_empty() {
            return Err(format!("missing road in '{s}'"));
        }

        Ok(Self {
            road: road.trim().to_string(),
            direction: direction.parse()?,
            after,
        })
    }
}

impl fmt::Display for ScheduledEmergency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.road,
            self.direction,
            humantime::format_duration(self.after)
        )
    }
}

// ============================================================================
// Options & Report
// ============================================================================

/// Supervision policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Consecutive scheduler failures tolerated before giving up.
    pub max_restarts: u32,
    /// Pause between a failure and the restart.
    pub restart_backoff: Duration,
    /// Emergencies to fire during the run.
    pub emergencies: Vec<ScheduledEmergency>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_backoff: Duration::from_secs(1),
            emergencies: Vec::new(),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerReport {
    /// Why the run ended.
    pub reason: StopReason,
    /// Cycles completed.
    pub cycles_completed: u64,
    /// Emergencies served.
    pub emergencies: u64,
    /// Scheduler restarts after failures.
    pub restarts: u32,
}

// ============================================================================
// Controller
// ============================================================================

/// Supervises one intersection's scheduler.
#[derive(Debug)]
pub struct IntersectionController {
    name: String,
    scheduler: Arc<Scheduler>,
    options: ControllerOptions,
    events: Arc<EventEmitter>,
    shutdown: CancellationToken,
}

impl IntersectionController {
    /// Wraps an existing scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRoad`] if a scheduled emergency names
    /// an approach with no pole.
    pub fn new(
        name: impl Into<String>,
        scheduler: Arc<Scheduler>,
        events: Arc<EventEmitter>,
        options: ControllerOptions,
    ) -> Result<Self, ConfigError> {
        for e in &options.emergencies {
            scheduler.topology().pole(&e.road, e.direction)?;
        }
        Ok(Self {
            name: name.into(),
            scheduler,
            options,
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Builds the scheduler from a configuration and wraps it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration cannot be turned
    /// into a registry and topology, or a scheduled emergency is unknown.
    pub fn from_config(
        config: &IntersectionConfig,
        actuator: Arc<dyn Actuator>,
        events: Arc<EventEmitter>,
        options: ControllerOptions,
        max_cycles: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let scheduler = Scheduler::from_config(config, actuator)?
            .with_events(Arc::clone(&events))
            .with_max_cycles(max_cycles);
        Self::new(
            config.intersection.name.clone(),
            Arc::new(scheduler),
            events,
            options,
        )
    }

    /// Token that stops the run when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The supervised scheduler, for emergency requests and diagnostics.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Runs until shutdown, the cycle limit, or the restart budget runs out.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::RestartsExhausted`] when the scheduler
    /// failed more than `max_restarts` times in a row.
    pub async fn run(&self) -> Result<ControllerReport, SignalmanError> {
        let registry = self.scheduler.registry();
        info!(intersection = %self.name, phases = registry.len(), "controller started");
        self.events.emit(Event::ControllerStarted {
            timestamp: Utc::now(),
            intersection: self.name.clone(),
            phases: registry.len(),
            cycle_length: registry.cycle().len(),
        });

        let stopper = {
            let scheduler = Arc::clone(&self.scheduler);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                scheduler.stop();
            })
        };
        let pending = self.shutdown.child_token();
        let emergencies: Vec<_> = self
            .options
            .emergencies
            .iter()
            .cloned()
            .map(|e| {
                let scheduler = Arc::clone(&self.scheduler);
                tokio::spawn(fire_emergency(scheduler, e, pending.clone()))
            })
            .collect();

        let outcome = self.supervise().await;

        // emergencies not yet due are dropped; one in progress sees the
        // scheduler stop and reverts its pole to red
        pending.cancel();
        self.scheduler.stop();
        for task in emergencies {
            let _ = task.await;
        }
        stopper.abort();

        let (reason, restarts) = match &outcome {
            Ok(done) => *done,
            Err(_) => (StopReason::Failed, self.options.max_restarts),
        };
        let report = ControllerReport {
            reason,
            cycles_completed: self.scheduler.cycles_completed(),
            emergencies: self.scheduler.emergencies(),
            restarts,
        };
        self.events.emit(Event::ControllerStopped {
            timestamp: Utc::now(),
            reason,
            cycles_completed: report.cycles_completed,
            emergencies: report.emergencies,
        });
        info!(intersection = %self.name, ?reason, cycles = report.cycles_completed, "controller stopped");

        outcome.map(|_| report).map_err(SignalmanError::from)
    }

    async fn supervise(&self) -> Result<(StopReason, u32), SchedulerError> {
        let mut failures = 0u32;
        let mut restarts = 0u32;

        loop {
            let before = self.scheduler.cycles_completed();
            let run = {
                let scheduler = Arc::clone(&self.scheduler);
                tokio::spawn(async move { scheduler.start().await })
            };
            let err = match run.await {
                Ok(Ok(())) if self.scheduler.is_stopped() => {
                    return Ok((StopReason::Shutdown, restarts));
                }
                Ok(Ok(())) => return Ok((StopReason::CycleLimit, restarts)),
                Ok(Err(e)) => e,
                Err(e) => SchedulerError::TaskFailed(e.to_string()),
            };

            if self.scheduler.cycles_completed() > before {
                failures = 0;
            }
            failures += 1;
            let will_restart = failures <= self.options.max_restarts && !self.shutdown.is_cancelled();

            error!(error = %err, attempt = failures, will_restart, "scheduler failed");
            self.events.emit(Event::SchedulerFailed {
                timestamp: Utc::now(),
                error: err.to_string(),
                attempt: failures,
                will_restart,
            });

            if self.shutdown.is_cancelled() {
                return Ok((StopReason::Shutdown, restarts));
            }
            if !will_restart {
                return Err(SchedulerError::RestartsExhausted {
                    attempts: failures,
                    last: err.to_string(),
                });
            }

            if wait(self.options.restart_backoff, &self.shutdown).await == Wait::Cancelled {
                return Ok((StopReason::Shutdown, restarts));
            }
            metrics::record_scheduler_restart();
            restarts += 1;
        }
    }
}

async fn fire_emergency(
    scheduler: Arc<Scheduler>,
    emergency: ScheduledEmergency,
    pending: CancellationToken,
) {
    if wait(emergency.after, &pending).await == Wait::Cancelled {
        debug!(emergency = %emergency, "scheduled emergency dropped");
        return;
    }
    match scheduler
        .request_emergency_green(&emergency.road, emergency.direction)
        .await
    {
        Ok(report) => info!(
            emergency = %emergency,
            pole = %report.pole,
            clearance = ?report.clearance,
            held = ?report.held,
            "scheduled emergency served"
        ),
        Err(SignalmanError::Scheduler(SchedulerError::Stopped)) => {
            debug!(emergency = %emergency, "scheduler stopped before the emergency was served");
        }
        Err(e) => error!(emergency = %emergency, error = %e, "scheduled emergency failed"),
    }
}
