//! Conflict resolution
//!
//! Bringing a phase to green is one transaction:
//!
//! 1. The conflict set is every phase not listed in the target's
//!    concurrency set, excluding the target itself by identity.
//! 2. Conflicting Active phases go Yellowing together; the clearance window
//!    is the longest of their yellow times.
//! 3. Every conflicting phase goes Inactive, then the longest all-red time
//!    among the yielded phases elapses.
//! 4. The target goes Active, followed by each companion that is
//!    concurrent with everything already Active.
//! 5. The remaining green is held.
//!
//! Every wait observes the cancellation token and returns early when it
//! fires; the [`Resolution`] records where that happened.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::metrics;
use crate::phase::{Phase, PhaseRegistry, PhaseState, Transition};

// ============================================================================
// Cancellable waits
// ============================================================================

/// Result of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The full duration elapsed.
    Elapsed,
    /// The token fired first.
    Cancelled,
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn wait(duration: Duration, cancel: &CancellationToken) -> Wait {
    if cancel.is_cancelled() {
        return Wait::Cancelled;
    }
    if duration.is_zero() {
        return Wait::Elapsed;
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Wait::Cancelled,
        () = tokio::time::sleep(duration) => Wait::Elapsed,
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Point at which a transaction was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// During the shared yellow window.
    Yellow,
    /// During the all-red window, or just before activation.
    AllRed,
    /// During the green hold.
    Hold,
}

/// What a clearance did.
#[derive(Debug, Clone, Default)]
pub struct Clearance {
    /// Phases moved from Active to Yellowing.
    pub yielded: Vec<String>,
    /// Phases that ended Inactive having been in another state.
    pub cleared: Vec<String>,
    /// Length of the shared yellow window.
    pub yellow: Duration,
    /// Length of the all-red window.
    pub all_red: Duration,
    /// State changes in the order they happened.
    pub transitions: Vec<Transition>,
    /// Set when a wait was cut short.
    pub interrupted: Option<Stage>,
}

impl Clearance {
    fn record(&mut self, transition: Transition) {
        if transition.changed() {
            self.transitions.push(transition);
        }
    }
}

/// What one conflict-resolution transaction did.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Phase selected by the cycle.
    pub target: String,
    /// Whether the target was already Active when selected.
    pub was_active: bool,
    /// Phases yellowed to make way.
    pub yielded: Vec<String>,
    /// Target plus the companions that went (or stayed) Active.
    pub activated: Vec<String>,
    /// Companions left out because they conflict with an Active phase.
    pub skipped: Vec<String>,
    /// Green hold computed at selection time.
    pub hold: Duration,
    /// State changes in the order they happened.
    pub transitions: Vec<Transition>,
    /// Set when the transaction was cut short.
    pub interrupted: Option<Stage>,
    /// Wall time of the whole transaction.
    pub elapsed: Duration,
}

impl Resolution {
    /// Returns `true` if every step ran to completion.
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.interrupted.is_none()
    }
}

#[derive(Debug, Default)]
struct Activation {
    activated: Vec<String>,
    skipped: Vec<String>,
    transitions: Vec<Transition>,
}

// ============================================================================
// Resolver
// ============================================================================

/// Runs conflict-resolution transactions against a registry.
///
/// The caller must hold the registry lock for the whole call.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver<'a> {
    registry: &'a PhaseRegistry,
}

impl<'a> ConflictResolver<'a> {
    /// Creates a resolver over `registry`.
    #[must_use]
    pub const fn new(registry: &'a PhaseRegistry) -> Self {
        Self { registry }
    }

    /// Phases that must not be Active while `target` is.
    ///
    /// `target` itself is never part of the set.
    #[must_use]
    pub fn conflict_set(&self, target: &Phase) -> Vec<&'a Arc<Phase>> {
        self.registry
            .phases()
            .filter(|q| !std::ptr::eq(q.as_ref(), target) && !target.is_concurrent_with(q.id()))
            .collect()
    }

    /// Brings `target` and its companions to green and holds.
    pub async fn resolve(&self, target: &Arc<Phase>, cancel: &CancellationToken) -> Resolution {
        let started = Instant::now();
        let remaining = target.remaining_green();
        let was_active = remaining.is_some();
        // an Active target with exhausted green holds nothing
        let hold = remaining.unwrap_or(target.timing().green);

        let conflicting = self.conflict_set(target);
        let clearance = self.clear(&conflicting, cancel).await;

        let mut resolution = Resolution {
            target: target.id().to_string(),
            was_active,
            yielded: clearance.yielded,
            activated: Vec::new(),
            skipped: Vec::new(),
            hold,
            transitions: clearance.transitions,
            interrupted: clearance.interrupted,
            elapsed: Duration::ZERO,
        };

        if resolution.interrupted.is_none() && cancel.is_cancelled() {
            resolution.interrupted = Some(Stage::AllRed);
        }

        if resolution.interrupted.is_none() {
            let activation = self.activate(target);
            resolution.activated = activation.activated;
            resolution.skipped = activation.skipped;
            resolution.transitions.extend(activation.transitions);
            metrics::set_active_phases(self.registry.active_ids().len());

            info!(
                phase = %target.id(),
                group = ?resolution.activated,
                yielded = ?resolution.yielded,
                hold = ?hold,
                "phase group active"
            );

            if wait(hold, cancel).await == Wait::Cancelled {
                resolution.interrupted = Some(Stage::Hold);
            }
        }

        resolution.elapsed = started.elapsed();
        resolution
    }

    /// Yellows the Active members of `conflicting`, waits the shared
    /// window, turns every member Inactive, then waits the all-red time.
    ///
    /// On cancellation during yellow the members stay Yellowing.
    pub async fn clear(&self, conflicting: &[&Arc<Phase>], cancel: &CancellationToken) -> Clearance {
        let mut out = Clearance::default();

        for q in conflicting {
            if q.state() == PhaseState::Active {
                out.yellow = out.yellow.max(q.timing().yellow);
                out.all_red = out.all_red.max(q.timing().all_red);
                out.yielded.push(q.id().to_string());
                out.record(q.transition(PhaseState::Yellowing));
            }
        }

        if !out.yielded.is_empty() {
            debug!(yielded = ?out.yielded, yellow = ?out.yellow, "clearance window");
            if wait(out.yellow, cancel).await == Wait::Cancelled {
                out.interrupted = Some(Stage::Yellow);
                return out;
            }
        }

        for q in conflicting {
            let t = q.transition(PhaseState::Inactive);
            if t.changed() {
                out.cleared.push(q.id().to_string());
            }
            out.record(t);
        }

        if !out.yielded.is_empty() && wait(out.all_red, cancel).await == Wait::Cancelled {
            out.interrupted = Some(Stage::AllRed);
        }
        out
    }

    /// Clears every phase for preemption.
    ///
    /// The yellow window is the longest yellow among phases that are
    /// Active or already Yellowing. All phases end Inactive even if
    /// `cancel` fires during the window; only the all-red wait is skipped
    /// in that case.
    pub async fn clear_all(&self, cancel: &CancellationToken) -> Clearance {
        let mut out = Clearance::default();
        let live: Vec<&Arc<Phase>> = self
            .registry
            .phases()
            .filter(|p| p.state() != PhaseState::Inactive)
            .collect();

        for p in &live {
            out.yellow = out.yellow.max(p.timing().yellow);
            out.all_red = out.all_red.max(p.timing().all_red);
            if p.state() == PhaseState::Active {
                out.yielded.push(p.id().to_string());
                out.record(p.transition(PhaseState::Yellowing));
            }
        }

        if !live.is_empty() && wait(out.yellow, cancel).await == Wait::Cancelled {
            out.interrupted = Some(Stage::Yellow);
        }

        for p in self.registry.phases() {
            let t = p.transition(PhaseState::Inactive);
            if t.changed() {
                out.cleared.push(p.id().to_string());
            }
            out.record(t);
        }
        metrics::set_active_phases(0);

        if out.interrupted.is_none()
            && !live.is_empty()
            && wait(out.all_red, cancel).await == Wait::Cancelled
        {
            out.interrupted = Some(Stage::AllRed);
        }
        out
    }

    fn activate(&self, target: &Arc<Phase>) -> Activation {
        let mut out = Activation::default();

        let t = target.transition(PhaseState::Active);
        if t.changed() {
            out.transitions.push(t);
        }
        out.activated.push(target.id().to_string());

        for id in target.concurrent_with() {
            let Some(companion) = self.registry.get(id) else {
                continue;
            };

            if companion.state() != PhaseState::Active {
                let blocker = self.registry.phases().find(|a| {
                    a.state() == PhaseState::Active
                        && a.id() != companion.id()
                        && !companion.is_concurrent_with(a.id())
                });
                if let Some(blocker) = blocker {
                    warn!(
                        phase = %target.id(),
                        companion = %id,
                        conflicts_with = %blocker.id(),
                        "companion skipped"
                    );
                    out.skipped.push(id.clone());
                    continue;
                }
            }

            let t = companion.transition(PhaseState::Active);
            if t.changed() {
                out.transitions.push(t);
            }
            out.activated.push(id.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseSpec;
    use crate::signal::{Actuator, LightColor, RecordingActuator};

    const S: Duration = Duration::from_secs(1);

    fn registry(specs: Vec<PhaseSpec>) -> (PhaseRegistry, Arc<RecordingActuator>) {
        let rec = Arc::new(RecordingActuator::new());
        let act: Arc<dyn Actuator> = rec.clone();
        let reg = specs
            .into_iter()
            .fold(PhaseRegistry::builder(), |b, spec| b.phase(spec))
            .build(&act)
            .unwrap();
        (reg, rec)
    }

    #[test]
    fn test_conflict_set_excludes_target_by_identity() {
        let (reg, _) = registry(vec![
            PhaseSpec::new("a", S, S).concurrent_with(["a", "b"]),
            PhaseSpec::new("b", S, S).concurrent_with(["a"]),
            PhaseSpec::new("c", S, S),
        ]);
        let resolver = ConflictResolver::new(&reg);
        let set: Vec<&str> = resolver
            .conflict_set(reg.get("a").unwrap())
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(set, ["c"]);

        let set: Vec<&str> = resolver
            .conflict_set(reg.get("c").unwrap())
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(set, ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_and_cancels() {
        let token = CancellationToken::new();
        assert_eq!(wait(S, &token).await, Wait::Elapsed);
        assert_eq!(wait(Duration::ZERO, &token).await, Wait::Elapsed);

        token.cancel();
        let before = Instant::now();
        assert_eq!(wait(Duration::from_secs(60), &token).await, Wait::Cancelled);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_yields_conflicts_then_holds() {
        let (reg, rec) = registry(vec![
            PhaseSpec::new("p1", Duration::from_secs(3), S).lights(["l1"]),
            PhaseSpec::new("p2", Duration::from_secs(3), S).lights(["l2"]),
        ]);
        let resolver = ConflictResolver::new(&reg);
        let token = CancellationToken::new();

        let first = resolver.resolve(reg.get("p1").unwrap(), &token).await;
        assert!(first.completed());
        assert!(!first.was_active);
        assert_eq!(first.hold, Duration::from_secs(3));
        assert_eq!(first.elapsed, Duration::from_secs(3));

        let second = resolver.resolve(reg.get("p2").unwrap(), &token).await;
        assert_eq!(second.yielded, ["p1"]);
        assert_eq!(second.elapsed, Duration::from_secs(4));
        assert_eq!(rec.colors_for("l1"), [LightColor::Green, LightColor::Yellow, LightColor::Red]);
        assert_eq!(rec.color("l2"), Some(LightColor::Green));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_red_inserted_after_yellow() {
        let (reg, rec) = registry(vec![
            PhaseSpec::new("p1", S, S).all_red(Duration::from_secs(2)).lights(["l1"]),
            PhaseSpec::new("p2", S, S).lights(["l2"]),
        ]);
        let resolver = ConflictResolver::new(&reg);
        let token = CancellationToken::new();
        resolver.resolve(reg.get("p1").unwrap(), &token).await;

        let t0 = Instant::now();
        resolver.resolve(reg.get("p2").unwrap(), &token).await;

        let history = rec.history();
        let red = history
            .iter()
            .find(|c| c.light_id == "l1" && c.color == LightColor::Red)
            .unwrap();
        let green = history
            .iter()
            .find(|c| c.light_id == "l2" && c.color == LightColor::Green)
            .unwrap();
        assert_eq!(red.at - t0, S);
        assert_eq!(green.at - red.at, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_active_holds_remainder() {
        let (reg, _) = registry(vec![
            PhaseSpec::new("a", Duration::from_secs(3), S).concurrent_with(["b"]),
            PhaseSpec::new("b", Duration::from_secs(10), S).concurrent_with(["a"]),
        ]);
        let resolver = ConflictResolver::new(&reg);
        let token = CancellationToken::new();

        resolver.resolve(reg.get("a").unwrap(), &token).await;
        let b = resolver.resolve(reg.get("b").unwrap(), &token).await;
        assert!(b.was_active);
        assert_eq!(b.hold, Duration::from_secs(7));

        // a's green ran out long ago
        let a = resolver.resolve(reg.get("a").unwrap(), &token).await;
        assert!(a.was_active);
        assert_eq!(a.hold, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_companion_skipped_when_not_clique() {
        // b and c both run with a but conflict with each other
        let (reg, _) = registry(vec![
            PhaseSpec::new("a", S, S).concurrent_with(["b", "c"]),
            PhaseSpec::new("b", S, S).concurrent_with(["a"]),
            PhaseSpec::new("c", S, S).concurrent_with(["a"]),
        ]);
        let resolver = ConflictResolver::new(&reg);
        let r = resolver
            .resolve(reg.get("a").unwrap(), &CancellationToken::new())
            .await;
        assert_eq!(r.activated, ["a", "b"]);
        assert_eq!(r.skipped, ["c"]);
        assert_eq!(reg.conflicting_active_pair(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_yellow_leaves_yellowing() {
        let (reg, _) = registry(vec![
            PhaseSpec::new("p1", S, Duration::from_secs(5)),
            PhaseSpec::new("p2", S, S),
        ]);
        let resolver = ConflictResolver::new(&reg);
        resolver
            .resolve(reg.get("p1").unwrap(), &CancellationToken::new())
            .await;

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                token.cancel();
            })
        };
        let r = resolver.resolve(reg.get("p2").unwrap(), &token).await;
        canceller.await.unwrap();

        assert_eq!(r.interrupted, Some(Stage::Yellow));
        assert_eq!(r.elapsed, Duration::from_secs(2));
        assert_eq!(reg.get("p1").unwrap().state(), PhaseState::Yellowing);
        assert_eq!(reg.get("p2").unwrap().state(), PhaseState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_uses_longest_live_yellow() {
        let (reg, rec) = registry(vec![
            PhaseSpec::new("a", S, Duration::from_secs(2))
                .concurrent_with(["b"])
                .lights(["la"]),
            PhaseSpec::new("b", S, Duration::from_secs(4))
                .concurrent_with(["a"])
                .lights(["lb"]),
            PhaseSpec::new("c", S, Duration::from_secs(9)),
        ]);
        reg.get("a").unwrap().transition(PhaseState::Active);
        reg.get("b").unwrap().transition(PhaseState::Yellowing);

        let t0 = Instant::now();
        let out = ConflictResolver::new(&reg)
            .clear_all(&CancellationToken::new())
            .await;

        assert_eq!(out.yielded, ["a"]);
        assert_eq!(out.yellow, Duration::from_secs(4));
        assert!(reg.active_ids().is_empty());
        assert!(reg.ids_in(PhaseState::Yellowing).is_empty());
        let red = rec
            .history()
            .into_iter()
            .find(|c| c.light_id == "la" && c.color == LightColor::Red)
            .unwrap();
        assert_eq!(red.at - t0, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_finishes_on_cancel() {
        let (reg, _) = registry(vec![PhaseSpec::new("a", S, Duration::from_secs(30))]);
        reg.get("a").unwrap().transition(PhaseState::Active);
        let token = CancellationToken::new();
        token.cancel();

        let out = ConflictResolver::new(&reg).clear_all(&token).await;
        assert_eq!(out.interrupted, Some(Stage::Yellow));
        assert_eq!(reg.get("a").unwrap().state(), PhaseState::Inactive);
    }
}
