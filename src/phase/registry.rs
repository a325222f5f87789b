//! Phase registry
//!
//! The static set of phases for one intersection plus the ordered cycle the
//! scheduler walks. Map storage is for lookup only; execution order always
//! comes from [`PhaseRegistry::cycle`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::IntersectionConfig;
use crate::error::ConfigError;
use crate::phase::state::{Phase, PhaseSnapshot, PhaseState, PhaseTiming};
use crate::signal::Actuator;

// ============================================================================
// Phase Spec
// ============================================================================

/// Declarative input for one phase, consumed by [`PhaseRegistryBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpec {
    /// Unique phase id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Timing parameters.
    pub timing: PhaseTiming,
    /// Phases allowed to be Active together with this one.
    pub concurrent_with: Vec<String>,
    /// Lights driven by this phase.
    pub lights: Vec<String>,
}

impl PhaseSpec {
    /// Creates a spec with no all-red time, no companions, and no lights.
    #[must_use]
    pub fn new(id: impl Into<String>, green: Duration, yellow: Duration) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            timing: PhaseTiming {
                green,
                yellow,
                all_red: Duration::ZERO,
            },
            concurrent_with: Vec::new(),
            lights: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the all-red clearance.
    #[must_use]
    pub const fn all_red(mut self, all_red: Duration) -> Self {
        self.timing.all_red = all_red;
        self
    }

    /// Sets the concurrency list.
    #[must_use]
    pub fn concurrent_with<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concurrent_with = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the bound lights.
    #[must_use]
    pub fn lights<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lights = ids.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`PhaseRegistry`], rejecting inconsistent concurrency.
#[derive(Debug, Default)]
pub struct PhaseRegistryBuilder {
    specs: Vec<PhaseSpec>,
    cycle: Option<Vec<String>>,
}

impl PhaseRegistryBuilder {
    /// Adds a phase. Declaration order is kept.
    #[must_use]
    pub fn phase(mut self, spec: PhaseSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Sets the cycle order. Without it the declaration order is used.
    #[must_use]
    pub fn cycle<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cycle = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Validates the declarations and creates every phase Inactive.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::DuplicatePhase`] for a repeated id
    /// - [`ConfigError::UnknownPhase`] for a concurrency reference to a
    ///   phase that does not exist
    /// - [`ConfigError::AsymmetricConcurrency`] when `a` lists `b` but
    ///   `b` does not list `a`
    /// - [`ConfigError::InvalidLight`] when two phases bind one light
    /// - [`ConfigError::UnknownCyclePhase`] for an unknown cycle entry
    /// - [`ConfigError::InvalidValue`] for an empty registry or cycle
    pub fn build(self, actuator: &Arc<dyn Actuator>) -> Result<PhaseRegistry, ConfigError> {
        if self.specs.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "phases".to_string(),
                value: "[]".to_string(),
                expected: "at least one phase".to_string(),
            });
        }

        let mut by_id: HashMap<&str, &PhaseSpec> = HashMap::new();
        for spec in &self.specs {
            if by_id.insert(spec.id.as_str(), spec).is_some() {
                return Err(ConfigError::DuplicatePhase(spec.id.clone()));
            }
        }

        let mut light_owner: HashMap<&str, &str> = HashMap::new();
        for spec in &self.specs {
            for light in &spec.lights {
                if let Some(owner) = light_owner.insert(light.as_str(), spec.id.as_str()) {
                    if owner != spec.id {
                        return Err(ConfigError::InvalidLight {
                            light: light.clone(),
                            phase: spec.id.clone(),
                            reason: format!("already driven by phase '{owner}'"),
                        });
                    }
                }
            }
        }

        for spec in &self.specs {
            for other in spec.concurrent_with.iter().filter(|o| **o != spec.id) {
                let Some(other_spec) = by_id.get(other.as_str()) else {
                    return Err(ConfigError::UnknownPhase {
                        phase: spec.id.clone(),
                        reference: other.clone(),
                    });
                };
                if !other_spec.concurrent_with.iter().any(|o| *o == spec.id) {
                    return Err(ConfigError::AsymmetricConcurrency {
                        phase: spec.id.clone(),
                        other: other.clone(),
                    });
                }
            }
        }

        let declared: Vec<String> = self.specs.iter().map(|s| s.id.clone()).collect();
        let cycle = self.cycle.unwrap_or_else(|| declared.clone());
        if cycle.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cycle".to_string(),
                value: "[]".to_string(),
                expected: "at least one phase id".to_string(),
            });
        }
        if let Some(unknown) = cycle.iter().find(|id| !by_id.contains_key(id.as_str())) {
            return Err(ConfigError::UnknownCyclePhase(unknown.clone()));
        }

        let phases = self
            .specs
            .into_iter()
            .map(|spec| {
                let phase = Phase::new(
                    spec.id.clone(),
                    spec.name,
                    spec.timing,
                    spec.concurrent_with,
                    spec.lights,
                    Arc::clone(actuator),
                );
                (spec.id, Arc::new(phase))
            })
            .collect();

        Ok(PhaseRegistry {
            phases,
            declared,
            cycle,
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Static collection of phases, keyed by id, with an explicit cycle order.
#[derive(Debug)]
pub struct PhaseRegistry {
    phases: HashMap<String, Arc<Phase>>,
    declared: Vec<String>,
    cycle: Vec<String>,
}

impl PhaseRegistry {
    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> PhaseRegistryBuilder {
        PhaseRegistryBuilder::default()
    }

    /// Builds the registry described by an intersection configuration.
    ///
    /// # Errors
    ///
    /// See [`PhaseRegistryBuilder::build`].
    pub fn from_config(
        config: &IntersectionConfig,
        actuator: &Arc<dyn Actuator>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config.phases.iter().fold(Self::builder(), |b, p| {
            b.phase(
                PhaseSpec::new(p.id.clone(), p.green, p.yellow)
                    .name(p.display_name())
                    .all_red(p.all_red)
                    .concurrent_with(p.concurrent_with.iter().cloned())
                    .lights(p.lights.iter().cloned()),
            )
        });
        if let Some(cycle) = &config.cycle {
            builder = builder.cycle(cycle.iter().cloned());
        }
        builder.build(actuator)
    }

    /// Looks up a phase by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Phase>> {
        self.phases.get(id)
    }

    /// Phase ids in the order the scheduler visits them.
    #[must_use]
    pub fn cycle(&self) -> &[String] {
        &self.cycle
    }

    /// All phases in declaration order.
    pub fn phases(&self) -> impl Iterator<Item = &Arc<Phase>> {
        self.declared.iter().filter_map(|id| self.phases.get(id))
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Always `false` for a built registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Ids of phases currently in `state`, in declaration order.
    #[must_use]
    pub fn ids_in(&self, state: PhaseState) -> Vec<String> {
        self.phases()
            .filter(|p| p.state() == state)
            .map(|p| p.id().to_string())
            .collect()
    }

    /// Ids of Active phases, in declaration order.
    #[must_use]
    pub fn active_ids(&self) -> Vec<String> {
        self.ids_in(PhaseState::Active)
    }

    /// Returns `true` if `a` and `b` may be Active together.
    #[must_use]
    pub fn are_concurrent(&self, a: &str, b: &str) -> bool {
        self.get(a).is_some_and(|p| p.is_concurrent_with(b))
    }

    /// Returns the first pair of Active phases that conflict, if any.
    ///
    /// `None` means the Active set is a clique of the concurrency relation.
    #[must_use]
    pub fn conflicting_active_pair(&self) -> Option<(String, String)> {
        let active: Vec<&Arc<Phase>> = self
            .phases()
            .filter(|p| p.state() == PhaseState::Active)
            .collect();
        active.iter().enumerate().find_map(|(i, a)| {
            active[i + 1..]
                .iter()
                .find(|b| !a.is_concurrent_with(b.id()))
                .map(|b| (a.id().to_string(), b.id().to_string()))
        })
    }

    /// Re-issues the current color of every phase to its lights.
    ///
    /// Returns the lights that still failed.
    pub fn resync(&self) -> Vec<String> {
        self.phases().flat_map(|p| p.resync()).collect()
    }

    /// Snapshot of every phase, in declaration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PhaseSnapshot> {
        self.phases().map(|p| p.snapshot()).collect()
    }

    /// Phase ids referenced by the cycle, without repeats.
    #[must_use]
    pub fn cycle_members(&self) -> HashSet<&str> {
        self.cycle.iter().map(String::as_str).collect()
    }
}
