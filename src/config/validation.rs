//! Configuration validation
//!
//! Semantic checks on a deserialized [`IntersectionConfig`]. Validation
//! collects ALL errors (doesn't stop at first) so a single run reports
//! every problem in a configuration file.

use std::collections::{HashMap, HashSet};

use crate::config::loader::ConfigLimits;
use crate::config::schema::{IntersectionConfig, PhaseConfig};
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every error and warning found.
    pub fn validate(
        &mut self,
        config: &IntersectionConfig,
        limits: &ConfigLimits,
    ) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_intersection(config);
        let pole_lights = self.validate_poles(config);
        self.validate_phases(config, &pole_lights);
        self.validate_concurrency(config);
        self.validate_cycle(config);
        self.validate_limits(config, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Intersection & Topology
    // ========================================================================

    fn validate_intersection(&mut self, config: &IntersectionConfig) {
        if config.intersection.name.trim().is_empty() {
            self.add_error(
                "intersection.name",
                "Intersection name is required and cannot be empty",
            );
        }
        if config.intersection.emergency_duration.is_zero() {
            self.add_error(
                "intersection.emergency_duration",
                "Emergency duration must be greater than zero",
            );
        }
        if config.intersection.lock_timeout.is_zero() {
            self.add_error(
                "intersection.lock_timeout",
                "Lock timeout must be greater than zero",
            );
        }
    }

    /// Validates poles and returns the set of mounted light ids.
    fn validate_poles(&mut self, config: &IntersectionConfig) -> HashSet<String> {
        let mut pole_ids = HashSet::new();
        let mut approaches = HashSet::new();
        let mut lights = HashSet::new();

        for (i, pole) in config.poles.iter().enumerate() {
            let path = format!("poles[{i}]");
            if pole.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Pole id cannot be empty");
            } else if !pole_ids.insert(pole.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate pole id '{}'", pole.id),
                );
            }

            if !approaches.insert((pole.road.as_str(), pole.direction)) {
                self.add_error(
                    &path,
                    &format!(
                        "Road '{}' already has a pole facing {}",
                        pole.road, pole.direction
                    ),
                );
            }

            if pole.lights.is_empty() {
                self.add_warning(&format!("{path}.lights"), "Pole has no lights");
            }

            for light in &pole.lights {
                if !lights.insert(light.clone()) {
                    self.add_error(
                        &format!("{path}.lights"),
                        &format!("Light '{light}' is mounted on more than one pole"),
                    );
                }
            }
        }

        lights
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn validate_phases(&mut self, config: &IntersectionConfig, pole_lights: &HashSet<String>) {
        if config.phases.is_empty() {
            self.add_error("phases", "At least one phase is required");
            return;
        }

        let mut ids = HashSet::new();
        let mut light_owner: HashMap<&str, &str> = HashMap::new();

        for (i, phase) in config.phases.iter().enumerate() {
            let path = format!("phases[{i}]");

            if phase.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Phase id cannot be empty");
            } else if !ids.insert(phase.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate phase id '{}'", phase.id),
                );
            }

            if phase.green.is_zero() {
                self.add_error(
                    &format!("{path}.green"),
                    "Green time must be greater than zero",
                );
            }
            if phase.yellow.is_zero() {
                self.add_warning(
                    &format!("{path}.yellow"),
                    "Zero yellow time: conflicting phases will switch without clearance",
                );
            }

            if phase.lights.is_empty() {
                self.add_warning(&format!("{path}.lights"), "Phase drives no lights");
            }

            for light in &phase.lights {
                if !pole_lights.contains(light) {
                    self.add_error(
                        &format!("{path}.lights"),
                        &format!("Light '{light}' is not mounted on any pole"),
                    );
                }
                if let Some(owner) = light_owner.insert(light.as_str(), phase.id.as_str()) {
                    if owner != phase.id {
                        self.add_error(
                            &format!("{path}.lights"),
                            &format!("Light '{light}' is already driven by phase '{owner}'"),
                        );
                    }
                }
            }
        }
    }

    fn validate_concurrency(&mut self, config: &IntersectionConfig) {
        let by_id: HashMap<&str, &PhaseConfig> =
            config.phases.iter().map(|p| (p.id.as_str(), p)).collect();

        for (i, phase) in config.phases.iter().enumerate() {
            let path = format!("phases[{i}].concurrent_with");
            let mut seen = HashSet::new();

            for other_id in &phase.concurrent_with {
                if !seen.insert(other_id.as_str()) {
                    self.add_warning(&path, &format!("'{other_id}' is listed more than once"));
                    continue;
                }
                if *other_id == phase.id {
                    self.add_warning(
                        &path,
                        "Phase lists itself as concurrent; the entry is ignored",
                    );
                    continue;
                }
                let Some(other) = by_id.get(other_id.as_str()) else {
                    self.add_error(&path, &format!("Unknown phase '{other_id}'"));
                    continue;
                };
                if !other.concurrent_with.contains(&phase.id) {
                    self.add_error(
                        &path,
                        &format!(
                            "'{other_id}' does not list '{}' back; concurrency must be symmetric",
                            phase.id
                        ),
                    );
                }
            }

            // Companions that conflict with each other cannot all go green.
            for (a_idx, a) in phase.concurrent_with.iter().enumerate() {
                for b in phase.concurrent_with.iter().skip(a_idx + 1) {
                    if a == b || *a == phase.id || *b == phase.id {
                        continue;
                    }
                    let (Some(pa), Some(_)) = (by_id.get(a.as_str()), by_id.get(b.as_str()))
                    else {
                        continue;
                    };
                    if !pa.concurrent_with.contains(b) {
                        self.add_warning(
                            &path,
                            &format!(
                                "Companions '{a}' and '{b}' conflict; only the first will go green with '{}'",
                                phase.id
                            ),
                        );
                    }
                }
            }
        }
    }

    fn validate_cycle(&mut self, config: &IntersectionConfig) {
        let Some(cycle) = &config.cycle else {
            return;
        };

        if cycle.is_empty() {
            self.add_error("cycle", "Cycle cannot be empty");
            return;
        }

        let known: HashSet<&str> = config.phases.iter().map(|p| p.id.as_str()).collect();
        for (i, id) in cycle.iter().enumerate() {
            if !known.contains(id.as_str()) {
                self.add_error(&format!("cycle[{i}]"), &format!("Unknown phase '{id}'"));
            }
        }

        let in_cycle: HashSet<&str> = cycle.iter().map(String::as_str).collect();
        for phase in &config.phases {
            if !in_cycle.contains(phase.id.as_str()) {
                self.add_warning(
                    "cycle",
                    &format!(
                        "Phase '{}' is never selected directly; it only runs as a companion",
                        phase.id
                    ),
                );
            }
        }
    }

    fn validate_limits(&mut self, config: &IntersectionConfig, limits: &ConfigLimits) {
        if config.phases.len() > limits.max_phases {
            self.add_error(
                "phases",
                &format!(
                    "Too many phases: {} (limit {})",
                    config.phases.len(),
                    limits.max_phases
                ),
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> IntersectionConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn validate(yaml: &str) -> ValidationResult {
        Validator::new().validate(&parse(yaml), &ConfigLimits::default())
    }

    const VALID: &str = r"
intersection: { name: t, emergency_duration: 10s }
poles:
  - { id: n, road: north-road, direction: north, lights: [n1, n2] }
phases:
  - { id: a, green: 3s, yellow: 1s, concurrent_with: [b], lights: [n1] }
  - { id: b, green: 3s, yellow: 1s, concurrent_with: [a], lights: [n2] }
";

    #[test]
    fn test_valid_config() {
        let result = validate(VALID);
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_empty_phases_rejected() {
        let result = validate("intersection: { name: t, emergency_duration: 1s }");
        assert!(result.has_errors());
        assert!(result.errors.iter().any(|e| e.path == "phases"));
    }

    #[test]
    fn test_unknown_concurrent_phase() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
phases:
  - { id: a, green: 3s, yellow: 1s, concurrent_with: [ghost] }
",
        );
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("Unknown phase 'ghost'"))
        );
    }

    #[test]
    fn test_asymmetric_concurrency_rejected() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
phases:
  - { id: a, green: 3s, yellow: 1s, concurrent_with: [b] }
  - { id: b, green: 3s, yellow: 1s }
",
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("must be symmetric"));
    }

    #[test]
    fn test_self_listing_is_warning() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
phases:
  - { id: a, green: 3s, yellow: 1s, concurrent_with: [a] }
",
        );
        assert!(result.is_valid());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.message.contains("lists itself"))
        );
    }

    #[test]
    fn test_non_clique_companions_warn() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
phases:
  - { id: a, green: 3s, yellow: 1s, concurrent_with: [b, c] }
  - { id: b, green: 3s, yellow: 1s, concurrent_with: [a] }
  - { id: c, green: 3s, yellow: 1s, concurrent_with: [a] }
",
        );
        assert!(result.is_valid());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.message.contains("Companions 'b' and 'c' conflict"))
        );
    }

    #[test]
    fn test_light_checks() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
poles:
  - { id: n, road: r, direction: north, lights: [n1] }
phases:
  - { id: a, green: 3s, yellow: 1s, lights: [n1, ghost] }
  - { id: b, green: 3s, yellow: 1s, lights: [n1] }
",
        );
        let messages: Vec<_> = result.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("'ghost' is not mounted")));
        assert!(
            messages
                .iter()
                .any(|m| m.contains("already driven by phase 'a'"))
        );
    }

    #[test]
    fn test_duplicate_approach_rejected() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
poles:
  - { id: n1, road: r, direction: north, lights: [a] }
  - { id: n2, road: r, direction: north, lights: [b] }
phases:
  - { id: p, green: 3s, yellow: 1s, lights: [a] }
",
        );
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("already has a pole facing north"))
        );
    }

    #[test]
    fn test_cycle_checks() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 1s }
phases:
  - { id: a, green: 3s, yellow: 1s }
  - { id: b, green: 3s, yellow: 1s }
cycle: [a, zz]
",
        );
        assert!(result.errors.iter().any(|e| e.path == "cycle[1]"));
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.message.contains("'b' is never selected"))
        );
    }

    #[test]
    fn test_zero_durations() {
        let result = validate(
            r"
intersection: { name: t, emergency_duration: 0s }
phases:
  - { id: a, green: 0s, yellow: 0s }
",
        );
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.path == "intersection.emergency_duration")
        );
        assert!(result.errors.iter().any(|e| e.path == "phases[0].green"));
        assert!(result.warnings.iter().any(|w| w.path == "phases[0].yellow"));
    }

    #[test]
    fn test_phase_limit() {
        let limits = ConfigLimits {
            max_phases: 1,
            ..ConfigLimits::default()
        };
        let result = Validator::new().validate(&parse(VALID), &limits);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("Too many phases"))
        );
    }
}
