//! Pole topology
//!
//! Which lights hang on which pole, and which road approach each pole
//! serves. Emergency requests address an approach by `(road, direction)`.

use std::collections::BTreeMap;

use crate::config::schema::{PoleConfig, RoadDirection};
use crate::error::ConfigError;

/// A signal pole serving one road approach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficPole {
    /// Unique pole id.
    pub id: String,
    /// Road the pole serves.
    pub road: String,
    /// Approach direction.
    pub direction: RoadDirection,
    /// Lights mounted on the pole, in mounting order.
    pub lights: Vec<String>,
}

impl From<&PoleConfig> for TrafficPole {
    fn from(cfg: &PoleConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            road: cfg.road.clone(),
            direction: cfg.direction,
            lights: cfg.lights.clone(),
        }
    }
}

/// Poles indexed by `(road, direction)`.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    poles: BTreeMap<(String, RoadDirection), TrafficPole>,
}

impl Topology {
    /// Builds the topology from pole definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if two poles serve the same
    /// road approach.
    pub fn from_config(poles: &[PoleConfig]) -> Result<Self, ConfigError> {
        let mut index = BTreeMap::new();
        for cfg in poles {
            let key = (cfg.road.clone(), cfg.direction);
            if index.insert(key, TrafficPole::from(cfg)).is_some() {
                return Err(ConfigError::InvalidValue {
                    field: "poles".to_string(),
                    value: format!("{} {}", cfg.road, cfg.direction),
                    expected: "one pole per road approach".to_string(),
                });
            }
        }
        Ok(Self { poles: index })
    }

    /// Looks up the pole serving `road` from `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRoad`] with the closest configured
    /// road as a suggestion when no such pole exists.
    pub fn pole(&self, road: &str, direction: RoadDirection) -> Result<&TrafficPole, ConfigError> {
        self.poles
            .get(&(road.to_string(), direction))
            .ok_or_else(|| ConfigError::UnknownRoad {
                road: road.to_string(),
                direction: direction.to_string(),
                suggestion: self.suggest_road(road),
            })
    }

    /// Returns all poles ordered by road then direction.
    pub fn poles(&self) -> impl Iterator<Item = &TrafficPole> {
        self.poles.values()
    }

    /// Returns `true` if any pole carries `light_id`.
    #[must_use]
    pub fn has_light(&self, light_id: &str) -> bool {
        self.poles
            .values()
            .any(|p| p.lights.iter().any(|l| l == light_id))
    }

    /// Number of poles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.poles.len()
    }

    /// Returns `true` if no poles are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.poles.is_empty()
    }

    fn suggest_road(&self, input: &str) -> Option<String> {
        self.poles
            .keys()
            .map(|(road, _)| (road, strsim::damerau_levenshtein(input, road)))
            .filter(|(_, dist)| *dist <= 3)
            .min_by_key(|(_, dist)| *dist)
            .map(|(road, _)| road.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pole(id: &str, road: &str, direction: RoadDirection, lights: &[&str]) -> PoleConfig {
        PoleConfig {
            id: id.to_string(),
            road: road.to_string(),
            direction,
            lights: lights.iter().map(ToString::to_string).collect(),
        }
    }

    fn topology() -> Topology {
        Topology::from_config(&[
            pole("n", "north-road", RoadDirection::North, &["n1", "n2"]),
            pole("s", "south-road", RoadDirection::South, &["s1"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let topo = topology();
        let p = topo.pole("north-road", RoadDirection::North).unwrap();
        assert_eq!(p.id, "n");
        assert_eq!(p.lights, vec!["n1", "n2"]);
        assert_eq!(topo.len(), 2);
        assert!(topo.has_light("s1"));
        assert!(!topo.has_light("x"));
    }

    #[test]
    fn test_wrong_direction_is_error() {
        let topo = topology();
        let err = topo.pole("north-road", RoadDirection::South).unwrap_err();
        match err {
            ConfigError::UnknownRoad {
                road, suggestion, ..
            } => {
                assert_eq!(road, "north-road");
                assert_eq!(suggestion.as_deref(), Some("north-road"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_typo_suggestion() {
        let err = topology()
            .pole("nroth-road", RoadDirection::North)
            .unwrap_err();
        assert!(err.to_string().contains("did you mean 'north-road'"));
    }

    #[test]
    fn test_duplicate_approach() {
        let result = Topology::from_config(&[
            pole("a", "r", RoadDirection::East, &["a1"]),
            pole("b", "r", RoadDirection::East, &["b1"]),
        ]);
        assert!(result.is_err());
    }
}
