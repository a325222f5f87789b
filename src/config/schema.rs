//! Configuration schema
//!
//! Typed representation of an intersection YAML file: intersection-wide
//! settings, the poles and the lights mounted on them, the phase
//! definitions, and the explicit cycle order.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default bound on registry lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Root
// ============================================================================

/// Complete intersection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntersectionConfig {
    /// Intersection-wide settings.
    pub intersection: IntersectionSettings,

    /// Signal poles and the lights mounted on them.
    #[serde(default)]
    pub poles: Vec<PoleConfig>,

    /// Phase definitions, in declaration order.
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,

    /// Explicit cycle order. Defaults to the phase declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
}

impl IntersectionConfig {
    /// Returns the phase ids in the order the scheduler visits them.
    #[must_use]
    pub fn cycle_order(&self) -> Vec<String> {
        self.cycle.clone().unwrap_or_else(|| {
            self.phases.iter().map(|p| p.id.clone()).collect()
        })
    }
}

/// Intersection-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntersectionSettings {
    /// Display name.
    pub name: String,

    /// How long an emergency green holds before cycling resumes.
    #[serde(with = "humantime_serde_compat")]
    pub emergency_duration: Duration,

    /// Upper bound on waiting for the registry lock.
    #[serde(
        default = "default_lock_timeout",
        with = "humantime_serde_compat"
    )]
    pub lock_timeout: Duration,
}

const fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

// ============================================================================
// Topology
// ============================================================================

/// Approach direction of a road.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RoadDirection {
    /// Northern approach
    North,
    /// Southern approach
    South,
    /// Eastern approach
    East,
    /// Western approach
    West,
}

impl RoadDirection {
    /// Returns the lowercase name used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
        }
    }
}

impl fmt::Display for RoadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoadDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(Self::North),
            "south" | "s" => Ok(Self::South),
            "east" | "e" => Ok(Self::East),
            "west" | "w" => Ok(Self::West),
            other => Err(format!(
                "invalid direction '{other}' (expected north, south, east, west)"
            )),
        }
    }
}

/// A signal pole serving one road approach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoleConfig {
    /// Unique pole id.
    pub id: String,
    /// Road the pole serves.
    pub road: String,
    /// Approach direction.
    pub direction: RoadDirection,
    /// Ids of the lights mounted on the pole.
    #[serde(default)]
    pub lights: Vec<String>,
}

// ============================================================================
// Phases
// ============================================================================

/// One signal phase definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Unique phase id.
    pub id: String,

    /// Display name. Defaults to the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Green hold.
    #[serde(with = "humantime_serde_compat")]
    pub green: Duration,

    /// Yellow clearance.
    #[serde(with = "humantime_serde_compat")]
    pub yellow: Duration,

    /// All-red clearance after yellow.
    #[serde(default, with = "humantime_serde_compat")]
    pub all_red: Duration,

    /// Phases that may be green together with this one.
    #[serde(default)]
    pub concurrent_with: Vec<String>,

    /// Lights driven by this phase.
    #[serde(default)]
    pub lights: Vec<String>,
}

impl PhaseConfig {
    /// Returns the display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Human-readable durations (`"3s"`, `"500ms"`, `"10m"`) via `humantime`.
mod humantime_serde_compat {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(|e| {
            serde::de::Error::custom(format!("invalid duration '{raw}': {e}"))
        })
    }
}
