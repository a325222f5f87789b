//! Light actuation
//!
//! Phases never touch hardware directly; they push color commands into an
//! [`Actuator`]. Commands are fire-and-forget: a failure is reported back
//! to the caller but the caller's logical state is not rolled back.

use std::fmt;
use std::sync::Mutex;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::error::ActuationError;
use crate::observability::logging::LIGHTS_TARGET;

/// Color shown by a single signal head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    /// Stop
    #[default]
    Red,
    /// Clearance
    Yellow,
    /// Go
    Green,
}

impl LightColor {
    /// Returns the lowercase color name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

impl fmt::Display for LightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output sink accepting color commands for individual lights.
///
/// Implementations must not block: the phase engine calls `set_color`
/// while holding the phase's state lock.
pub trait Actuator: Send + Sync + fmt::Debug {
    /// Switches `light_id` to `color`.
    ///
    /// # Errors
    ///
    /// Returns an [`ActuationError`] if the command could not be applied.
    fn set_color(&self, light_id: &str, color: LightColor) -> Result<(), ActuationError>;
}

// ============================================================================
// LoggingActuator
// ============================================================================

/// Actuator that only emits a `tracing` event per command.
///
/// Default sink for the binary when no hardware is attached.
#[derive(Debug, Default)]
pub struct LoggingActuator;

impl LoggingActuator {
    /// Creates a new logging actuator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Actuator for LoggingActuator {
    fn set_color(&self, light_id: &str, color: LightColor) -> Result<(), ActuationError> {
        info!(target: LIGHTS_TARGET, light = light_id, %color, "light switched");
        Ok(())
    }
}

// ============================================================================
// RecordingActuator
// ============================================================================

/// A command observed by a [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightCommand {
    /// Target light.
    pub light_id: String,
    /// Commanded color.
    pub color: LightColor,
    /// When the command was issued.
    pub at: Instant,
}

/// In-memory actuator that tracks the current color of every light and
/// keeps an ordered history of commands.
///
/// Lights can be marked as failing to exercise the actuation error path.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    colors: DashMap<String, LightColor>,
    history: Mutex<Vec<LightCommand>>,
    failing: DashSet<String>,
}

impl RecordingActuator {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last color commanded for `light_id`, if any.
    #[must_use]
    pub fn color(&self, light_id: &str) -> Option<LightColor> {
        self.colors.get(light_id).map(|c| *c)
    }

    /// Returns a copy of every command received, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<LightCommand> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the sequence of colors commanded for one light.
    #[must_use]
    pub fn colors_for(&self, light_id: &str) -> Vec<LightColor> {
        self.history()
            .into_iter()
            .filter(|c| c.light_id == light_id)
            .map(|c| c.color)
            .collect()
    }

    /// Makes every future command for `light_id` fail.
    pub fn fail_light(&self, light_id: impl Into<String>) {
        self.failing.insert(light_id.into());
    }

    /// Clears a failure injected with [`fail_light`](Self::fail_light).
    pub fn repair_light(&self, light_id: &str) {
        self.failing.remove(light_id);
    }
}

impl Actuator for RecordingActuator {
    fn set_color(&self, light_id: &str, color: LightColor) -> Result<(), ActuationError> {
        if self.failing.contains(light_id) {
            return Err(ActuationError::Failed {
                light: light_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.colors.insert(light_id.to_string(), color);
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(LightCommand {
                light_id: light_id.to_string(),
                color,
                at: Instant::now(),
            });
        Ok(())
    }
}
