//! Error types for `signalman`
//!
//! Configuration problems are reported at load, build, or request time.
//! Scheduler failures are returned to the owning controller. Actuation
//! failures are logged and counted but never stop the phase engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `signalman` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure, unknown road)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Scheduler error (lock timeout, restart budget exhausted)
    pub const SCHEDULER_ERROR: i32 = 5;

    /// Actuation error surfaced to the caller
    pub const ACTUATION_ERROR: i32 = 6;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `signalman` operations.
#[derive(Debug, Error)]
pub enum SignalmanError {
    /// Configuration loading, validation, or lookup error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Scheduler or preemption failure
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Light actuation failure
    #[error(transparent)]
    Actuation(#[from] ActuationError),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SignalmanError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Scheduler(_) => ExitCode::SCHEDULER_ERROR,
            Self::Actuation(_) => ExitCode::ACTUATION_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading, validation, and lookup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path (or preset name) of the configuration
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },

    /// A phase lists a concurrent phase that does not exist
    #[error("phase '{phase}' lists unknown concurrent phase '{reference}'")]
    UnknownPhase {
        /// Phase declaring the reference
        phase: String,
        /// The id that could not be resolved
        reference: String,
    },

    /// Concurrency declarations disagree between two phases
    #[error("phase '{phase}' lists '{other}' as concurrent but '{other}' does not list '{phase}'")]
    AsymmetricConcurrency {
        /// Phase declaring the relation
        phase: String,
        /// Phase missing the reverse declaration
        other: String,
    },

    /// Two phases share an id
    #[error("duplicate phase id '{0}'")]
    DuplicatePhase(String),

    /// A light is bound to a phase but not mounted on any pole,
    /// or is bound to more than one phase
    #[error("light '{light}' is invalid for phase '{phase}': {reason}")]
    InvalidLight {
        /// Offending light id
        light: String,
        /// Phase binding the light
        phase: String,
        /// Why the binding was rejected
        reason: String,
    },

    /// The cycle names a phase that is not registered
    #[error("cycle references unknown phase '{0}'")]
    UnknownCyclePhase(String),

    /// An emergency request named a road/direction with no pole
    #[error("no pole for road '{road}' facing {direction}{}", suggestion_suffix(.suggestion.as_deref()))]
    UnknownRoad {
        /// Requested road id
        road: String,
        /// Requested approach direction
        direction: String,
        /// Closest configured road id, if any
        suggestion: Option<String>,
    },

    /// Unknown built-in preset name
    #[error("unknown preset '{name}'{}", suggestion_suffix(.suggestion.as_deref()))]
    UnknownPreset {
        /// Requested preset name
        name: String,
        /// Closest preset name, if any
        suggestion: Option<String>,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn suggestion_suffix(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases[2].concurrent_with")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Informational; the configuration still loads
    Warning,
}

// ============================================================================
// Scheduler Errors
// ============================================================================

/// Failures of the scheduler loop and the preemption path.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The registry lock could not be acquired in time
    #[error("registry lock not acquired within {waited:?} during {operation}")]
    LockTimeout {
        /// Operation that was waiting
        operation: &'static str,
        /// How long it waited
        waited: Duration,
    },

    /// The scheduler was asked to start while already running
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The scheduler has been shut down and accepts no more requests
    #[error("scheduler is stopped")]
    Stopped,

    /// The scheduler task panicked or was aborted
    #[error("scheduler task failed: {0}")]
    TaskFailed(String),

    /// The controller gave up restarting the scheduler
    #[error("scheduler failed {attempts} times in a row, giving up: {last}")]
    RestartsExhausted {
        /// Number of consecutive failed runs
        attempts: u32,
        /// The last error observed
        last: String,
    },
}

// ============================================================================
// Actuation Errors
// ============================================================================

/// A light command that could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActuationError {
    /// The sink rejected or failed the command
    #[error("light '{light}' failed to switch: {reason}")]
    Failed {
        /// Light id
        light: String,
        /// Reason reported by the sink
        reason: String,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `signalman` operations.
pub type Result<T> = std::result::Result<T, SignalmanError>;

// ============================================================================
// Tests
// ============================================================================
