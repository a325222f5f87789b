//! CLI argument definitions
//!
//! All Clap derive structs for `signalman` command-line parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::controller::ScheduledEmergency;

// ============================================================================
// Root CLI
// ============================================================================

/// Intersection signal-phase controller.
#[derive(Parser, Debug)]
#[command(name = "signalman", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "SIGNALMAN_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "SIGNALMAN_LOG_FORMAT")]
    pub log_format: LogFormatArg,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against an intersection configuration.
    Run(RunArgs),

    /// Validate configuration files without running them.
    Validate(ValidateArgs),

    /// List the built-in intersection presets.
    Presets(PresetsArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("source").required(true).multiple(false))]
pub struct RunArgs {
    /// Path to YAML intersection configuration.
    #[arg(short, long, group = "source", env = "SIGNALMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Built-in preset name (see `signalman presets`).
    #[arg(short, long, group = "source")]
    pub preset: Option<String>,

    /// Emergency request to fire during the run, as ROAD:DIRECTION[@DELAY].
    #[arg(short, long = "emergency", value_name = "ROAD:DIR@DELAY")]
    pub emergencies: Vec<ScheduledEmergency>,

    /// Stop after this many completed cycles.
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Write the JSONL event stream to this file instead of stderr.
    #[arg(long, env = "SIGNALMAN_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Write a Prometheus metrics snapshot to this file at shutdown.
    #[arg(long, env = "SIGNALMAN_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,

    /// Consecutive scheduler failures tolerated before giving up.
    #[arg(long, default_value_t = 3)]
    pub max_restarts: u32,

    /// Pause before restarting a failed scheduler.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub restart_backoff: Duration,

    /// Treat configuration warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `presets`.
#[derive(Args, Debug)]
pub struct PresetsArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Log format as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RoadDirection;

    #[test]
    fn test_run_with_config() {
        let cli = Cli::try_parse_from(["signalman", "run", "--config", "x.yaml"]);
        assert!(cli.is_ok(), "Failed to parse: {cli:?}");
    }

    #[test]
    fn test_run_requires_source() {
        assert!(Cli::try_parse_from(["signalman", "run"]).is_err());
    }

    #[test]
    fn test_config_and_preset_mutually_exclusive() {
        let cli = Cli::try_parse_from([
            "signalman", "run", "--config", "x.yaml", "--preset", "four-way",
        ]);
        assert!(cli.is_err(), "Expected mutual exclusion error");
    }

    #[test]
    fn test_run_with_emergencies() {
        let cli = Cli::try_parse_from([
            "signalman",
            "run",
            "--preset",
            "four-way",
            "--emergency",
            "north-road:north@10s",
            "-e",
            "east-road:east@1m",
            "--cycles",
            "2",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.emergencies.len(), 2);
        assert_eq!(args.emergencies[1].direction, RoadDirection::East);
        assert_eq!(args.emergencies[1].after, Duration::from_secs(60));
        assert_eq!(args.cycles, Some(2));
        assert_eq!(args.max_restarts, 3);
        assert_eq!(args.restart_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_emergency_rejected() {
        let cli = Cli::try_parse_from([
            "signalman", "run", "--preset", "four-way", "--emergency", "nowhere",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["signalman", "validate"]).is_err());
        assert!(Cli::try_parse_from(["signalman", "validate", "a.yaml", "--strict"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "signalman",
            "presets",
            "-vv",
            "--color",
            "never",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.color, ColorChoice::Never);
        assert_eq!(cli.log_format, LogFormatArg::Json);
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["signalman", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["signalman", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
