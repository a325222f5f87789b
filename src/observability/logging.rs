//! Log subscriber setup.
//!
//! Everything goes to stderr so stdout stays free for command output. Light
//! commands from the logging actuator use their own target,
//! [`LIGHTS_TARGET`], and are kept one level quieter than the rest until
//! `-vvv`: at `-v` a busy intersection would otherwise log every bulb.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable holding an `EnvFilter` directive; wins over `-v`.
pub const LOG_LEVEL_ENV: &str = "SIGNALMAN_LOG_LEVEL";

/// Tracing target of individual light commands.
pub const LIGHTS_TARGET: &str = "signalman::lights";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text, colored on a terminal.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Filter directive for a `-v` count.
///
/// | `-v` | scheduler | light commands |
/// |------|-----------|----------------|
/// | 0    | warn      | warn           |
/// | 1    | info      | warn           |
/// | 2    | debug     | info           |
/// | 3+   | trace     | trace          |
#[must_use]
pub const fn directive_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info,signalman::lights=warn",
        2 => "debug,signalman::lights=info",
        _ => "trace",
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(directive_for(verbosity)))
}

/// Whether to emit ANSI colors on stderr. `NO_COLOR` disables `auto`.
#[must_use]
pub fn use_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => {
            std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Human => builder.with_ansi(use_ansi(color)).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_directive_parses() {
        for v in 0..=4 {
            assert!(EnvFilter::try_new(directive_for(v)).is_ok(), "-v x{v}");
        }
    }

    #[test]
    fn light_commands_stay_quiet_below_trace() {
        assert!(directive_for(1).contains(&format!("{LIGHTS_TARGET}=warn")));
        assert!(directive_for(2).contains(&format!("{LIGHTS_TARGET}=info")));
        assert_eq!(directive_for(3), "trace");
        assert_eq!(directive_for(u8::MAX), "trace");
    }

    #[test]
    fn explicit_color_choices() {
        assert!(use_ansi(ColorChoice::Always));
        assert!(!use_ansi(ColorChoice::Never));
    }

    #[test]
    fn repeated_init_is_ignored() {
        init_logging(LogFormat::Human, 0, ColorChoice::Auto);
        init_logging(LogFormat::Json, 3, ColorChoice::Never);
    }
}
