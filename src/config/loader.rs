//! Configuration loader
//!
//! Loading pipeline:
//! 1. Size check and raw read (UTF-8 BOM stripped)
//! 2. Environment variable expansion on the raw text
//! 3. YAML deserialization into [`IntersectionConfig`]
//! 4. Validation (all issues collected)
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::presets;
use crate::config::schema::IntersectionConfig;
use crate::config::validation::Validator;
use crate::error::{ConfigError, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Limits for configuration size.
    pub config_limits: ConfigLimits,

    /// Treat validation warnings as errors.
    pub strict: bool,
}

/// Limits for configuration size to prevent resource exhaustion.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of phases.
    pub max_phases: usize,

    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_phases: env_or("SIGNALMAN_MAX_PHASES", 64),
            max_config_size: env_or("SIGNALMAN_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a configuration.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<IntersectionConfig>,

    /// Warnings encountered during loading and validation.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl From<ValidationIssue> for LoadWarning {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            message: issue.message,
            location: Some(issue.path),
        }
    }
}

/// Configuration loader.
#[derive(Debug)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a new configuration loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a new configuration loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads a configuration file and returns the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, exceeds the size limit,
    /// references an unset required environment variable, fails to parse,
    /// or fails validation.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let limit = self.options.config_limits.max_config_size;
        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > limit {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {limit} bytes"),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_source(&raw, path)
    }

    /// Loads a configuration from an in-memory YAML string.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus file access.
    pub fn load_from_str(&self, yaml: &str) -> Result<LoadResult, ConfigError> {
        self.load_source(yaml, Path::new("<inline>"))
    }

    /// Loads one of the built-in presets by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPreset`] (with a suggestion when one
    /// is close) or any loading error from the embedded YAML.
    pub fn load_preset(&self, name: &str) -> Result<LoadResult, ConfigError> {
        let preset = presets::find_preset(name).ok_or_else(|| ConfigError::UnknownPreset {
            name: name.to_string(),
            suggestion: presets::suggest_preset(name),
        })?;
        self.load_source(preset.yaml, &PathBuf::from(format!("preset:{}", preset.name)))
    }

    fn load_source(&self, raw: &str, source: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let (expanded, mut warnings) = expand_env(raw, source)?;

        let config: IntersectionConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&config, &self.options.config_limits);

        let mut errors = result.errors;
        if self.options.strict {
            errors.extend(result.warnings);
        } else {
            warnings.extend(result.warnings.into_iter().map(LoadWarning::from));
        }

        if !errors.is_empty() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors,
            });
        }

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Expansion
// ============================================================================

/// Expands `${VAR}`, `${VAR:-default}` and `${VAR:?message}` references.
///
/// `$$` is a literal `$`. An unset `${VAR}` expands to the empty string
/// and produces a warning; an unset `${VAR:?message}` is an error.
fn expand_env(raw: &str, source: &Path) -> Result<(String, Vec<LoadWarning>), ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut warnings = Vec::new();
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let Some(body_start) = after.strip_prefix('{') else {
            out.push('$');
            rest = after;
            continue;
        };

        let Some(close) = body_start.find('}') else {
            return Err(ConfigError::ParseError {
                path: source.to_path_buf(),
                line: None,
                message: format!(
                    "unclosed environment variable reference: ${{{}",
                    body_start.lines().next().unwrap_or_default()
                ),
            });
        };

        let spec = &body_start[..close];
        rest = &body_start[close + 1..];

        let (name, fallback) = match spec.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (spec, None),
        };

        match (std::env::var(name), fallback) {
            (Ok(value), _) => out.push_str(&value),
            (Err(_), Some(modifier)) if modifier.starts_with('-') => out.push_str(&modifier[1..]),
            (Err(_), Some(modifier)) if modifier.starts_with('?') => {
                return Err(ConfigError::EnvVarNotSet {
                    var: name.to_string(),
                    location: modifier[1..].to_string(),
                });
            }
            (Err(_), _) => warnings.push(LoadWarning {
                message: format!("Environment variable '{name}' is not set, using empty string"),
                location: Some(source.display().to_string()),
            }),
        }
    }

    out.push_str(rest);
    Ok((out, warnings))
}

/// Reads a numeric limit from the environment, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
