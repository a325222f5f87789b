//! `presets` command
//!
//! Lists the intersection layouts embedded in the binary.

use serde::Serialize;

use crate::cli::args::{OutputFormat, PresetsArgs};
use crate::config::loader::ConfigLoader;
use crate::config::presets::list_presets;
use crate::error::SignalmanError;

#[derive(Debug, Serialize)]
struct PresetInfo {
    name: &'static str,
    description: &'static str,
    phases: usize,
    poles: usize,
}

/// Print the built-in presets.
///
/// # Errors
///
/// Returns a config error if an embedded preset fails to load, or a JSON
/// error if serialization fails.
pub fn run(args: &PresetsArgs) -> Result<(), SignalmanError> {
    let loader = ConfigLoader::with_defaults();
    let mut infos = Vec::new();
    for preset in list_presets() {
        let loaded = loader.load_preset(preset.name)?;
        infos.push(PresetInfo {
            name: preset.name,
            description: preset.description,
            phases: loaded.config.phases.len(),
            poles: loaded.config.poles.len(),
        });
    }

    match args.format {
        OutputFormat::Human => {
            for info in &infos {
                println!("{:<12} {}", info.name, info.description);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
    }
    Ok(())
}
