//! Built-in intersection presets
//!
//! Intersection layouts embedded in the binary at compile time.
//! Enables zero-configuration usage: `signalman run --preset four-way`

use std::sync::LazyLock;

/// A built-in intersection layout embedded in the binary.
pub struct BuiltinPreset {
    /// Unique identifier (kebab-case, e.g., "four-way").
    pub name: &'static str,

    /// Short human-readable description.
    pub description: &'static str,

    /// Raw YAML content (embedded at compile time).
    pub yaml: &'static str,
}

static BUILTIN_PRESETS: LazyLock<Vec<BuiltinPreset>> = LazyLock::new(|| {
    vec![
        BuiltinPreset {
            name: "four-way",
            description: "Four approaches with straight, left and right heads (12 phases)",
            yaml: include_str!("../../presets/four-way.yaml"),
        },
        BuiltinPreset {
            name: "two-phase",
            description: "Two crossing roads alternating with short timings",
            yaml: include_str!("../../presets/two-phase.yaml"),
        },
    ]
});

/// Look up a preset by exact name.
#[must_use]
pub fn find_preset(name: &str) -> Option<&'static BuiltinPreset> {
    BUILTIN_PRESETS.iter().find(|p| p.name == name)
}

/// Returns all presets in registry order.
#[must_use]
pub fn list_presets() -> Vec<&'static BuiltinPreset> {
    BUILTIN_PRESETS.iter().collect()
}

/// Suggest a similar preset name for typo correction.
///
/// Returns the closest match if its Damerau-Levenshtein distance is ≤ 3.
#[must_use]
pub fn suggest_preset(input: &str) -> Option<String> {
    BUILTIN_PRESETS
        .iter()
        .map(|p| (p.name, strsim::damerau_levenshtein(input, p.name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}
