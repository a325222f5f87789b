//! Configuration module
//!
//! Loading, validation, and built-in presets for intersection
//! configuration files.

pub mod loader;
pub mod presets;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
