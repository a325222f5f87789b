//! Command-line interface
//!
//! Argument definitions and command handlers for the `signalman` binary.

pub mod args;
pub mod commands;
