//! `signalman` - intersection signal-phase controller
//!
//! Decides which conflict-free groups of signal phases show green,
//! sequences every change through yellow and all-red clearance, and lets
//! an emergency request preempt the cycle safely.
//!
//! Layers, leaf to root:
//!
//! - [`signal`]: light actuation and pole topology
//! - [`phase`]: per-phase state machines and the phase registry
//! - [`scheduler`]: conflict resolution, the cycle loop, and preemption
//! - [`controller`]: supervision, restarts, and scheduled emergencies
//! - [`config`], [`observability`], [`cli`]: the ambient surface

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod observability;
pub mod phase;
pub mod scheduler;
pub mod signal;

pub use error::{Result, SignalmanError};
