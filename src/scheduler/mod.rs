//! Phase scheduling
//!
//! The loop that walks the cycle ([`engine`]), the conflict-resolution
//! transaction it runs for every entry ([`resolver`]), and the signal an
//! emergency request uses to interrupt it ([`preempt`]).

pub mod engine;
pub mod preempt;
pub mod resolver;

pub use engine::{
    CycleOutcome, EmergencyReport, Scheduler, SchedulerOptions, SchedulerSnapshot, SchedulerStatus,
};
pub use preempt::PreemptionChannel;
pub use resolver::{Clearance, ConflictResolver, Resolution, Stage};
