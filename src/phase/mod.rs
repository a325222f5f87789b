//! Phase engine
//!
//! Per-phase timing state machines ([`state`]) and the static registry that
//! holds them together with the cycle order ([`registry`]).

pub mod registry;
pub mod state;

pub use registry::{PhaseRegistry, PhaseRegistryBuilder, PhaseSpec};
pub use state::{Phase, PhaseSnapshot, PhaseState, PhaseTiming, Transition, TransitionKind};
