//! Signal outputs
//!
//! The light side of the controller: colors, the [`Actuator`] sink the
//! phase engine writes to, and the pole topology used to address an
//! approach during emergency preemption.
//!
//! - [`LightColor`]: red, yellow, green
//! - [`Actuator`]: fire-and-forget "set color" sink
//! - [`LoggingActuator`] / [`RecordingActuator`]: reference sinks
//! - [`Topology`]: poles indexed by road and direction

pub mod actuator;
pub mod topology;

pub use actuator::{Actuator, LightColor, LightCommand, LoggingActuator, RecordingActuator};
pub use topology::{Topology, TrafficPole};
