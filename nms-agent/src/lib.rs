#![forbid(unsafe_code)]

//! Rover-side plane: MissionLink session layer with a single mission in
//! execution and a FIFO of further arrivals, the mission-executor seam,
//! and the continuous telemetry scheduler.

pub mod executor;
pub mod session;
pub mod state;
pub mod telemetry_task;

pub use executor::{MissionExecutor, ProgressSink, TimedExecutor};
pub use session::Agent;
pub use state::{RoverState, SharedRover};
pub use telemetry_task::TelemetryReporter;
