#![forbid(unsafe_code)]

//! Mother Ship control plane.
//!
//! The controller keeps an in-memory registry of rovers, a queue of
//! pending missions, the active task map and the per-mission progress map.
//! All mutations run on the MissionLink dispatch task; the telemetry
//! server files snapshots independently and the external observation API
//! reads through [`ObservationView`].

pub mod dispatch;
pub mod library;
pub mod observe;
pub mod state;

pub use dispatch::{reply, Controller};
pub use library::MissionLibrary;
pub use observe::{MissionPhase, ObservationView};
pub use state::{AgentRecord, ControllerState, SharedState};
