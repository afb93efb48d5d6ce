#![forbid(unsafe_code)]

//! Core utilities for the NMS rover-fleet workspace.
//!
//! This crate stays lightweight: typed identifiers and records shared by
//! both ends of the wire, the structural mission/telemetry validators,
//! configuration loading, and the common error domain.

pub mod config;
pub mod error;
pub mod net;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use config::NmsConfig;
pub use error::{Error, Result};
pub use types::{
    CardinalDirection, GeoArea, Mission, MissionId, OperationalStatus, Position, ProgressReport,
    ProgressStatus, RoverId, TaskKind, TelemetrySnapshot,
};
