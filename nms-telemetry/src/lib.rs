#![forbid(unsafe_code)]

//! TelemetryStream (TS): a framed file-transfer protocol over TCP for the
//! one-way, high-volume flow of telemetry snapshots from rovers to the
//! Mother Ship.
//!
//! One connection carries one snapshot: four ASCII digits of filename
//! length, the filename, then the body until half-close. The server files
//! each snapshot under `<store-root>/<rover_id>/<filename>` once the body's
//! `rover_id` is known.

pub mod client;
pub mod server;
pub mod sink;

pub use client::TsClient;
pub use server::TsServer;
pub use sink::{SnapshotSink, TelemetryStore};

/// Width of the filename-length prefix.
pub const LEN_PREFIX: usize = 4;

/// Bounds of a legal filename length.
pub const MIN_FILENAME_LEN: usize = 1;
pub const MAX_FILENAME_LEN: usize = 255;
