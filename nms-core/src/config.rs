#![cfg_attr(test, allow(clippy::unwrap_used))]

//! NMS configuration handling. Parses a TOML file into a strongly-typed
//! structure; every field has a deployment default so a missing or empty
//! file yields the reference configuration.

use crate::error::Result;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// Primary configuration shared by the Mother Ship and rover binaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NmsConfig {
    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,

    /// UDP port of the MissionLink responder endpoint.
    pub missionlink_port: u16,

    /// TCP port of the TelemetryStream server.
    pub telemetry_port: u16,

    /// Datagram budget shared by both protocols, in bytes.
    pub buffer_size: usize,

    /// Timeout for each handshake wait (SYN-ACK, ACK).
    pub handshake_timeout_ms: u64,

    /// Timeout for each data/teardown wait (ACK, next frame, FIN exchange).
    pub data_timeout_ms: u64,

    /// Retransmissions allowed per protocol wait, and whole-mission retries
    /// at the dispatch layer.
    pub retry_limit: u32,

    /// Wall-clock budget a receiver spends waiting for a SYN before
    /// surfacing a timeout to its caller.
    pub accept_budget_ms: u64,

    /// Root directory for received telemetry snapshots and ML file bodies.
    pub store_root: PathBuf,

    /// Explicit mission library directory. When unset the standard search
    /// path is probed (`./serverDB`, `/tmp/nms/serverDB`, `<exe>/../serverDB`).
    pub library_path: Option<PathBuf>,

    /// Interval of the continuous telemetry scheduler.
    pub telemetry_interval_secs: u64,

    /// Preferred local subnet in CIDR form; the first interface inside it
    /// is used as the advertised address.
    pub rover_subnet: String,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            missionlink_port: default_missionlink_port(),
            telemetry_port: default_telemetry_port(),
            buffer_size: default_buffer_size(),
            handshake_timeout_ms: 2_000,
            data_timeout_ms: 2_000,
            retry_limit: 5,
            accept_budget_ms: 10_000,
            store_root: PathBuf::from("store"),
            library_path: None,
            telemetry_interval_secs: 5,
            rover_subnet: "10.0.1.0/24".to_string(),
        }
    }
}

fn default_missionlink_port() -> u16 {
    8080
}

fn default_telemetry_port() -> u16 {
    8081
}

fn default_buffer_size() -> usize {
    1024
}

impl NmsConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(&path)?;
        let cfg = toml::from_str::<NmsConfig>(&data)?;
        Ok(cfg)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }

    pub fn accept_budget(&self) -> Duration {
        Duration::from_millis(self.accept_budget_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = NmsConfig::default();
        assert_eq!(cfg.missionlink_port, 8080);
        assert_eq!(cfg.telemetry_port, 8081);
        assert_eq!(cfg.buffer_size, 1024);
        assert_eq!(cfg.telemetry_interval_secs, 5);
        assert_eq!(cfg.rover_subnet, "10.0.1.0/24");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "missionlink_port = 9090\nstore_root = \"/tmp/nms-store\"").unwrap();
        let cfg = NmsConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.missionlink_port, 9090);
        assert_eq!(cfg.store_root, PathBuf::from("/tmp/nms-store"));
        assert_eq!(cfg.telemetry_port, 8081);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "missionlink_port = \"not a port\"").unwrap();
        assert!(NmsConfig::from_file(f.path()).is_err());
    }
}
