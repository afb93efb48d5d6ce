#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Storage layout contract for telemetry snapshots.
//!
//! Snapshots land under `<root>/<rover_id>/<filename>`; a body whose JSON
//! carries no `rover_id` stays at the root. Files are immutable once
//! written. The trait is the seam for the external storage layer; the
//! directory-backed implementation here is what the daemons ship with.

use async_trait::async_trait;
use nms_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Destination of received snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Drain `body` to storage under `filename` and return the final path.
    async fn ingest(
        &self,
        filename: &str,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PathBuf>;
}

/// Directory-tree sink implementing the reference layout.
pub struct TelemetryStore {
    root: PathBuf,
    buffer_size: usize,
}

impl TelemetryStore {
    /// Open (and create) the store root. Failure here is fatal at start-up.
    pub async fn open(root: impl Into<PathBuf>, buffer_size: usize) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root, buffer_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List stored snapshot paths for one rover, newest-named last, at most
    /// `limit` entries. Used by the observation read view.
    pub fn list_snapshots(&self, rover_id: &str, limit: usize) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(rover_id);
        let mut names: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        names.sort();
        if names.len() > limit {
            names.drain(..names.len() - limit);
        }
        Ok(names)
    }
}

#[async_trait]
impl SnapshotSink for TelemetryStore {
    async fn ingest(
        &self,
        filename: &str,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PathBuf> {
        check_filename(filename)?;

        let staged = self.root.join(filename);
        if tokio::fs::try_exists(&staged).await? {
            return Err(Error::protocol(format!(
                "snapshot {filename} already stored; files are immutable"
            )));
        }

        let mut file = tokio::fs::File::create(&staged).await?;
        let mut collected = Vec::new();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            collected.extend_from_slice(&buf[..n]);
        }
        file.flush().await?;
        drop(file);

        // Telemetry bodies carry their origin; file them per rover.
        let Some(rover_id) = extract_rover_id(&collected) else {
            debug!(filename, "snapshot has no rover_id, kept at store root");
            return Ok(staged);
        };
        check_filename(&rover_id)?;
        let dir = self.root.join(&rover_id);
        tokio::fs::create_dir_all(&dir).await?;
        let final_path = dir.join(filename);
        if tokio::fs::try_exists(&final_path).await? {
            return Err(Error::protocol(format!(
                "snapshot {rover_id}/{filename} already stored; files are immutable"
            )));
        }
        tokio::fs::rename(&staged, &final_path).await?;
        Ok(final_path)
    }
}

fn extract_rover_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("rover_id")?.as_str().map(str::to_string)
}

pub(crate) fn check_filename(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.bytes().any(|b| b.is_ascii_control())
    {
        return Err(Error::protocol(format!("unsafe filename {name:?}")));
    }
    Ok(())
}
