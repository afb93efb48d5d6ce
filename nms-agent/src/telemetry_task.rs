#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Continuous telemetry scheduler.
//!
//! At a fixed interval the scheduler snapshots the rover state, spools it
//! to a JSON file whose name embeds a microsecond timestamp (collisions
//! between overlapping reporters are thereby impossible), and pushes it
//! over TelemetryStream. The spool file is removed after a successful
//! send and left in place otherwise. The scheduler runs for the rover's
//! lifetime, independent of mission execution.

use crate::state::SharedRover;
use nms_core::{validate, Result};
use nms_telemetry::TsClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub struct TelemetryReporter {
    rover: SharedRover,
    client: TsClient,
    /// Mother Ship TelemetryStream address.
    controller: SocketAddr,
    interval: Duration,
    spool: PathBuf,
    running: AtomicBool,
}

impl TelemetryReporter {
    pub fn new(
        rover: SharedRover,
        client: TsClient,
        controller: SocketAddr,
        interval: Duration,
        spool: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rover,
            client,
            controller,
            interval,
            spool: spool.into(),
            running: AtomicBool::new(false),
        })
    }

    /// Start the scheduler task; a no-op when it is already running.
    pub fn ensure_running(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(reporter.interval);
            // The first report goes out one interval after start.
            tick.tick().await;
            loop {
                tick.tick().await;
                match reporter.report_once().await {
                    Ok(path) => debug!(path = %path.display(), "telemetry sent"),
                    Err(e) => warn!(error = %e, "telemetry tick failed"),
                }
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Build, spool and send one snapshot. Public for tests and for the
    /// final report at mission completion.
    pub async fn report_once(&self) -> Result<PathBuf> {
        let snapshot = self.rover.read().snapshot();
        validate::validate_telemetry(&snapshot)?;

        tokio::fs::create_dir_all(&self.spool).await?;
        let path = self.spool.join(spool_filename(snapshot.rover_id.as_str()));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?).await?;

        match self.client.send(self.controller, &path).await {
            Ok(()) => {
                // Snapshot delivered; the spool copy has served its purpose.
                let _ = tokio::fs::remove_file(&path).await;
                Ok(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "snapshot left in spool");
                Err(e)
            }
        }
    }
}

fn spool_filename(rover_id: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "telemetry_{}_{}_{:06}.json",
        rover_id,
        now.as_secs(),
        now.subsec_micros()
    )
}
