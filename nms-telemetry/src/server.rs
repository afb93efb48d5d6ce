//! TelemetryStream server: one TCP listener, one worker task per accepted
//! connection. Connections are independent; no per-rover ordering is
//! imposed.

use crate::sink::SnapshotSink;
use crate::{LEN_PREFIX, MAX_FILENAME_LEN, MIN_FILENAME_LEN};
use nms_core::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Snapshot ingestion server.
pub struct TsServer {
    listener: TcpListener,
    sink: Arc<dyn SnapshotSink>,
}

impl TsServer {
    /// Bind the listener. Failure is fatal at start-up.
    pub async fn bind(addr: SocketAddr, sink: Arc<dyn SnapshotSink>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, sink })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, spawning a worker per snapshot. After
    /// start-up, a failed snapshot is logged and dropped; it never takes
    /// the server down.
    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "telemetry server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                match receive_snapshot(stream, sink).await {
                    Ok(path) => info!(%peer, path = %path.display(), "telemetry snapshot stored"),
                    Err(e) => warn!(%peer, error = %e, "telemetry snapshot dropped"),
                }
            });
        }
    }
}

/// Read one framed snapshot: `LLLL` + filename + body until half-close.
async fn receive_snapshot(
    mut stream: TcpStream,
    sink: Arc<dyn SnapshotSink>,
) -> Result<std::path::PathBuf> {
    let mut len_buf = [0u8; LEN_PREFIX];
    stream.read_exact(&mut len_buf).await?;
    let len: usize = std::str::from_utf8(&len_buf)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol("filename length prefix is not 4 ASCII digits"))?;
    if !(MIN_FILENAME_LEN..=MAX_FILENAME_LEN).contains(&len) {
        return Err(Error::protocol(format!(
            "filename length {len} outside {MIN_FILENAME_LEN}..={MAX_FILENAME_LEN}"
        )));
    }

    let mut name_buf = vec![0u8; len];
    stream.read_exact(&mut name_buf).await?;
    let filename =
        String::from_utf8(name_buf).map_err(|_| Error::protocol("filename is not UTF-8"))?;

    sink.ingest(&filename, &mut stream).await
}
