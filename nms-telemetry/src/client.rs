//! TelemetryStream client: a fresh connection per snapshot.

use crate::{MAX_FILENAME_LEN, MIN_FILENAME_LEN};
use nms_core::{Error, Result};
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Snapshot uploader.
#[derive(Debug, Clone)]
pub struct TsClient {
    buffer_size: usize,
}

impl TsClient {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    /// Send one snapshot file: 4-digit filename length, filename, body,
    /// then half-close. Only the file's base name travels.
    pub async fn send(&self, addr: SocketAddr, path: &Path) -> Result<()> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::protocol(format!("path {path:?} has no usable filename")))?;
        if !(MIN_FILENAME_LEN..=MAX_FILENAME_LEN).contains(&filename.len()) {
            return Err(Error::protocol(format!(
                "filename length {} outside {MIN_FILENAME_LEN}..={MAX_FILENAME_LEN}",
                filename.len()
            )));
        }

        let mut file = tokio::fs::File::open(path).await?;
        let mut stream = TcpStream::connect(addr).await?;

        stream
            .write_all(format!("{:04}", filename.len()).as_bytes())
            .await?;
        stream.write_all(filename.as_bytes()).await?;

        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
        }
        stream.shutdown().await?;
        Ok(())
    }
}
