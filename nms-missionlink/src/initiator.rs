//! MissionLink initiator.
//!
//! Every send operation is one short-lived session on a fresh ephemeral
//! UDP socket: handshake, stop-and-wait data transfer, four-way teardown.
//! The socket is `connect`ed to the peer, so the source-address half of the
//! ACK validity predicate is enforced by the kernel.

use crate::frame::{split_payload, Flag, Frame, OpType, MAX_DATAGRAM};
use crate::MlConfig;
use nms_core::{Error, Result};
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

/// Deterministic initial sequence number. The protocol does not defend
/// against off-path injection.
pub const INITIAL_SEQ: u32 = 100;

/// Initiator half of a MissionLink endpoint.
#[derive(Debug, Clone)]
pub struct MlSender {
    cfg: MlConfig,
}

impl MlSender {
    pub fn new(cfg: MlConfig) -> Self {
        Self { cfg }
    }

    /// Send a payload to `peer`. A body ending in `.json` names a file to
    /// stream; anything else is carried as an in-memory message.
    pub async fn send(
        &self,
        peer: SocketAddr,
        op: OpType,
        agent_id: &str,
        mission_id: &str,
        payload: &str,
    ) -> Result<()> {
        if payload.ends_with(".json") {
            self.send_file(peer, op, agent_id, mission_id, Path::new(payload))
                .await
        } else {
            self.send_message(peer, op, agent_id, mission_id, payload)
                .await
        }
    }

    /// Send an in-memory message, fragmenting it when it exceeds the frame
    /// budget.
    pub async fn send_message(
        &self,
        peer: SocketAddr,
        op: OpType,
        agent_id: &str,
        mission_id: &str,
        message: &str,
    ) -> Result<()> {
        let link = Link::connect(peer, self.cfg.clone()).await?;
        let mut seq = link.handshake(agent_id).await?;

        for chunk in split_payload(message.as_bytes(), self.cfg.max_payload()) {
            link.send_data(Frame::data(op, mission_id, seq, seq, chunk), mission_id, seq)
                .await?;
            seq += 1;
        }
        link.finish(mission_id, seq).await
    }

    /// Stream a file: one frame for its name, then its contents in
    /// frame-budget slices.
    pub async fn send_file(
        &self,
        peer: SocketAddr,
        op: OpType,
        agent_id: &str,
        mission_id: &str,
        path: &Path,
    ) -> Result<()> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::protocol(format!("path {path:?} has no usable filename")))?;
        let mut file = tokio::fs::File::open(path).await?;

        let link = Link::connect(peer, self.cfg.clone()).await?;
        let mut seq = link.handshake(agent_id).await?;

        link.send_data(
            Frame::data(op, mission_id, seq, seq, filename),
            mission_id,
            seq,
        )
        .await?;
        seq += 1;

        let mut buf = vec![0u8; self.cfg.max_payload()];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            link.send_data(
                Frame::data(op, mission_id, seq, seq, &buf[..n]),
                mission_id,
                seq,
            )
            .await?;
            seq += 1;
        }
        link.finish(mission_id, seq).await
    }
}

/// One connected session socket.
struct Link {
    socket: UdpSocket,
    cfg: MlConfig,
}

impl Link {
    async fn connect(peer: SocketAddr, cfg: MlConfig) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer).await?;
        Ok(Self { socket, cfg })
    }

    /// Transmit one datagram. A connected UDP socket reports ICMP
    /// port-unreachable as `ConnectionRefused`; for the protocol that is
    /// indistinguishable from loss, so it is swallowed and the normal
    /// retransmission path takes over.
    async fn transmit(&self, bytes: &[u8]) -> Result<()> {
        match self.socket.send(bytes).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Three-way handshake; returns the first data sequence number.
    async fn handshake(&self, agent_id: &str) -> Result<u32> {
        let syn = Frame::syn(agent_id, INITIAL_SEQ).encode()?;
        let mut attempts = 0;
        loop {
            self.transmit(&syn).await?;
            match self.recv_frame(self.cfg.handshake_timeout).await {
                Ok(f) if f.flag == Flag::SynAck => break,
                Ok(_) | Err(Error::Timeout) | Err(Error::Protocol(_)) => {
                    attempts += 1;
                    if attempts >= self.cfg.retry_limit {
                        debug!(agent = agent_id, "handshake retries exhausted");
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        let ack = Frame::handshake_ack(agent_id, INITIAL_SEQ, INITIAL_SEQ).encode()?;
        self.transmit(&ack).await?;
        Ok(INITIAL_SEQ + 1)
    }

    /// Stop-and-wait: transmit one data frame until its ACK arrives. The
    /// ACK must carry the session's mission id and acknowledge exactly this
    /// sequence number; anything else triggers a retransmission.
    async fn send_data(&self, frame: Frame, mission_id: &str, seq: u32) -> Result<()> {
        let bytes = frame.encode()?;
        let mut attempts = 0;
        loop {
            self.transmit(&bytes).await?;
            match self.recv_frame(self.cfg.data_timeout).await {
                Ok(f) if f.flag == Flag::Ack && f.link_id == mission_id && f.ack == seq => {
                    return Ok(());
                }
                Ok(f) => {
                    trace!(flag = ?f.flag, ack = f.ack, expected = seq, "invalid ACK, retransmitting");
                }
                Err(Error::Timeout) | Err(Error::Protocol(_)) => {}
                Err(e) => return Err(e),
            }
            attempts += 1;
            if attempts >= self.cfg.retry_limit {
                return Err(Error::Timeout);
            }
        }
    }

    /// Four-way teardown, initiator side: FIN, peer's ACK, peer's FIN, our
    /// final ACK. If the peer's FIN never arrives but our FIN was
    /// acknowledged, the payload is committed on the far side and the
    /// session counts as closed.
    async fn finish(&self, mission_id: &str, fin_seq: u32) -> Result<()> {
        let fin = Frame::fin(mission_id, fin_seq, fin_seq).encode()?;
        let mut fin_acked = false;
        let mut attempts = 0;
        loop {
            self.transmit(&fin).await?;
            match self.recv_frame(self.cfg.data_timeout).await {
                Ok(f) if f.flag == Flag::Ack && f.link_id == mission_id && f.ack == fin_seq => {
                    fin_acked = true;
                }
                Ok(f) if f.flag == Flag::Fin && f.link_id == mission_id => {
                    let last_ack = Frame::ack(mission_id, fin_seq + 1, f.seq).encode()?;
                    self.transmit(&last_ack).await?;
                    return Ok(());
                }
                Ok(_) | Err(Error::Timeout) | Err(Error::Protocol(_)) => {}
                Err(e) => return Err(e),
            }
            attempts += 1;
            if attempts >= self.cfg.retry_limit {
                if fin_acked {
                    debug!("peer FIN never arrived, session already acknowledged, closing");
                    return Ok(());
                }
                return Err(Error::Timeout);
            }
        }
    }

    async fn recv_frame(&self, dur: std::time::Duration) -> Result<Frame> {
        let mut buf = vec![0u8; MAX_DATAGRAM.max(self.cfg.buffer_size)];
        let deadline = Instant::now() + dur;
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }
        match timeout(deadline - now, self.socket.recv(&mut buf)).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                // Queued ICMP unreachable; equivalent to a lost reply.
                Err(Error::Timeout)
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(n)) => Frame::decode(&buf[..n]),
        }
    }
}
