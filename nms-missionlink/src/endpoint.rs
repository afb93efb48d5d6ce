//! MissionLink responder endpoint.
//!
//! One `MlEndpoint` owns the UDP socket bound to the well-known port and
//! serves inbound sessions sequentially: accept a handshake, run the
//! stop-and-wait receive until FIN, tear the session down, return the
//! delivery. The initiator side lives in [`crate::initiator`] on its own
//! ephemeral socket, so no lock is needed around the socket.
//!
//! Retransmission duplicates are absorbed with a single-slot buffer: each
//! payload is committed only when the next distinct sequence number (or the
//! FIN) arrives, so a byte is never delivered twice.

use crate::frame::{Flag, Frame, OpType, MAX_DATAGRAM, SENTINEL};
use crate::MlConfig;
use nms_core::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

/// What a completed session delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// An in-memory message body, trailing sentinel stripped.
    Message(String),
    /// A file streamed to disk under the endpoint's store directory.
    File(PathBuf),
}

/// One completed inbound MissionLink session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Agent id carried in the handshake.
    pub agent_id: String,
    /// Mission id bound by the first data frame.
    pub mission_id: String,
    /// Operation type of the session's data frames.
    pub op: OpType,
    pub payload: Payload,
    /// Peer address observed at handshake.
    pub peer: SocketAddr,
}

/// Per-session connection state, created by the handshake and destroyed by
/// teardown.
struct Session {
    peer: SocketAddr,
    agent_id: String,
    seq: u32,
}

/// Responder half of a MissionLink endpoint.
pub struct MlEndpoint {
    socket: UdpSocket,
    cfg: MlConfig,
    store_root: PathBuf,
}

impl MlEndpoint {
    /// Bind the responder socket and ensure the store directory exists.
    /// Failure of either is fatal at start-up.
    pub async fn bind(
        addr: SocketAddr,
        store_root: impl Into<PathBuf>,
        cfg: MlConfig,
    ) -> Result<Self> {
        let store_root = store_root.into();
        tokio::fs::create_dir_all(&store_root).await?;
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            cfg,
            store_root,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve one inbound session to completion.
    ///
    /// Blocks until a handshake arrives, then runs the reliable receive. A
    /// quiet socket surfaces [`Error::Timeout`] after the accept budget so
    /// the caller can re-enter its poll loop.
    ///
    /// A message payload that legitimately ends in `\0` is indistinguishable
    /// from the frame sentinel and loses its final byte; senders must not
    /// produce such payloads.
    pub async fn recv(&self) -> Result<Delivery> {
        let (mut session, pending) = self.accept().await?;
        trace!(
            peer = %session.peer,
            agent = %session.agent_id,
            "handshake complete"
        );
        self.receive_payload(&mut session, pending).await
    }

    /// Wait for a SYN and complete the three-way handshake. Only SYN frames
    /// are consumed from the idle socket; anything else is a stray
    /// retransmission from a dead session and is dropped.
    async fn accept(&self) -> Result<(Session, Option<Frame>)> {
        let mut buf = vec![0u8; MAX_DATAGRAM.max(self.cfg.buffer_size)];
        let deadline = Instant::now() + self.cfg.accept_budget;

        let (syn, peer) = loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            match timeout(deadline - now, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Err(Error::Timeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((n, peer))) => match Frame::decode(&buf[..n]) {
                    Ok(f) if f.flag == Flag::Syn => break (f, peer),
                    _ => continue,
                },
            }
        };

        // During handshake the id slot carries the agent id.
        let agent_id = syn.link_id;
        let syn_seq = syn.seq;
        let syn_ack = Frame::syn_ack(&agent_id, syn_seq).encode()?;

        let mut attempts = 0;
        loop {
            self.socket.send_to(&syn_ack, peer).await?;
            match self
                .recv_frame_from(peer, self.cfg.handshake_timeout)
                .await
            {
                Ok(f)
                    if f.flag == Flag::Ack && f.link_id == agent_id && f.ack == syn_seq =>
                {
                    return Ok((
                        Session {
                            peer,
                            agent_id,
                            seq: syn_seq,
                        },
                        None,
                    ));
                }
                // The handshake ACK and the first data frame can race on a
                // lossy path; a correctly sequenced data frame proves the
                // peer saw our SYN-ACK.
                Ok(f) if f.flag == Flag::Data && f.seq == syn_seq + 1 => {
                    return Ok((
                        Session {
                            peer,
                            agent_id,
                            seq: syn_seq,
                        },
                        Some(f),
                    ));
                }
                Ok(_) | Err(Error::Timeout) | Err(Error::Protocol(_)) => {
                    attempts += 1;
                    if attempts >= self.cfg.retry_limit {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive_payload(
        &self,
        session: &mut Session,
        pending: Option<Frame>,
    ) -> Result<Delivery> {
        let first = match pending {
            Some(frame) => frame,
            None => self.await_first_frame(session).await?,
        };

        // The first data frame binds the session's mission id; every later
        // frame must carry the same one.
        let mission_id = first.link_id.clone();
        let op = first.op;
        session.seq += 1;
        self.send_ack(&mission_id, session).await?;

        if first.body.ends_with(b".json") {
            let filename = String::from_utf8(first.body)
                .map_err(|_| Error::protocol("filename is not UTF-8"))?;
            self.receive_file(session, &mission_id, op, filename).await
        } else {
            self.receive_message(session, &mission_id, op, first.body)
                .await
        }
    }

    /// Wait for the opening data frame of the session.
    async fn await_first_frame(&self, session: &Session) -> Result<Frame> {
        let mut attempts = 0;
        loop {
            match self
                .recv_frame_from(session.peer, self.cfg.data_timeout)
                .await
            {
                Ok(f) if f.flag == Flag::Data && f.seq == session.seq + 1 => return Ok(f),
                Ok(_) => {}
                Err(Error::Timeout) | Err(Error::Protocol(_)) => {
                    attempts += 1;
                    if attempts >= self.cfg.retry_limit {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive_message(
        &self,
        session: &mut Session,
        mission_id: &str,
        op: OpType,
        first_body: Vec<u8>,
    ) -> Result<Delivery> {
        let mut message = first_body;
        let mut prev: Option<Vec<u8>> = None;
        let mut timeouts = 0;

        loop {
            match self.next_session_frame(session, mission_id).await {
                Ok(Some(frame)) => {
                    timeouts = 0;
                    if let Some(chunk) = prev.take() {
                        message.extend_from_slice(&chunk);
                    }
                    if frame.flag == Flag::Fin {
                        message.extend_from_slice(&frame.body);
                        if message.last() == Some(&0) {
                            message.pop();
                        }
                        self.teardown(session, mission_id).await?;
                        let text = String::from_utf8(message)
                            .map_err(|_| Error::protocol("message body is not UTF-8"))?;
                        return Ok(Delivery {
                            agent_id: session.agent_id.clone(),
                            mission_id: mission_id.to_string(),
                            op,
                            payload: Payload::Message(text),
                            peer: session.peer,
                        });
                    }
                    prev = Some(frame.body);
                    self.send_ack(mission_id, session).await?;
                }
                Ok(None) => {
                    timeouts += 1;
                    if timeouts >= self.cfg.retry_limit {
                        return Err(Error::Timeout);
                    }
                    // Re-send the last ACK so the sender can recover.
                    self.send_ack(mission_id, session).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive_file(
        &self,
        session: &mut Session,
        mission_id: &str,
        op: OpType,
        filename: String,
    ) -> Result<Delivery> {
        check_filename(&filename)?;
        let path = self.store_root.join(&filename);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut prev: Option<Vec<u8>> = None;
        let mut timeouts = 0;

        loop {
            match self.next_session_frame(session, mission_id).await {
                Ok(Some(frame)) => {
                    timeouts = 0;
                    if let Some(chunk) = prev.take() {
                        file.write_all(&chunk).await?;
                    }
                    if frame.flag == Flag::Fin {
                        // The final chunk may piggyback on the FIN.
                        if frame.body != SENTINEL {
                            file.write_all(&frame.body).await?;
                        }
                        file.flush().await?;
                        drop(file);
                        self.teardown(session, mission_id).await?;
                        return Ok(Delivery {
                            agent_id: session.agent_id.clone(),
                            mission_id: mission_id.to_string(),
                            op,
                            payload: Payload::File(path),
                            peer: session.peer,
                        });
                    }
                    prev = Some(frame.body);
                    self.send_ack(mission_id, session).await?;
                }
                Ok(None) => {
                    timeouts += 1;
                    if timeouts >= self.cfg.retry_limit {
                        return Err(Error::Timeout);
                    }
                    self.send_ack(mission_id, session).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive the next in-sequence frame of the session, advancing the
    /// sequence counter. Returns `None` on a timeout or a malformed
    /// datagram; duplicates and foreign frames are dropped silently.
    async fn next_session_frame(
        &self,
        session: &mut Session,
        mission_id: &str,
    ) -> Result<Option<Frame>> {
        let deadline = Instant::now() + self.cfg.data_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match self.recv_frame_from_until(session.peer, deadline).await {
                Ok(f)
                    if f.link_id == mission_id
                        && f.seq == session.seq + 1
                        && matches!(f.flag, Flag::Data | Flag::Fin) =>
                {
                    session.seq += 1;
                    return Ok(Some(f));
                }
                Ok(f) => {
                    trace!(seq = f.seq, expected = session.seq + 1, "dropping out-of-sequence frame");
                }
                Err(Error::Timeout) | Err(Error::Protocol(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Four-way teardown, receiver side: acknowledge the peer's FIN, emit
    /// our own, and wait (bounded) for its acknowledgment. Once our FIN ACK
    /// is out, exhausting the retries still counts as closed.
    async fn teardown(&self, session: &mut Session, mission_id: &str) -> Result<()> {
        let fin_ack = Frame::ack(mission_id, session.seq, session.seq).encode()?;
        self.socket.send_to(&fin_ack, session.peer).await?;

        session.seq += 1;
        let fin = Frame::fin(mission_id, session.seq, session.seq).encode()?;

        let mut attempts = 0;
        loop {
            self.socket.send_to(&fin, session.peer).await?;
            match self
                .recv_frame_from(session.peer, self.cfg.data_timeout)
                .await
            {
                Ok(f)
                    if f.flag == Flag::Ack
                        && f.link_id == mission_id
                        && f.ack == session.seq =>
                {
                    return Ok(());
                }
                Ok(f) if f.flag == Flag::Fin => {
                    // Our FIN ACK was lost; acknowledge the retransmission.
                    self.socket.send_to(&fin_ack, session.peer).await?;
                }
                Ok(_) | Err(Error::Timeout) | Err(Error::Protocol(_)) => {
                    attempts += 1;
                    if attempts >= self.cfg.retry_limit {
                        debug!(peer = %session.peer, "counterpart FIN ACK never arrived, closing");
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_ack(&self, mission_id: &str, session: &Session) -> Result<()> {
        let ack = Frame::ack(mission_id, session.seq, session.seq).encode()?;
        self.socket.send_to(&ack, session.peer).await?;
        Ok(())
    }

    /// Receive one decodable frame from `peer` within `dur`. Datagrams from
    /// other peers are dropped without affecting the wait.
    async fn recv_frame_from(&self, peer: SocketAddr, dur: std::time::Duration) -> Result<Frame> {
        self.recv_frame_from_until(peer, Instant::now() + dur).await
    }

    async fn recv_frame_from_until(&self, peer: SocketAddr, deadline: Instant) -> Result<Frame> {
        let mut buf = vec![0u8; MAX_DATAGRAM.max(self.cfg.buffer_size)];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            match timeout(deadline - now, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Err(Error::Timeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((n, src))) => {
                    if src != peer {
                        warn!(%src, expected = %peer, "dropping frame from unexpected peer");
                        continue;
                    }
                    return Frame::decode(&buf[..n]);
                }
            }
        }
    }
}

fn check_filename(name: &str) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_cannot_escape_the_store() {
        assert!(check_filename("telemetry_r1_1712345678_123456.json").is_ok());
        assert!(check_filename("../../etc/passwd.json").is_err());
        assert!(check_filename("a/b.json").is_err());
        assert!(check_filename("a\\b.json").is_err());
        assert!(check_filename("").is_err());
    }
}
