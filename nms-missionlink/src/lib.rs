#![forbid(unsafe_code)]

//! MissionLink (ML): a reliable, ordered, message- and file-oriented
//! protocol over UDP used for all critical control traffic between the
//! Mother Ship and its rovers.
//!
//! * Textual pipe-delimited framing inside a 1024-byte datagram budget.
//! * Three-way handshake, stop-and-wait delivery, four-way teardown.
//! * One logical message or file per session; sessions are short-lived.
//!
//! The responder ([`MlEndpoint`]) owns the socket bound to the well-known
//! port; each send operation ([`MlSender`]) runs on its own ephemeral
//! socket, so the two roles never contend for a socket.

pub mod endpoint;
pub mod frame;
pub mod initiator;

pub use endpoint::{Delivery, MlEndpoint, Payload};
pub use frame::{Flag, Frame, OpType, HEADER_SIZE, MAX_DATAGRAM, MAX_PAYLOAD};
pub use initiator::{MlSender, INITIAL_SEQ};

use nms_core::NmsConfig;
use std::time::Duration;

/// Tunables of a MissionLink endpoint. Defaults match the reference
/// deployment.
#[derive(Debug, Clone)]
pub struct MlConfig {
    /// Datagram budget in bytes.
    pub buffer_size: usize,
    /// Timeout of each handshake wait.
    pub handshake_timeout: Duration,
    /// Timeout of each data and teardown wait.
    pub data_timeout: Duration,
    /// Retransmissions allowed per wait.
    pub retry_limit: u32,
    /// Wall-clock budget of one accept call.
    pub accept_budget: Duration,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            buffer_size: MAX_DATAGRAM,
            handshake_timeout: Duration::from_secs(2),
            data_timeout: Duration::from_secs(2),
            retry_limit: 5,
            accept_budget: Duration::from_secs(10),
        }
    }
}

impl MlConfig {
    pub fn from_nms(cfg: &NmsConfig) -> Self {
        Self {
            buffer_size: cfg.buffer_size,
            handshake_timeout: cfg.handshake_timeout(),
            data_timeout: cfg.data_timeout(),
            retry_limit: cfg.retry_limit,
            accept_budget: cfg.accept_budget(),
        }
    }

    /// Useful payload per data frame at this buffer size.
    pub fn max_payload(&self) -> usize {
        self.buffer_size.saturating_sub(HEADER_SIZE)
    }
}
