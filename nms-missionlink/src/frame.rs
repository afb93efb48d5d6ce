#![cfg_attr(test, allow(clippy::unwrap_used))]

//! MissionLink frame codec.
//!
//! The header is textual and pipe-delimited so sessions stay readable in a
//! packet trace:
//!
//! ```text
//! F|MMM|SSSS|AAAA|NNNN|O|body
//! ```
//!
//! `F` is the control flag, `MMM` the mission id (or the agent id during
//! handshake), `SSSS`/`AAAA`/`NNNN` zero-padded sequence, acknowledgment and
//! body-length counters, `O` the operation type. Handshake frames carry the
//! placeholder body `-.-` and the literal `_` in the length slot. The body
//! follows the sixth separator unframed and may itself contain `|`.

use nms_core::{Error, Result};
use std::fmt;

/// Datagram budget shared with the reference deployment.
pub const MAX_DATAGRAM: usize = 1024;

/// Worst-case header size: flag + 3-byte id + three 4-digit counters +
/// opType + six separators.
pub const HEADER_SIZE: usize = 1 + 1 + 3 + 1 + 4 + 1 + 4 + 1 + 4 + 1 + 1 + 1;

/// Useful payload per data frame.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_SIZE;

/// Highest representable counter; sessions are short and never wrap.
pub const MAX_SEQ: u32 = 9999;

/// Sentinel body of ACK and FIN frames.
pub const SENTINEL: &[u8] = b"\0";

/// Placeholder body of handshake frames.
pub const HANDSHAKE_BODY: &[u8] = b"-.-";

const HANDSHAKE_SIZE_FIELD: &[u8] = b"_";

/// Control flag of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Syn,
    SynAck,
    Ack,
    Fin,
    Data,
}

impl Flag {
    pub fn as_char(self) -> char {
        match self {
            Flag::Syn => 'S',
            Flag::SynAck => 'Z',
            Flag::Ack => 'A',
            Flag::Fin => 'F',
            Flag::Data => 'D',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            b'S' => Flag::Syn,
            b'Z' => Flag::SynAck,
            b'A' => Flag::Ack,
            b'F' => Flag::Fin,
            b'D' => Flag::Data,
            _ => return None,
        })
    }
}

/// Operation type of a data frame. ACK, FIN and handshake frames carry no
/// operation and encode the literal `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Rover registration.
    Register,
    /// Mission dispatch from the Mother Ship.
    Task,
    /// Mission request from a rover.
    Request,
    /// Progress report from a rover.
    Progress,
    /// No operation: textual replies, ACK/FIN, handshake.
    None,
}

impl OpType {
    pub fn as_char(self) -> char {
        match self {
            OpType::Register => 'R',
            OpType::Task => 'T',
            OpType::Request => 'Q',
            OpType::Progress => 'P',
            OpType::None => 'N',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            b'R' => OpType::Register,
            b'T' => OpType::Task,
            b'Q' => OpType::Request,
            b'P' => OpType::Progress,
            b'N' => OpType::None,
            _ => return None,
        })
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A decoded MissionLink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flag: Flag,
    /// Mission id, or agent id while the session is in handshake.
    pub link_id: String,
    pub seq: u32,
    pub ack: u32,
    pub op: OpType,
    pub body: Vec<u8>,
    /// Handshake frames use the `_` length placeholder on the wire.
    pub handshake: bool,
}

impl Frame {
    pub fn syn(agent_id: &str, seq: u32) -> Self {
        Self {
            flag: Flag::Syn,
            link_id: agent_id.to_string(),
            seq,
            ack: 0,
            op: OpType::None,
            body: HANDSHAKE_BODY.to_vec(),
            handshake: true,
        }
    }

    /// SYN-ACK echoes the initiator's sequence number.
    pub fn syn_ack(agent_id: &str, seq: u32) -> Self {
        Self {
            flag: Flag::SynAck,
            link_id: agent_id.to_string(),
            seq,
            ack: 0,
            op: OpType::None,
            body: HANDSHAKE_BODY.to_vec(),
            handshake: true,
        }
    }

    pub fn handshake_ack(agent_id: &str, seq: u32, ack: u32) -> Self {
        Self {
            flag: Flag::Ack,
            link_id: agent_id.to_string(),
            seq,
            ack,
            op: OpType::None,
            body: HANDSHAKE_BODY.to_vec(),
            handshake: true,
        }
    }

    pub fn data(op: OpType, mission_id: &str, seq: u32, ack: u32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            flag: Flag::Data,
            link_id: mission_id.to_string(),
            seq,
            ack,
            op,
            body: body.into(),
            handshake: false,
        }
    }

    pub fn ack(mission_id: &str, seq: u32, ack: u32) -> Self {
        Self {
            flag: Flag::Ack,
            link_id: mission_id.to_string(),
            seq,
            ack,
            op: OpType::None,
            body: SENTINEL.to_vec(),
            handshake: false,
        }
    }

    pub fn fin(mission_id: &str, seq: u32, ack: u32) -> Self {
        Self {
            flag: Flag::Fin,
            link_id: mission_id.to_string(),
            seq,
            ack,
            op: OpType::None,
            body: SENTINEL.to_vec(),
            handshake: false,
        }
    }

    /// Serialize the frame into a datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        check_link_id(&self.link_id)?;
        if self.seq > MAX_SEQ || self.ack > MAX_SEQ {
            return Err(Error::protocol("sequence space exhausted"));
        }
        if !self.handshake && self.body.len() > MAX_PAYLOAD {
            return Err(Error::protocol(format!(
                "payload of {} bytes exceeds the {MAX_PAYLOAD}-byte frame budget",
                self.body.len()
            )));
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        let header = if self.handshake {
            format!(
                "{}|{}|{:04}|{:04}|_|{}|",
                self.flag.as_char(),
                self.link_id,
                self.seq,
                self.ack,
                self.op.as_char(),
            )
        } else {
            format!(
                "{}|{}|{:04}|{:04}|{:04}|{}|",
                self.flag.as_char(),
                self.link_id,
                self.seq,
                self.ack,
                self.body.len(),
                self.op.as_char(),
            )
        };
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Parse a datagram. Any structural defect is a protocol error; callers
    /// on a retransmission path drop such datagrams and keep waiting.
    pub fn decode(datagram: &[u8]) -> Result<Frame> {
        let (fields, body) = split_header(datagram)
            .ok_or_else(|| Error::protocol("malformed frame: fewer than 7 fields"))?;

        let [flag, link_id, seq, ack, size, op] = fields;

        let flag = match flag {
            [b] => Flag::from_byte(*b),
            _ => None,
        }
        .ok_or_else(|| Error::protocol("malformed frame: unknown flag"))?;

        let link_id = std::str::from_utf8(link_id)
            .map_err(|_| Error::protocol("malformed frame: non-UTF-8 id"))?
            .to_string();
        check_link_id(&link_id)?;

        let seq = ascii_counter(seq)
            .ok_or_else(|| Error::protocol("malformed frame: bad sequence number"))?;
        let ack = ascii_counter(ack)
            .ok_or_else(|| Error::protocol("malformed frame: bad acknowledgment number"))?;

        let op = match op {
            [b] => OpType::from_byte(*b),
            _ => None,
        }
        .ok_or_else(|| Error::protocol("malformed frame: unknown operation type"))?;

        let handshake = size == HANDSHAKE_SIZE_FIELD;
        if !handshake {
            let declared = ascii_counter(size)
                .ok_or_else(|| Error::protocol("malformed frame: bad length field"))?;
            if declared as usize != body.len() {
                return Err(Error::protocol(format!(
                    "malformed frame: length field {declared} but body has {} bytes",
                    body.len()
                )));
            }
        }

        Ok(Frame {
            flag,
            link_id,
            seq,
            ack,
            op,
            body: body.to_vec(),
            handshake,
        })
    }
}

fn check_link_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 3 {
        return Err(Error::protocol(format!(
            "id \"{id}\" does not fit the 3-byte header slot"
        )));
    }
    if id.bytes().any(|b| b == b'|' || b.is_ascii_control()) {
        return Err(Error::protocol(format!(
            "id \"{id}\" contains a separator or control byte"
        )));
    }
    Ok(())
}

/// Split off the six header fields; the remainder is the body, pipes and all.
fn split_header(datagram: &[u8]) -> Option<([&[u8]; 6], &[u8])> {
    let mut rest = datagram;
    let mut fields: [&[u8]; 6] = [&[]; 6];
    for slot in fields.iter_mut() {
        let pos = rest.iter().position(|&b| b == b'|')?;
        *slot = &rest[..pos];
        rest = &rest[pos + 1..];
    }
    Some((fields, rest))
}

fn ascii_counter(field: &[u8]) -> Option<u32> {
    if field.is_empty() || field.len() > 4 || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Slice a payload into frame-sized chunks. A payload that fits in a single
/// frame is returned unchanged; the concatenation of the slices always
/// equals the input.
pub fn split_payload(body: &[u8], max_payload: usize) -> Vec<&[u8]> {
    if body.len() <= max_payload {
        vec![body]
    } else {
        body.chunks(max_payload).collect()
    }
}
