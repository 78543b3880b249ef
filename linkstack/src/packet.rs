//! The message unit every layer and socket operates on.
//!
//! A [`Packet`] carries a peer address, a signed sequence number and an opaque
//! payload.  The sign of the sequence number encodes its role:
//!
//! | `seq`  | Meaning                                         |
//! |--------|-------------------------------------------------|
//! | `> 0`  | data packet number `seq`                        |
//! | `< 0`  | acknowledgement of data packet number `-seq`    |
//! | `0`    | malformed; never produced by this crate         |
//!
//! The peer is the **destination** while a packet travels down the stack and
//! the **origin** once it has arrived from the network.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Sequence Number (i64, BE)                   |
//! +                                                               +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The peer address is not encoded: it is the datagram's source or
//! destination.  The payload length is implied by the datagram length.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 8;

/// What a sequence number says about its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Application data with the given (positive) sequence number.
    Data(u64),
    /// Acknowledgement of the data packet with the given sequence number.
    Ack(u64),
    /// Sequence number zero.
    Invalid,
}

/// One immutable message unit.
///
/// Identity is `(peer, seq)`: two packets with the same peer and sequence
/// number compare equal whatever their payloads.
#[derive(Debug, Clone)]
pub struct Packet {
    peer: SocketAddr,
    seq: i64,
    payload: Vec<u8>,
}

impl Packet {
    pub fn new(peer: SocketAddr, seq: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            peer,
            seq,
            payload: payload.into(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn kind(&self) -> Kind {
        match self.seq {
            0 => Kind::Invalid,
            s if s > 0 => Kind::Data(s.unsigned_abs()),
            s => Kind::Ack(s.unsigned_abs()),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind(), Kind::Ack(_))
    }

    /// The acknowledgement answering this packet: same peer, sign inverted,
    /// empty payload.
    pub fn ack(&self) -> Packet {
        Packet {
            peer: self.peer,
            seq: self.seq.wrapping_neg(),
            payload: Vec::new(),
        }
    }

    /// A copy of this packet addressed to `peer`.
    pub fn with_peer(&self, peer: SocketAddr) -> Packet {
        Packet {
            peer,
            seq: self.seq,
            payload: self.payload.clone(),
        }
    }

    /// Serialise into a newly allocated datagram body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram body received from `peer`.
    pub fn decode(peer: SocketAddr, buf: &[u8]) -> Result<Self, PacketError> {
        let (header, payload) = buf
            .split_first_chunk::<HEADER_LEN>()
            .ok_or(PacketError::BufferTooShort(buf.len()))?;
        Ok(Packet {
            peer,
            seq: i64::from_be_bytes(*header),
            payload: payload.to_vec(),
        })
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.peer == other.peer && self.seq == other.seq
    }
}

impl Eq for Packet {}

impl Hash for Packet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer.hash(state);
        self.seq.hash(state);
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Kind::Data(s) => write!(f, "DATA {} seq={} len={}", self.peer, s, self.payload.len()),
            Kind::Ack(s) => write!(f, "ACK {} seq={}", self.peer, s),
            Kind::Invalid => write!(f, "INVALID {}", self.peer),
        }
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
}
