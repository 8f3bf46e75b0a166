use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_TAG: [u8; 3] = *b"TSP";
pub const WIRE_VERSION: u8 = 1;
pub const RESERVED_BYTES: usize = 4;
pub const REQUEST_LEN: usize = 16;
pub const REPLY_LEN: usize = 24;
pub const DEFAULT_PORT: u16 = 12321;

pub type Reserved = [u8; RESERVED_BYTES];

/// Leading bytes shared by request and reply.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub protocol: [u8; 3],
    pub version: u8,
    pub reserved: Reserved,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRequest {
    pub header: Header,
    pub client_cookie: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReply {
    pub header: Header,
    pub client_cookie: u64, // echoed from request
    pub time_since_epoch_ms: u64,
}

/// Why a datagram was dropped without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort { len: usize },
    UnknownProtocol,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { len } => {
                write!(f, "datagram too short ({len} of {REQUEST_LEN} bytes)")
            }
            Rejection::UnknownProtocol => write!(f, "protocol tag is not TSP"),
        }
    }
}

impl Header {
    pub fn new() -> Self {
        Header {
            protocol: PROTOCOL_TAG,
            version: WIRE_VERSION,
            reserved: [0; RESERVED_BYTES],
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeRequest {
    pub fn new(client_cookie: u64) -> Self {
        TimeRequest {
            header: Header::new(),
            client_cookie,
        }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }
}

impl TimeReply {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn from_bytes(buf: &[u8]) -> anyhow::Result<Self> {
        Ok(codec().deserialize(buf)?)
    }
}

/// Fixed-width, network byte order. Trailing bytes are tolerated so a longer
/// datagram still decodes from its leading fields.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .allow_trailing_bytes()
}

/// Checks length and protocol tag. The version byte and reserved bytes are
/// accepted whatever they hold.
pub fn validate(datagram: &[u8]) -> Result<&[u8; REQUEST_LEN], Rejection> {
    let Some(head) = datagram.first_chunk::<REQUEST_LEN>() else {
        return Err(Rejection::TooShort {
            len: datagram.len(),
        });
    };
    if head[..PROTOCOL_TAG.len()] != PROTOCOL_TAG {
        return Err(Rejection::UnknownProtocol);
    }
    Ok(head)
}

/// Builds the 24-byte reply: the validated request header copied verbatim,
/// then the timestamp.
pub fn encode_reply(head: &[u8; REQUEST_LEN], now_ms: u64) -> [u8; REPLY_LEN] {
    let mut reply = [0u8; REPLY_LEN];
    reply[..REQUEST_LEN].copy_from_slice(head);
    reply[REQUEST_LEN..].copy_from_slice(&now_ms.to_be_bytes());
    reply
}
