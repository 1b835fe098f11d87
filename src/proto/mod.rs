//! Protocol operations exchanged with a NATS server.
//!
//! [`ClientOp`] covers every frame the client writes and knows how to encode
//! itself into a [`BytesMut`]. [`ServerOp`] is the tagged union produced by
//! the [`Parser`](crate::parser::Parser) for every frame the server sends.

mod encode;
mod info;
mod subject;

use bytes::Bytes;
pub use info::{ConnectInfo, ServerInfo};
pub use subject::{validate_queue_group, validate_subject};

use crate::headers::HeaderMap;

/// Client-local subscription identifier.
pub type Sid = u64;

/// Version of the client protocol advertised in `CONNECT`.
///
/// Protocol `1` enables asynchronous `INFO` updates carrying cluster topology.
pub const PROTOCOL_VERSION: u8 = 1;

/// Operations written by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientOp {
    /// `CONNECT <json>`.
    Connect(Box<ConnectInfo>),
    /// `PUB`, or `HPUB` when headers are present.
    Pub {
        /// Destination subject.
        subject: String,
        /// Optional reply subject.
        reply: Option<String>,
        /// Optional header block.
        headers: Option<HeaderMap>,
        /// Opaque payload.
        payload: Bytes,
    },
    /// `SUB <subject> [queue] <sid>`.
    Sub {
        /// Subject of interest.
        subject: String,
        /// Optional queue group.
        queue_group: Option<String>,
        /// Subscription identifier.
        sid: Sid,
    },
    /// `UNSUB <sid> [max]`.
    Unsub {
        /// Subscription identifier.
        sid: Sid,
        /// Number of further messages after which the server drops interest.
        max: Option<u64>,
    },
    /// `PING`.
    Ping,
    /// `PONG`.
    Pong,
}

/// A `MSG` or `HMSG` frame after its payload has been fully assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgFrame {
    /// Subject the message was published on.
    pub subject: String,
    /// Subscription the server routed this message to.
    pub sid: Sid,
    /// Reply subject, when the publisher supplied one.
    pub reply: Option<String>,
    /// Decoded header block of an `HMSG`.
    pub headers: Option<HeaderMap>,
    /// Payload bytes without the trailing CRLF.
    pub payload: Bytes,
}

/// Operations received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerOp {
    /// `INFO <json>`.
    Info(Box<ServerInfo>),
    /// `MSG` or `HMSG`.
    Msg(MsgFrame),
    /// `+OK`, only sent in verbose mode.
    Ok,
    /// `-ERR '<text>'`, with the quotes removed.
    Err(String),
    /// `PING`.
    Ping,
    /// `PONG`.
    Pong,
}

impl ServerOp {
    /// Protocol verb naming this operation.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Info(_) => "INFO",
            Self::Msg(frame) if frame.headers.is_some() => "HMSG",
            Self::Msg(_) => "MSG",
            Self::Ok => "+OK",
            Self::Err(_) => "-ERR",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}
