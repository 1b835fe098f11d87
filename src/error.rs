//! Error types surfaced by the client.
//!
//! [`ClientError`] covers call-site validation failures, which are returned
//! straight from the offending call, and network or protocol failures, which
//! are reported through [`Event::Error`](crate::Event::Error) and the final
//! close reason. [`RequestError`] describes why a request finished without a
//! reply.

use std::io;

use thiserror::Error;

use crate::parser::ParseError;

/// Errors emitted by [`Client`](crate::Client) operations and the connection
/// state machine.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The server sent bytes that could not be parsed.
    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),
    /// The first frame after connecting was not `INFO`.
    #[error("expected INFO as first frame, received {0}")]
    UnexpectedFirstFrame(&'static str),
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    /// The connection is draining and accepts no new interest.
    #[error("connection is draining")]
    Draining,
    /// A subject was empty or malformed.
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),
    /// A queue group name was empty or malformed.
    #[error("invalid queue group {0:?}")]
    InvalidQueueGroup(String),
    /// A payload exceeds the server's advertised `max_payload`.
    #[error("payload of {size} bytes exceeds server maximum of {max} bytes")]
    MaxPayloadExceeded {
        /// Size of the rejected payload.
        size: usize,
        /// Limit advertised by the server.
        max: usize,
    },
    /// Headers were supplied but the server does not support them.
    #[error("server does not support message headers")]
    HeadersNotSupported,
    /// The configured credentials contradict each other.
    #[error("invalid authentication options: {0}")]
    InvalidAuth(&'static str),
    /// The authenticator failed to produce credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server requires TLS but the client is configured for plaintext.
    #[error("server requires a secure connection")]
    TlsRequired,
    /// The client requires TLS but the server does not offer it.
    #[error("server does not support a secure connection")]
    TlsUnavailable,
    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),
    /// The server reported an error and the connection was torn down.
    #[error("server error: {0}")]
    Server(String),
    /// The server stopped answering pings.
    #[error("stale connection")]
    StaleConnection,
    /// No server is left to connect to.
    #[error("no servers available for connection")]
    NoServers,
    /// A server URL could not be parsed.
    #[error("invalid server url {url:?}: {reason}")]
    InvalidUrl {
        /// Rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A connect attempt did not finish in time.
    #[error("connect attempt timed out")]
    ConnectTimeout,
    /// A JSON payload could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether this error ended the connection for good.
    #[must_use]
    pub fn is_closed(&self) -> bool { matches!(self, Self::Closed) }
}

/// Reasons a request completed without a usable reply.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// No reply arrived before the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// The server reported that nobody is subscribed to the subject.
    #[error("no responders for request")]
    NoResponders,
    /// The connection closed before the request completed.
    #[error("connection closed before reply")]
    Closed,
    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
    /// The request could not be published.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<ClientError> for RequestError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Closed => Self::Closed,
            other => Self::Rejected(other.to_string()),
        }
    }
}
