//! Status reported by the connection actor.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{error::ClientError, proto::Sid};

/// Lifecycle state of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is open.
    Disconnected,
    /// Opening the transport for a first connection.
    Connecting,
    /// Waiting for the server's `INFO`.
    AwaitingInfo,
    /// Upgrading the transport to TLS.
    TlsUpgrading,
    /// `CONNECT`, subscriptions and `PING` sent; waiting for `PONG`.
    Handshaking,
    /// Handshake complete.
    Connected,
    /// Opening a transport after a connection was lost.
    Reconnecting,
    /// Unsubscribed everything and waiting for outstanding work.
    Draining,
    /// Terminal state.
    Closed,
}

impl ConnectionState {
    /// Whether the connection is gone for good.
    #[must_use]
    pub fn is_closed(self) -> bool { matches!(self, Self::Closed) }
}

/// Asynchronous notifications from the connection.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Event {
    /// The first connection completed its handshake.
    Connected {
        /// Server URL.
        server: String,
    },
    /// An established connection was lost.
    Disconnected {
        /// Server URL.
        server: String,
    },
    /// A reconnect attempt is starting.
    Reconnecting {
        /// Server URL.
        server: String,
        /// Attempt number against this server.
        attempt: u32,
    },
    /// A reconnect completed its handshake.
    Reconnected {
        /// Server URL.
        server: String,
    },
    /// Cluster gossip changed the set of known servers.
    TopologyChanged {
        /// URLs added.
        added: Vec<String>,
        /// URLs removed.
        removed: Vec<String>,
    },
    /// The server rejected an operation for lack of permission.
    PermissionViolation(String),
    /// A connect attempt or connection failed.
    Error(Arc<ClientError>),
    /// The server stopped answering pings or reported a stale connection.
    StaleConnection,
    /// A subscription's buffer was full and a message was dropped.
    SlowConsumer {
        /// Affected subscription.
        sid: Sid,
    },
    /// The server announced it is shutting down.
    LameDuckMode,
    /// A subscription ended on the client.
    Unsubscribed {
        /// Subscription identifier.
        sid: Sid,
        /// Subject of the subscription.
        subject: String,
    },
    /// The connection closed for good.
    Closed {
        /// Error that ended the connection, if any.
        reason: Option<Arc<ClientError>>,
    },
}

/// Traffic counters for the lifetime of a client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Messages received.
    pub in_msgs: u64,
    /// Messages published.
    pub out_msgs: u64,
    /// Payload bytes received.
    pub in_bytes: u64,
    /// Payload bytes published.
    pub out_bytes: u64,
    /// Completed reconnects.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    in_msgs: AtomicU64,
    out_msgs: AtomicU64,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    reconnects: AtomicU64,
}

fn byte_count(len: usize) -> u64 { u64::try_from(len).unwrap_or(u64::MAX) }

impl Counters {
    pub(crate) fn record_in(&self, payload_len: usize) {
        self.in_msgs.fetch_add(1, Ordering::Relaxed);
        self.in_bytes.fetch_add(byte_count(payload_len), Ordering::Relaxed);
    }

    pub(crate) fn record_out(&self, payload_len: usize) {
        self.out_msgs.fetch_add(1, Ordering::Relaxed);
        self.out_bytes.fetch_add(byte_count(payload_len), Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) { self.reconnects.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            in_msgs: self.in_msgs.load(Ordering::Relaxed),
            out_msgs: self.out_msgs.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
