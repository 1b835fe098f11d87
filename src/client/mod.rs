//! Public client surface.
//!
//! [`ClientBuilder`] collects the connection policy and spawns the
//! connection actor; [`Client`] is the cheap handle used to publish,
//! subscribe and issue requests against it.

mod builder;
mod config;
mod runtime;
mod tracing_config;
mod tracing_helpers;

pub use builder::ClientBuilder;
pub use config::{FlushConfig, PingConfig, ReconnectConfig};
pub use runtime::Client;
pub use tracing_config::{Operation, TracingConfig};

use crate::{proto::Sid, request::Replies, subscription::Subscription};

/// Handle accepted by [`Client::unsubscribe`].
///
/// A subscription is unsubscribed on the wire; a request is cancelled
/// locally without touching the shared reply subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interest {
    /// A subscription by sid.
    Subscription(Sid),
    /// A pending request by correlation token.
    Request(String),
}

impl From<Sid> for Interest {
    fn from(sid: Sid) -> Self { Self::Subscription(sid) }
}

impl From<&Subscription> for Interest {
    fn from(subscription: &Subscription) -> Self { Self::Subscription(subscription.sid()) }
}

impl From<&Replies> for Interest {
    fn from(replies: &Replies) -> Self { Self::Request(replies.token().to_owned()) }
}
