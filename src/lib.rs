#![doc(html_root_url = "https://docs.rs/natwire/latest")]
//! Asynchronous client for the NATS publish/subscribe protocol.
//!
//! A [`Client`] owns one connection actor task that parses the wire
//! protocol, routes messages to [`Subscription`] streams, multiplexes
//! requests over a shared inbox and reconnects across a cluster.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = natwire::connect("nats://127.0.0.1:4222").await?;
//! let reply = client.request("service.echo", "ping").await?;
//! println!("{:?}", reply.payload);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod headers;
pub mod message;
pub mod metrics;
pub mod nuid;
pub mod parser;
pub mod proto;
pub mod request;
pub mod server_list;
pub mod subscription;
pub mod tls;
pub mod transport;

pub use auth::{Authenticator, Credentials, TokenAuth, UserPassword};
pub use client::{
    Client,
    ClientBuilder,
    FlushConfig,
    Interest,
    Operation,
    PingConfig,
    ReconnectConfig,
    TracingConfig,
};
pub use connection::{ConnectionState, Event, Statistics, WIRE_TARGET};
pub use error::{ClientError, RequestError};
pub use headers::HeaderMap;
pub use message::Message;
pub use metrics::{BYTES_TOTAL, Direction, ERRORS_TOTAL, MESSAGES_TOTAL, RECONNECTS_TOTAL};
pub use proto::{ServerInfo, Sid};
pub use request::{DEFAULT_REQUEST_TIMEOUT, Replies, RequestOptions};
pub use server_list::ServerAddr;
pub use subscription::{SubscribeOptions, Subscription, Termination};
pub use tls::{TlsConfig, TlsMode};
pub use transport::{Connector, SocketOptions, TcpConnector, Transport};

/// Connect to a single server with default settings.
///
/// # Errors
///
/// Returns [`ClientError::InvalidUrl`] for a malformed URL, or the failure of
/// the connect attempt.
pub async fn connect(url: impl Into<String>) -> Result<Client, ClientError> {
    ClientBuilder::new().servers([url.into()]).connect().await
}
