//! Shared helpers for integration testing `natwire` clients.

use std::time::Duration;

use natwire::{Client, ClientBuilder, PingConfig, ReconnectConfig};
use rstest::fixture;

use crate::MockServer;

/// Shared result type for integration tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Builder pointed at `server` with fast reconnects and no jitter.
#[must_use]
pub fn builder_for(server: &MockServer) -> ClientBuilder {
    ClientBuilder::new()
        .servers([server.url()])
        .no_randomize()
        .reconnect(
            ReconnectConfig::default()
                .wait(Duration::from_millis(20))
                .jitter(Duration::ZERO),
        )
        .ping(PingConfig::default().interval(Duration::from_secs(60)))
}

/// Start a mock server and connect a default client to it.
///
/// # Errors
///
/// Returns the bind or connect failure.
pub async fn connected_pair() -> TestResult<(MockServer, Client)> {
    let server = MockServer::start().await?;
    let client = builder_for(&server).connect().await?;
    Ok((server, client))
}

/// A started mock server.
///
/// # Panics
///
/// Panics if the listener cannot bind.
#[fixture]
pub async fn running_server() -> MockServer { MockServer::start().await.expect("bind mock server") }
