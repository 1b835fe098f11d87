//! Test support for the `natwire` client.
//!
//! [`MockServer`] runs a scripted NATS server on a localhost port so tests
//! can exercise real sockets, reconnects and server-injected frames.
//!
//! ```rust,no_run
//! use natwire_testing::{MockServer, TestResult, builder_for};
//!
//! # async fn example() -> TestResult {
//! let server = MockServer::start().await?;
//! let client = builder_for(&server).connect().await?;
//! client.publish("greet", "hi")?;
//! client.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod integration_helpers;
pub mod logging;
pub mod macros;
pub mod mock_server;

pub use integration_helpers::{TestResult, builder_for, connected_pair, running_server};
pub use logging::{LoggerHandle, logger};
pub use mock_server::{MockServer, default_info, subject_matches};
