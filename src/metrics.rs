//! Metric helpers for `natwire`.
//!
//! Thin wrappers over the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to nothing.

/// Name of the counter tracking messages sent and received.
pub const MESSAGES_TOTAL: &str = "natwire_messages_total";
/// Name of the counter tracking payload bytes sent and received.
pub const BYTES_TOTAL: &str = "natwire_bytes_total";
/// Name of the counter tracking successful reconnects.
pub const RECONNECTS_TOTAL: &str = "natwire_reconnects_total";
/// Name of the counter tracking connection errors.
pub const ERRORS_TOTAL: &str = "natwire_errors_total";

/// Direction of message flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages delivered by the server.
    Inbound,
    /// Messages published by the client.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record one message of `bytes` payload bytes.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_message(direction: Direction, bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
        metrics::counter!(BYTES_TOTAL, "direction" => direction.as_str())
            .increment(u64::try_from(bytes).unwrap_or(u64::MAX));
    }
}

/// Record a completed reconnect.
pub fn inc_reconnects() {
    #[cfg(feature = "metrics")]
    metrics::counter!(RECONNECTS_TOTAL).increment(1);
}

/// Record an error that tore down a connection attempt.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL).increment(1);
}
