//! Span and timing helpers for client operations.
//!
//! Span creation with a dynamically selected level lives here so the client
//! methods only open a span and record the outcome.

use std::time::Instant;

use tracing::{Level, Span};

use super::tracing_config::{Operation, TracingConfig};

/// Create a tracing span at a dynamically selected level.
///
/// Each arm calls the matching `tracing::<level>_span!` macro so the span
/// metadata stays static per arm.
macro_rules! dynamic_span {
    ($level:expr, $name:expr $(, $($field:tt)*)?) => {
        match $level {
            Level::ERROR => tracing::error_span!($name $(, $($field)*)?),
            Level::WARN  => tracing::warn_span!($name $(, $($field)*)?),
            Level::INFO  => tracing::info_span!($name $(, $($field)*)?),
            Level::DEBUG => tracing::debug_span!($name $(, $($field)*)?),
            Level::TRACE => tracing::trace_span!($name $(, $($field)*)?),
        }
    };
}

#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn connect_span(config: &TracingConfig, servers: usize) -> Span {
    dynamic_span!(
        config.level_of(Operation::Connect),
        "client.connect",
        servers = servers,
        result = tracing::field::Empty
    )
}

#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn publish_span(config: &TracingConfig, subject: &str, payload_bytes: usize) -> Span {
    dynamic_span!(
        config.level_of(Operation::Publish),
        "client.publish",
        subject = subject,
        payload.bytes = payload_bytes
    )
}

/// The `sid` field is recorded once the subscription is registered.
#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn subscribe_span(config: &TracingConfig, subject: &str) -> Span {
    dynamic_span!(
        config.level_of(Operation::Subscribe),
        "client.subscribe",
        subject = subject,
        sid = tracing::field::Empty
    )
}

/// The `token` and `result` fields are recorded as the request progresses.
#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn request_span(config: &TracingConfig, subject: &str) -> Span {
    dynamic_span!(
        config.level_of(Operation::Request),
        "client.request",
        subject = subject,
        token = tracing::field::Empty,
        result = tracing::field::Empty
    )
}

#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn flush_span(config: &TracingConfig) -> Span {
    dynamic_span!(config.level_of(Operation::Flush), "client.flush")
}

#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn close_span(config: &TracingConfig, operation: &'static str) -> Span {
    dynamic_span!(config.level_of(Operation::Close), "client.close", operation = operation)
}

/// Running timer for an operation with timing enabled.
pub(crate) struct OpTimer {
    op: Operation,
    started: Instant,
}

pub(crate) fn start_timer(config: &TracingConfig, op: Operation) -> Option<OpTimer> {
    config.is_timed(op).then(|| OpTimer {
        op,
        started: Instant::now(),
    })
}

/// Record elapsed time if timing was enabled for this operation.
pub(crate) fn emit_timing_event(timer: Option<OpTimer>) {
    if let Some(OpTimer { op, started }) = timer {
        let elapsed_us = started.elapsed().as_micros();
        tracing::debug!(operation = op.name(), elapsed_us, "operation.timing");
    }
}
