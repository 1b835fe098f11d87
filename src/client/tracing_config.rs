//! Span levels and timing for client operations.
//!
//! Every [`Operation`] opens a span at its configured level. Operations with
//! timing enabled also emit an `operation.timing` event carrying
//! `elapsed_us` at `DEBUG` when they finish.

use tracing::Level;

/// Client operations that open a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// The initial connect and handshake.
    Connect,
    /// The publish family.
    Publish,
    /// `subscribe` and `subscribe_with`.
    Subscribe,
    /// `request` and `request_with`.
    Request,
    /// `flush`.
    Flush,
    /// `close` and `drain`.
    Close,
}

impl Operation {
    const ALL: [Self; 6] = [
        Self::Connect,
        Self::Publish,
        Self::Subscribe,
        Self::Request,
        Self::Flush,
        Self::Close,
    ];

    /// Name recorded on the timing event.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Request => "request",
            Self::Flush => "flush",
            Self::Close => "close",
        }
    }

    const fn index(self) -> usize { self as usize }
}

#[derive(Clone, Copy, Debug)]
struct Policy {
    level: Level,
    timed: bool,
}

/// Per-operation span level and timing switch.
///
/// Lifecycle operations default to `INFO`, everything on the hot path to
/// `DEBUG`. Timing starts disabled.
///
/// # Examples
///
/// ```
/// use natwire::{Operation, TracingConfig};
/// use tracing::Level;
///
/// let config = TracingConfig::default()
///     .timing(Operation::Request, true)
///     .level(Operation::Publish, Level::TRACE);
/// assert!(config.is_timed(Operation::Request));
/// assert_eq!(config.level_of(Operation::Publish), Level::TRACE);
/// ```
#[derive(Clone, Debug)]
pub struct TracingConfig {
    policies: [Policy; 6],
}

impl Default for TracingConfig {
    fn default() -> Self {
        let policies = Operation::ALL.map(|op| Policy {
            level: match op {
                Operation::Connect | Operation::Close => Level::INFO,
                _ => Level::DEBUG,
            },
            timed: false,
        });
        Self { policies }
    }
}

impl TracingConfig {
    /// Open spans for `op` at `level`.
    #[must_use]
    pub fn level(mut self, op: Operation, level: Level) -> Self {
        self.policies[op.index()].level = level;
        self
    }

    /// Switch the timing event for `op`.
    #[must_use]
    pub fn timing(mut self, op: Operation, enabled: bool) -> Self {
        self.policies[op.index()].timed = enabled;
        self
    }

    /// Use `level` for every operation.
    #[must_use]
    pub fn all_levels(mut self, level: Level) -> Self {
        for policy in &mut self.policies {
            policy.level = level;
        }
        self
    }

    /// Switch timing for every operation.
    #[must_use]
    pub fn all_timing(mut self, enabled: bool) -> Self {
        for policy in &mut self.policies {
            policy.timed = enabled;
        }
        self
    }

    /// Span level for `op`.
    #[must_use]
    pub fn level_of(&self, op: Operation) -> Level { self.policies[op.index()].level }

    /// Whether `op` emits a timing event.
    #[must_use]
    pub fn is_timed(&self, op: Operation) -> bool { self.policies[op.index()].timed }
}
