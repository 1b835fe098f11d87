//! Reconnect, heartbeat and flush policies for [`ClientBuilder`](super::ClientBuilder).

use std::time::Duration;

use rand::Rng;

/// Reconnection policy.
///
/// Defaults: enabled, 10 attempts per server, 2 s wait plus up to 100 ms of
/// jitter, servers that never connected are dropped after one failure.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use natwire::ReconnectConfig;
///
/// let config = ReconnectConfig::default()
///     .max_attempts(Some(3))
///     .wait(Duration::from_millis(250));
/// assert!(config.is_enabled());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub(crate) enabled: bool,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) wait: Duration,
    pub(crate) jitter: Duration,
    pub(crate) wait_on_first_connect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            wait: Duration::from_secs(2),
            jitter: Duration::from_millis(100),
            wait_on_first_connect: false,
        }
    }
}

impl ReconnectConfig {
    /// A policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Enable or disable reconnection.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Consecutive failed attempts after which a server is removed. `None`
    /// retries forever.
    #[must_use]
    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Delay before retrying a server that was already tried.
    #[must_use]
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Upper bound of the random delay added to [`wait`](Self::wait).
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Keep servers that failed before ever connecting in the rotation.
    #[must_use]
    pub fn wait_on_first_connect(mut self, keep: bool) -> Self {
        self.wait_on_first_connect = keep;
        self
    }

    /// Whether reconnection is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool { self.enabled }

    pub(crate) fn delay(&self) -> Duration {
        let jitter = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter == 0 {
            return self.wait;
        }
        self.wait + Duration::from_millis(rand::rng().random_range(0..=jitter))
    }
}

/// Heartbeat policy.
///
/// A `PING` is sent every `interval`; once more than `max_outstanding` go
/// unanswered the connection is considered stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingConfig {
    pub(crate) interval: Duration,
    pub(crate) max_outstanding: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            max_outstanding: 2,
        }
    }
}

impl PingConfig {
    /// Time between heartbeat pings. [`Duration::ZERO`] disables the
    /// heartbeat.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Unanswered pings tolerated before the connection is stale.
    #[must_use]
    pub fn max_outstanding(mut self, max: u32) -> Self {
        self.max_outstanding = max;
        self
    }
}

/// Outbound batching policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushConfig {
    pub(crate) threshold: usize,
}

impl Default for FlushConfig {
    fn default() -> Self { Self { threshold: 65_536 } }
}

impl FlushConfig {
    /// Queued bytes that force an immediate write.
    #[must_use]
    pub fn threshold(mut self, bytes: usize) -> Self {
        self.threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn delay_stays_within_jitter() {
        let config = ReconnectConfig::default()
            .wait(Duration::from_millis(50))
            .jitter(Duration::from_millis(10));
        for _ in 0..100 {
            let delay = config.delay();
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(60));
        }
    }

    #[rstest]
    fn zero_jitter_gives_exact_wait() {
        let config = ReconnectConfig::default().jitter(Duration::ZERO);
        assert_eq!(config.delay(), Duration::from_secs(2));
    }

    #[rstest]
    fn disabled_keeps_other_defaults() {
        let config = ReconnectConfig::disabled();
        assert!(!config.is_enabled());
        assert_eq!(config.max_attempts, Some(10));
    }
}
