//! Subscriptions and the registry that routes inbound messages to them.

mod registry;

use std::{
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
pub(crate) use registry::{Registry, Routed, Sink, SubscriptionSpec, UnsubscribeOutcome};
use tokio::sync::mpsc;

use crate::{
    client::Interest,
    connection::{Command, CommandSender},
    error::ClientError,
    message::Message,
    proto::Sid,
};

/// Why a subscription stopped receiving messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Unsubscribed explicitly.
    Unsubscribed,
    /// The configured maximum number of messages was delivered.
    MaxMessages,
    /// The expected number of messages did not arrive in time.
    Timeout,
    /// The client drained its subscriptions.
    Drained,
    /// The connection closed.
    Closed,
}

/// Options for [`Client::subscribe_with`](crate::Client::subscribe_with).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use natwire::SubscribeOptions;
///
/// let options = SubscribeOptions::default()
///     .queue_group("workers")
///     .max_messages(10)
///     .timeout(Duration::from_secs(1), 1);
/// let _ = options;
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub(crate) queue_group: Option<String>,
    pub(crate) max: Option<u64>,
    pub(crate) timeout: Option<(Duration, u64)>,
    pub(crate) capacity: Option<usize>,
}

impl SubscribeOptions {
    /// Join the named queue group.
    #[must_use]
    pub fn queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    /// Unsubscribe automatically once `max` messages have been received.
    #[must_use]
    pub fn max_messages(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }

    /// End the subscription with [`Termination::Timeout`] unless `expected`
    /// messages arrive within `after`.
    #[must_use]
    pub fn timeout(mut self, after: Duration, expected: u64) -> Self {
        self.timeout = Some((after, expected.max(1)));
        self
    }

    /// Override the client's per-subscription buffer size.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }
}

/// Stream of messages for one subscription.
///
/// The stream ends once the subscription terminates; [`termination`]
/// then reports why. Dropping the handle unsubscribes.
///
/// [`termination`]: Subscription::termination
#[derive(Debug)]
pub struct Subscription {
    sid: Sid,
    subject: String,
    receiver: mpsc::Receiver<Message>,
    termination: Arc<OnceLock<Termination>>,
    commands: CommandSender,
}

impl Subscription {
    pub(crate) fn new(
        sid: Sid,
        subject: String,
        receiver: mpsc::Receiver<Message>,
        termination: Arc<OnceLock<Termination>>,
        commands: CommandSender,
    ) -> Self {
        Self {
            sid,
            subject,
            receiver,
            termination,
            commands,
        }
    }

    /// Subscription identifier.
    #[must_use]
    pub fn sid(&self) -> Sid { self.sid }

    /// Subject of interest.
    #[must_use]
    pub fn subject(&self) -> &str { &self.subject }

    /// Why the subscription ended, once it has.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> { self.termination.get().copied() }

    /// Stop receiving messages.
    ///
    /// Messages already buffered remain readable.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the connection is gone.
    pub fn unsubscribe(&self) -> Result<(), ClientError> { self.send_unsubscribe(None) }

    /// Stop after `max` messages in total have been received, counting those
    /// already delivered.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the connection is gone.
    pub fn unsubscribe_after(&self, max: u64) -> Result<(), ClientError> {
        self.send_unsubscribe(Some(max))
    }

    /// Receive the next message, or `None` once the subscription ended.
    pub async fn next_message(&mut self) -> Option<Message> { self.receiver.recv().await }

    fn send_unsubscribe(&self, max: Option<u64>) -> Result<(), ClientError> {
        self.commands
            .send(Command::Unsubscribe {
                interest: Interest::Subscription(self.sid),
                max,
            })
            .map_err(|_| ClientError::Closed)
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.termination.get().is_none() {
            let _ = self.send_unsubscribe(None);
        }
    }
}
