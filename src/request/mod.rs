//! Request/reply over a single shared inbox subscription.
//!
//! Every request gets a token; its reply subject is the client's inbox prefix
//! followed by that token. One `SUB <prefix>*` carries the replies for all
//! requests and the [`RequestMux`] hands each one to the matching
//! [`Replies`] stream.

mod mux;

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
pub(crate) use mux::{RequestMux, RequestSpec};
use tokio::sync::mpsc;

use crate::{
    client::Interest,
    connection::{Command, CommandSender},
    error::{ClientError, RequestError},
    headers::HeaderMap,
    message::Message,
};

/// Timeout applied by [`RequestOptions::default`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for [`Client::request_with`](crate::Client::request_with).
///
/// By default a request waits [`DEFAULT_REQUEST_TIMEOUT`] for a single reply.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use natwire::RequestOptions;
///
/// // Gather up to five replies within half a second.
/// let options = RequestOptions::default()
///     .timeout(Some(Duration::from_millis(500)))
///     .expected_replies(Some(5));
/// let _ = options;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) expected: Option<u64>,
    pub(crate) headers: Option<HeaderMap>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            expected: Some(1),
            headers: None,
        }
    }
}

impl RequestOptions {
    /// Fail with [`RequestError::Timeout`] unless the expected replies arrive
    /// within `timeout`; `None` waits indefinitely.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Complete after `expected` replies. `None` keeps collecting until the
    /// timeout, which then ends the stream without an error.
    #[must_use]
    pub fn expected_replies(mut self, expected: Option<u64>) -> Self {
        self.expected = expected.map(|n| n.max(1));
        self
    }

    /// Publish the request with `headers`.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Replies to one request.
///
/// Yields each reply as it arrives and ends once the expected number was
/// received, the request timed out or it was cancelled. Dropping the stream
/// cancels the request.
#[derive(Debug)]
pub struct Replies {
    token: String,
    receiver: mpsc::UnboundedReceiver<Result<Message, RequestError>>,
    commands: CommandSender,
    finished: bool,
}

impl Replies {
    pub(crate) fn new(
        token: String,
        receiver: mpsc::UnboundedReceiver<Result<Message, RequestError>>,
        commands: CommandSender,
    ) -> Self {
        Self {
            token,
            receiver,
            commands,
            finished: false,
        }
    }

    /// Correlation token of this request.
    #[must_use]
    pub fn token(&self) -> &str { &self.token }

    /// Stop waiting for replies. The stream yields
    /// [`RequestError::Cancelled`] and ends.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the connection is gone.
    pub fn cancel(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Unsubscribe {
                interest: Interest::Request(self.token.clone()),
                max: None,
            })
            .map_err(|_| ClientError::Closed)
    }

    /// Receive the next reply, or `None` once the request completed.
    pub async fn next_reply(&mut self) -> Option<Result<Message, RequestError>> {
        let item = self.receiver.recv().await;
        self.finished |= item.is_none();
        item
    }
}

impl Stream for Replies {
    type Item = Result<Message, RequestError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.receiver.poll_recv(cx);
        if let Poll::Ready(None) = poll {
            self.finished = true;
        }
        poll
    }
}

impl Drop for Replies {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cancel();
        }
    }
}
