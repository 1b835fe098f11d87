//! The [`Client`] handle.

use std::sync::{
    Arc,
    OnceLock,
    atomic::AtomicU64,
};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::DropGuard;
use tracing::Instrument;

use super::{
    Interest,
    tracing_config::{Operation, TracingConfig},
    tracing_helpers::{
        close_span,
        emit_timing_event,
        flush_span,
        publish_span,
        request_span,
        start_timer,
        subscribe_span,
    },
};
use crate::{
    connection::{
        Command,
        CommandSender,
        ConnectionState,
        Counters,
        Event,
        Statistics,
        allocate_sid,
    },
    error::{ClientError, RequestError},
    headers::HeaderMap,
    message::Message,
    nuid::TokenSource,
    proto::{ServerInfo, validate_queue_group, validate_subject},
    request::{RequestOptions, RequestSpec, Replies},
    subscription::{SubscribeOptions, Subscription},
};

pub(super) struct Inner {
    pub(super) commands: CommandSender,
    pub(super) state: watch::Receiver<ConnectionState>,
    pub(super) info: watch::Receiver<Option<Arc<ServerInfo>>>,
    pub(super) events: broadcast::Sender<Event>,
    pub(super) stats: Arc<Counters>,
    pub(super) sids: Arc<AtomicU64>,
    pub(super) tokens: Arc<dyn TokenSource>,
    pub(super) inbox_prefix: String,
    pub(super) subscription_capacity: usize,
    pub(super) headers: bool,
    pub(super) tracing: TracingConfig,
    pub(super) _shutdown: DropGuard,
}

/// Handle to a connection.
///
/// Cloning is cheap; every clone drives the same connection. The connection
/// shuts down once the last clone is dropped.
///
/// # Examples
///
/// ```no_run
/// use natwire::ClientBuilder;
///
/// # async fn demo() -> Result<(), natwire::ClientError> {
/// let client = ClientBuilder::new()
///     .servers(["nats://127.0.0.1:4222"])
///     .connect()
///     .await?;
/// let mut subscription = client.subscribe("greetings")?;
/// client.publish("greetings", "hello")?;
/// client.flush().await?;
/// let message = subscription.next_message().await;
/// assert_eq!(message.map(|m| m.payload), Some("hello".into()));
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Publish `payload` on `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSubject`] for a malformed subject,
    /// [`ClientError::MaxPayloadExceeded`] when the server would reject the
    /// size, and [`ClientError::Closed`] once the connection is gone.
    pub fn publish(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        self.publish_message(subject.into(), None, None, payload.into())
    }

    /// Publish `payload` on `subject`, asking responders to answer on
    /// `reply`.
    ///
    /// # Errors
    ///
    /// As for [`publish`](Self::publish); the reply subject is validated too.
    pub fn publish_with_reply(
        &self,
        subject: impl Into<String>,
        reply: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        self.publish_message(subject.into(), Some(reply.into()), None, payload.into())
    }

    /// Publish with a header block.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HeadersNotSupported`] when headers are disabled
    /// or the server does not advertise them, otherwise as for
    /// [`publish`](Self::publish).
    pub fn publish_with_headers(
        &self,
        subject: impl Into<String>,
        reply: Option<String>,
        headers: HeaderMap,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        self.publish_message(subject.into(), reply, Some(headers), payload.into())
    }

    /// Publish `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Json`] when `value` cannot be serialized,
    /// otherwise as for [`publish`](Self::publish).
    pub fn publish_json<T: Serialize + ?Sized>(
        &self,
        subject: impl Into<String>,
        value: &T,
    ) -> Result<(), ClientError> {
        let payload = serde_json::to_vec(value)?;
        self.publish_message(subject.into(), None, None, payload.into())
    }

    fn publish_message(
        &self,
        subject: String,
        reply: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
    ) -> Result<(), ClientError> {
        let span = publish_span(&self.inner.tracing, &subject, payload.len());
        let _entered = span.enter();
        let timer = start_timer(&self.inner.tracing, Operation::Publish);
        validate_subject(&subject)?;
        if let Some(reply) = &reply {
            validate_subject(reply)?;
        }
        self.check_payload(headers.as_ref(), payload.len())?;
        self.ensure_open()?;
        self.send(Command::Publish {
            subject,
            reply,
            headers,
            payload,
        })?;
        emit_timing_event(timer);
        Ok(())
    }

    /// Subscribe to `subject`, which may contain `*` and `>` wildcards.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSubject`] for a malformed subject,
    /// [`ClientError::Draining`] while draining and [`ClientError::Closed`]
    /// once the connection is gone.
    pub fn subscribe(&self, subject: impl Into<String>) -> Result<Subscription, ClientError> {
        self.subscribe_with(subject, SubscribeOptions::default())
    }

    /// Subscribe with a queue group, message cap, timeout or buffer size.
    ///
    /// # Errors
    ///
    /// As for [`subscribe`](Self::subscribe), plus
    /// [`ClientError::InvalidQueueGroup`] for a malformed queue group.
    pub fn subscribe_with(
        &self,
        subject: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<Subscription, ClientError> {
        let subject = subject.into();
        let span = subscribe_span(&self.inner.tracing, &subject);
        let _entered = span.enter();
        let timer = start_timer(&self.inner.tracing, Operation::Subscribe);
        validate_subject(&subject)?;
        if let Some(group) = &options.queue_group {
            validate_queue_group(group)?;
        }
        self.ensure_accepting()?;

        let sid = allocate_sid(&self.inner.sids);
        span.record("sid", sid);
        let capacity = options
            .capacity
            .unwrap_or(self.inner.subscription_capacity)
            .max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let termination = Arc::new(OnceLock::new());
        self.send(Command::Subscribe {
            sid,
            subject: subject.clone(),
            queue_group: options.queue_group,
            max: options.max,
            timeout: options.timeout,
            sender,
            termination: Arc::clone(&termination),
        })?;
        emit_timing_event(timer);
        Ok(Subscription::new(
            sid,
            subject,
            receiver,
            termination,
            self.inner.commands.clone(),
        ))
    }

    /// Unsubscribe a subscription or cancel a request.
    ///
    /// `max` sets an absolute cap on the messages a subscription delivers,
    /// replacing any earlier cap; a subscription that already received that
    /// many ends at once. `max` is ignored for requests.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the connection is gone.
    pub fn unsubscribe(
        &self,
        interest: impl Into<Interest>,
        max: Option<u64>,
    ) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe {
            interest: interest.into(),
            max,
        })
    }

    /// Send a request and wait for the first reply.
    ///
    /// Uses the default [`RequestOptions`]: one reply within 10 seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Timeout`] when nobody answers in time,
    /// [`RequestError::NoResponders`] when the server reports that nobody is
    /// subscribed, and [`RequestError::Rejected`] when the request could not
    /// be sent.
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Message, RequestError> {
        let subject = subject.into();
        let span = request_span(&self.inner.tracing, &subject);
        let timer = start_timer(&self.inner.tracing, Operation::Request);
        let result = async {
            let mut replies = self.start_request(subject, payload.into(), RequestOptions::default())?;
            tracing::Span::current().record("token", replies.token());
            replies.next_reply().await.unwrap_or(Err(RequestError::Closed))
        }
        .instrument(span.clone())
        .await;
        span.record("result", if result.is_ok() { "ok" } else { "err" });
        emit_timing_event(timer);
        result
    }

    /// Send a request and stream its replies.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSubject`] for a malformed subject,
    /// [`ClientError::Draining`] while draining and [`ClientError::Closed`]
    /// once the connection is gone.
    pub fn request_with(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        options: RequestOptions,
    ) -> Result<Replies, ClientError> {
        let subject = subject.into();
        let span = request_span(&self.inner.tracing, &subject);
        let _entered = span.enter();
        let replies = self.start_request(subject, payload.into(), options)?;
        span.record("token", replies.token());
        Ok(replies)
    }

    fn start_request(
        &self,
        subject: String,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<Replies, ClientError> {
        validate_subject(&subject)?;
        self.check_payload(options.headers.as_ref(), payload.len())?;
        self.ensure_accepting()?;
        let token = self.inner.tokens.next_token();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.send(Command::Request {
            subject,
            headers: options.headers,
            payload,
            spec: RequestSpec {
                token: token.clone(),
                sender,
                expected: options.expected,
                timeout: options.timeout,
            },
        })?;
        Ok(Replies::new(token, receiver, self.inner.commands.clone()))
    }

    /// Wait until the server has processed everything sent so far.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the connection closes first.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let span = flush_span(&self.inner.tracing);
        let timer = start_timer(&self.inner.tracing, Operation::Flush);
        let (done, flushed) = oneshot::channel();
        self.send(Command::Flush(done))?;
        let result = flushed
            .instrument(span)
            .await
            .unwrap_or(Err(ClientError::Closed));
        emit_timing_event(timer);
        result
    }

    /// Unsubscribe everything, wait for the server to acknowledge, let the
    /// buffered messages be consumed and close.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Draining`] when a drain is already running and
    /// [`ClientError::Closed`] if the connection is gone.
    pub async fn drain(&self) -> Result<(), ClientError> {
        let span = close_span(&self.inner.tracing, "drain");
        let timer = start_timer(&self.inner.tracing, Operation::Close);
        let (done, drained) = oneshot::channel();
        self.send(Command::Drain(done))?;
        let result = drained
            .instrument(span)
            .await
            .unwrap_or(Err(ClientError::Closed));
        emit_timing_event(timer);
        result
    }

    /// Write what is queued and close the connection. Subscriptions end
    /// and pending requests fail with [`RequestError::Closed`].
    ///
    /// # Errors
    ///
    /// Currently infallible; closing a closed client succeeds.
    pub async fn close(&self) -> Result<(), ClientError> {
        let span = close_span(&self.inner.tracing, "close");
        let timer = start_timer(&self.inner.tracing, Operation::Close);
        let (reply, closed) = oneshot::channel();
        if self.send(Command::Close(reply)).is_ok() {
            let _ = closed.instrument(span).await;
        }
        emit_timing_event(timer);
        Ok(())
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        let _ = state.wait_for(|state| state.is_closed()).await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.inner.state.borrow() }

    /// Subscribe to connection events from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> { self.inner.events.subscribe() }

    /// The most recent `INFO` received from the server.
    #[must_use]
    pub fn server_info(&self) -> Option<Arc<ServerInfo>> { self.inner.info.borrow().clone() }

    /// Traffic counters.
    #[must_use]
    pub fn statistics(&self) -> Statistics { self.inner.stats.snapshot() }

    /// A fresh unique inbox subject.
    #[must_use]
    pub fn new_inbox(&self) -> String {
        format!("{}.{}", self.inner.inbox_prefix, self.inner.tokens.next_token())
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| ClientError::Closed)
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.state().is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// New subscriptions and requests are refused while draining.
    fn ensure_accepting(&self) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Closed => Err(ClientError::Closed),
            ConnectionState::Draining => Err(ClientError::Draining),
            _ => Ok(()),
        }
    }

    fn check_payload(&self, headers: Option<&HeaderMap>, payload_len: usize) -> Result<(), ClientError> {
        let info = self.inner.info.borrow();
        let header_len = match headers {
            Some(headers) => {
                let supported = self.inner.headers && info.as_ref().is_some_and(|info| info.headers);
                if !supported {
                    return Err(ClientError::HeadersNotSupported);
                }
                headers.to_bytes().len()
            }
            None => 0,
        };
        let size = header_len + payload_len;
        match info.as_ref().map(|info| info.max_payload) {
            Some(max) if max > 0 && size > max => Err(ClientError::MaxPayloadExceeded { size, max }),
            _ => Ok(()),
        }
    }
}
