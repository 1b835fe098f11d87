//! Demultiplexer for replies arriving on the shared inbox.

use std::{collections::HashMap, time::Duration};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::time::{DelayQueue, delay_queue::Key};

use crate::{error::RequestError, message::Message, proto::Sid};

type ReplySender = mpsc::UnboundedSender<Result<Message, RequestError>>;

/// A request waiting for replies.
#[derive(Debug)]
pub(crate) struct RequestSpec {
    pub(crate) token: String,
    pub(crate) sender: ReplySender,
    pub(crate) expected: Option<u64>,
    pub(crate) timeout: Option<Duration>,
}

#[derive(Debug)]
struct Pending {
    sender: ReplySender,
    expected: Option<u64>,
    received: u64,
    timer: Option<Key>,
}

#[derive(Debug)]
pub(crate) struct RequestMux {
    prefix: String,
    sid: Option<Sid>,
    pending: HashMap<String, Pending>,
    timers: DelayQueue<String>,
}

impl RequestMux {
    /// Create a multiplexer for subjects starting with `prefix`, which must
    /// end with `.`.
    pub(crate) fn new(prefix: String) -> Self {
        Self {
            prefix,
            sid: None,
            pending: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    pub(crate) fn reply_subject(&self, token: &str) -> String { format!("{}{token}", self.prefix) }

    /// Wildcard subject of the shared subscription.
    pub(crate) fn subject(&self) -> String { format!("{}*", self.prefix) }

    /// Sid of the shared subscription, once created.
    pub(crate) fn sid(&self) -> Option<Sid> { self.sid }

    pub(crate) fn set_sid(&mut self, sid: Option<Sid>) { self.sid = sid; }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.pending.len() }

    pub(crate) fn register(&mut self, spec: RequestSpec) {
        let timer = spec
            .timeout
            .map(|after| self.timers.insert(spec.token.clone(), after));
        self.pending.insert(
            spec.token,
            Pending {
                sender: spec.sender,
                expected: spec.expected,
                received: 0,
                timer,
            },
        );
    }

    /// Hand a reply to its request. Replies for unknown tokens, including
    /// those arriving after a timeout, are ignored.
    pub(crate) fn dispatch(&mut self, message: Message) -> bool {
        let Some(token) = message.subject.strip_prefix(&self.prefix) else {
            return false;
        };
        let Some(pending) = self.pending.get_mut(token) else {
            return false;
        };
        let token = token.to_owned();
        if message.is_no_responders() {
            let _ = pending.sender.send(Err(RequestError::NoResponders));
            self.finish(&token);
            return true;
        }
        pending.received += 1;
        let done = pending.expected.is_some_and(|n| pending.received >= n);
        if pending.sender.send(Ok(message)).is_err() || done {
            self.finish(&token);
        }
        true
    }

    /// Cancel a request; the caller sees [`RequestError::Cancelled`].
    pub(crate) fn cancel(&mut self, token: &str) -> bool {
        match self.pending.get(token) {
            Some(pending) => {
                let _ = pending.sender.send(Err(RequestError::Cancelled));
                self.finish(token);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_timers(&self) -> bool { !self.timers.is_empty() }

    /// Wait for the next request timeout.
    pub(crate) async fn next_timeout(&mut self) -> Option<String> {
        self.timers.next().await.map(|expired| expired.into_inner())
    }

    /// Handle an expired timer. Requests still short of their expected
    /// replies fail with [`RequestError::Timeout`]; open-ended ones just end.
    pub(crate) fn expire(&mut self, token: &str) {
        if let Some(mut pending) = self.pending.remove(token) {
            pending.timer = None;
            if pending.expected.is_some() {
                let _ = pending.sender.send(Err(RequestError::Timeout));
            }
        }
    }

    /// Fail every request with `error`.
    pub(crate) fn fail_all(&mut self, error: &RequestError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.sender.send(Err(error.clone()));
        }
        self.timers.clear();
    }

    fn finish(&mut self, token: &str) {
        if let Some(Pending {
            timer: Some(key), ..
        }) = self.pending.remove(token)
        {
            self.timers.try_remove(&key);
        }
    }
}
