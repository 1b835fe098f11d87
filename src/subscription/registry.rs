//! Subscription registry and inbound dispatch.
//!
//! The registry is owned by the connection actor. It records interest by
//! sid, counts deliveries against the auto-unsubscribe threshold and owns
//! the per-subscription timers.

use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::time::{DelayQueue, delay_queue::Key};

use super::Termination;
use crate::{
    message::Message,
    proto::{ClientOp, MsgFrame, Sid},
};

/// Where deliveries for a sid go.
#[derive(Debug)]
pub(crate) enum Sink {
    /// A caller-owned [`Subscription`](super::Subscription).
    Channel {
        sender: mpsc::Sender<Message>,
        termination: Arc<OnceLock<Termination>>,
    },
    /// The shared request inbox.
    Mux,
}

/// Everything needed to register a subscription.
#[derive(Debug)]
pub(crate) struct SubscriptionSpec {
    pub(crate) subject: String,
    pub(crate) queue_group: Option<String>,
    pub(crate) max: Option<u64>,
    pub(crate) timeout: Option<(Duration, u64)>,
    pub(crate) sink: Sink,
}

#[derive(Debug)]
struct Entry {
    subject: String,
    queue_group: Option<String>,
    max: Option<u64>,
    received: u64,
    sink: Sink,
    timer: Option<(Key, u64)>,
}

impl Entry {
    fn finish(self, termination: Termination) {
        if let Sink::Channel {
            termination: slot, ..
        } = &self.sink
        {
            let _ = slot.set(termination);
        }
    }
}

/// Result of routing one inbound message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// No subscription has this sid.
    Unknown,
    /// Handed to the subscriber.
    Delivered,
    /// The subscriber's buffer was full; the message was dropped.
    SlowConsumer,
    /// Delivered as the last message before `max`; the subscription is gone.
    Completed { subject: String },
    /// Arrived past `max`; the subscription is gone and the server still
    /// needs an `UNSUB`.
    Overflow,
    /// The subscriber dropped its handle; the server still needs an `UNSUB`.
    Abandoned,
    /// Destined for the shared request inbox.
    Mux(Message),
}

/// Result of an unsubscribe request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UnsubscribeOutcome {
    /// No subscription has this sid.
    Unknown,
    /// Interest was removed.
    Removed { subject: String },
    /// A new cap was recorded; deliveries continue until it is reached.
    Capped,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: BTreeMap<Sid, Entry>,
    timers: DelayQueue<Sid>,
}

impl Registry {
    pub(crate) fn new() -> Self { Self::default() }

    /// Record interest and return the frames announcing it to the server.
    pub(crate) fn insert(&mut self, sid: Sid, spec: SubscriptionSpec) -> Vec<ClientOp> {
        let timer = spec
            .timeout
            .map(|(after, expected)| (self.timers.insert(sid, after), expected));
        let mut ops = vec![ClientOp::Sub {
            subject: spec.subject.clone(),
            queue_group: spec.queue_group.clone(),
            sid,
        }];
        if let Some(max) = spec.max {
            ops.push(ClientOp::Unsub {
                sid,
                max: Some(max),
            });
        }
        self.entries.insert(
            sid,
            Entry {
                subject: spec.subject,
                queue_group: spec.queue_group,
                max: spec.max,
                received: 0,
                sink: spec.sink,
                timer,
            },
        );
        ops
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, sid: Sid) -> bool { self.entries.contains_key(&sid) }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.entries.len() }

    /// Sids of caller-owned subscriptions.
    pub(crate) fn subscriber_sids(&self) -> Vec<Sid> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.sink, Sink::Channel { .. }))
            .map(|(sid, _)| *sid)
            .collect()
    }

    /// Route an inbound message by sid.
    pub(crate) fn route(&mut self, frame: MsgFrame) -> Routed {
        let sid = frame.sid;
        let Some(entry) = self.entries.get_mut(&sid) else {
            return Routed::Unknown;
        };
        entry.received += 1;
        let received = entry.received;

        if let Some((key, expected)) = entry.timer {
            if received >= expected {
                self.timers.try_remove(&key);
                entry.timer = None;
            }
        }

        let at_max = match entry.max {
            Some(max) if received > max => {
                self.remove(sid, Termination::MaxMessages);
                return Routed::Overflow;
            }
            Some(max) => received == max,
            None => false,
        };

        let outcome = match &entry.sink {
            Sink::Mux => return Routed::Mux(Message::from(frame)),
            Sink::Channel { sender, .. } => sender.try_send(Message::from(frame)),
        };
        match outcome {
            Err(TrySendError::Closed(_)) => {
                self.remove(sid, Termination::Unsubscribed);
                Routed::Abandoned
            }
            _ if at_max => match self.remove(sid, Termination::MaxMessages) {
                Some(entry) => Routed::Completed {
                    subject: entry.subject,
                },
                None => Routed::Delivered,
            },
            Ok(()) => Routed::Delivered,
            Err(TrySendError::Full(_)) => Routed::SlowConsumer,
        }
    }

    /// Apply an unsubscribe with an optional absolute cap.
    ///
    /// A cap replaces any earlier one and is compared with the total number
    /// of messages received so far.
    pub(crate) fn unsubscribe(&mut self, sid: Sid, max: Option<u64>) -> UnsubscribeOutcome {
        let Some(entry) = self.entries.get_mut(&sid) else {
            return UnsubscribeOutcome::Unknown;
        };
        entry.max = max;
        match max {
            Some(max) if entry.received < max => UnsubscribeOutcome::Capped,
            _ => match self.remove(sid, Termination::Unsubscribed) {
                Some(entry) => UnsubscribeOutcome::Removed {
                    subject: entry.subject,
                },
                None => UnsubscribeOutcome::Unknown,
            },
        }
    }

    /// Drop interest, recording why on the subscriber's handle.
    pub(crate) fn remove(&mut self, sid: Sid, termination: Termination) -> Option<RemovedEntry> {
        let mut entry = self.entries.remove(&sid)?;
        if let Some((key, _)) = entry.timer.take() {
            self.timers.try_remove(&key);
        }
        let subject = std::mem::take(&mut entry.subject);
        entry.finish(termination);
        Some(RemovedEntry { subject })
    }

    /// Terminate every subscription.
    pub(crate) fn clear(&mut self, termination: Termination) {
        for (_, entry) in std::mem::take(&mut self.entries) {
            entry.finish(termination);
        }
        self.timers.clear();
    }

    /// Frames recreating server-side interest after a reconnect.
    ///
    /// Subscriptions with a cap are followed by an `UNSUB` for the messages
    /// they may still receive.
    pub(crate) fn replay(&self) -> Vec<ClientOp> {
        let mut ops = Vec::with_capacity(self.entries.len());
        for (sid, entry) in &self.entries {
            ops.push(ClientOp::Sub {
                subject: entry.subject.clone(),
                queue_group: entry.queue_group.clone(),
                sid: *sid,
            });
            if let Some(max) = entry.max {
                ops.push(ClientOp::Unsub {
                    sid: *sid,
                    max: Some(max.saturating_sub(entry.received)),
                });
            }
        }
        ops
    }

    pub(crate) fn has_timers(&self) -> bool { !self.timers.is_empty() }

    /// Wait for the next subscription timeout.
    pub(crate) async fn next_timeout(&mut self) -> Option<Sid> {
        self.timers.next().await.map(|expired| expired.into_inner())
    }

    /// Handle an expired timer: the subscription ends with
    /// [`Termination::Timeout`].
    pub(crate) fn expire(&mut self, sid: Sid) -> Option<RemovedEntry> {
        let entry = self.entries.get_mut(&sid)?;
        entry.timer = None;
        self.remove(sid, Termination::Timeout)
    }
}

/// Details of a subscription that was just removed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RemovedEntry {
    pub(crate) subject: String,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::{fixture, rstest};

    use super::*;

    struct Handle {
        receiver: mpsc::Receiver<Message>,
        termination: Arc<OnceLock<Termination>>,
    }

    #[fixture]
    fn registry() -> Registry { Registry::new() }

    fn subscribe(
        registry: &mut Registry,
        sid: Sid,
        max: Option<u64>,
        capacity: usize,
    ) -> (Vec<ClientOp>, Handle) {
        let (sender, receiver) = mpsc::channel(capacity);
        let termination = Arc::new(OnceLock::new());
        let ops = registry.insert(
            sid,
            SubscriptionSpec {
                subject: "foo".into(),
                queue_group: None,
                max,
                timeout: None,
                sink: Sink::Channel {
                    sender,
                    termination: Arc::clone(&termination),
                },
            },
        );
        (
            ops,
            Handle {
                receiver,
                termination,
            },
        )
    }

    fn msg(sid: Sid) -> MsgFrame {
        MsgFrame {
            subject: "foo".into(),
            sid,
            reply: None,
            headers: None,
            payload: Bytes::from_static(b"bar"),
        }
    }

    #[rstest]
    fn subscribe_with_max_announces_unsub(mut registry: Registry) {
        let (ops, _handle) = subscribe(&mut registry, 1, Some(3), 8);
        assert_eq!(
            ops,
            vec![
                ClientOp::Sub {
                    subject: "foo".into(),
                    queue_group: None,
                    sid: 1
                },
                ClientOp::Unsub { sid: 1, max: Some(3) },
            ]
        );
    }

    #[rstest]
    fn unknown_sid_is_dropped(mut registry: Registry) {
        assert_eq!(registry.route(msg(9)), Routed::Unknown);
    }

    #[rstest]
    #[case(1, 2)]
    #[case(3, 5)]
    #[case(4, 4)]
    fn auto_unsubscribe_delivers_exactly_max(
        mut registry: Registry,
        #[case] max: u64,
        #[case] published: u64,
    ) {
        let (_, mut handle) = subscribe(&mut registry, 1, Some(max), 16);
        let outcomes: Vec<Routed> = (0..published).map(|_| registry.route(msg(1))).collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, Routed::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        let mut delivered = 0;
        while handle.receiver.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, max);
        assert_eq!(handle.termination.get(), Some(&Termination::MaxMessages));
        assert!(!registry.contains(1));
    }

    #[rstest]
    fn unsubscribe_override_uses_last_value(mut registry: Registry) {
        let (_, mut handle) = subscribe(&mut registry, 1, None, 16);
        registry.route(msg(1));
        registry.route(msg(1));
        assert_eq!(registry.unsubscribe(1, Some(10)), UnsubscribeOutcome::Capped);
        assert_eq!(registry.unsubscribe(1, Some(4)), UnsubscribeOutcome::Capped);
        for _ in 0..6 {
            registry.route(msg(1));
        }
        let mut delivered = 0;
        while handle.receiver.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 4);
    }

    #[rstest]
    fn cap_below_received_removes_immediately(mut registry: Registry) {
        let (_, handle) = subscribe(&mut registry, 1, None, 16);
        registry.route(msg(1));
        registry.route(msg(1));
        assert_eq!(
            registry.unsubscribe(1, Some(1)),
            UnsubscribeOutcome::Removed {
                subject: "foo".into()
            }
        );
        assert_eq!(handle.termination.get(), Some(&Termination::Unsubscribed));
    }

    #[rstest]
    fn full_buffer_reports_slow_consumer(mut registry: Registry) {
        let (_, _handle) = subscribe(&mut registry, 1, None, 1);
        assert_eq!(registry.route(msg(1)), Routed::Delivered);
        assert_eq!(registry.route(msg(1)), Routed::SlowConsumer);
        assert!(registry.contains(1));
    }

    #[rstest]
    fn dropped_receiver_abandons_subscription(mut registry: Registry) {
        let (_, handle) = subscribe(&mut registry, 1, None, 4);
        drop(handle);
        assert_eq!(registry.route(msg(1)), Routed::Abandoned);
        assert!(!registry.contains(1));
    }

    #[rstest]
    fn replay_sends_remaining_cap(mut registry: Registry) {
        let (_, _a) = subscribe(&mut registry, 1, Some(5), 16);
        let (_, _b) = subscribe(&mut registry, 2, None, 16);
        registry.route(msg(1));
        registry.route(msg(1));
        let replay = registry.replay();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[1], ClientOp::Unsub { sid: 1, max: Some(3) });
        assert!(matches!(replay[2], ClientOp::Sub { sid: 2, .. }));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn timeout_fires_when_expected_messages_missing(mut registry: Registry) {
        let (sender, _receiver) = mpsc::channel(4);
        let termination = Arc::new(OnceLock::new());
        registry.insert(
            7,
            SubscriptionSpec {
                subject: "slow".into(),
                queue_group: None,
                max: None,
                timeout: Some((Duration::from_millis(50), 2)),
                sink: Sink::Channel {
                    sender,
                    termination: Arc::clone(&termination),
                },
            },
        );
        registry.route(msg(7));
        assert!(registry.has_timers());
        let sid = registry.next_timeout().await.expect("timer fires");
        assert_eq!(sid, 7);
        assert!(registry.expire(sid).is_some());
        assert_eq!(termination.get(), Some(&Termination::Timeout));
    }

    #[rstest]
    #[tokio::test]
    async fn enough_messages_cancel_the_timeout(mut registry: Registry) {
        let (sender, _receiver) = mpsc::channel(4);
        registry.insert(
            3,
            SubscriptionSpec {
                subject: "fast".into(),
                queue_group: None,
                max: None,
                timeout: Some((Duration::from_secs(5), 1)),
                sink: Sink::Channel {
                    sender,
                    termination: Arc::new(OnceLock::new()),
                },
            },
        );
        registry.route(msg(3));
        assert!(!registry.has_timers());
    }

    #[rstest]
    fn clear_closes_every_subscription(mut registry: Registry) {
        let (_, a) = subscribe(&mut registry, 1, None, 4);
        let (_, b) = subscribe(&mut registry, 2, None, 4);
        registry.clear(Termination::Closed);
        assert_eq!(registry.len(), 0);
        assert_eq!(a.termination.get(), Some(&Termination::Closed));
        assert_eq!(b.termination.get(), Some(&Termination::Closed));
    }
}
