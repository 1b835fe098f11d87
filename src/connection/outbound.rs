//! Pending output and the `PONG` waiter queue.
//!
//! Frames are encoded when queued and written in batches. A `PING` carries
//! the waiter that its `PONG` completes; once written, the waiter moves to
//! the in-flight queue, which the server answers strictly in order.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::{command::Completion, wire};
use crate::{error::ClientError, proto::ClientOp};

/// Completion attached to a `PING`.
#[derive(Debug)]
pub(crate) enum PongWaiter {
    Flush(Completion),
    Drain(Completion),
    Heartbeat,
}

impl PongWaiter {
    fn survives_reconnect(&self) -> bool { !matches!(self, Self::Heartbeat) }

    fn fail(self) {
        match self {
            Self::Flush(done) | Self::Drain(done) => {
                let _ = done.send(Err(ClientError::Closed));
            }
            Self::Heartbeat => {}
        }
    }
}

#[derive(Debug)]
enum Frame {
    Pub(Bytes),
    Control(Bytes),
    Ping(PongWaiter),
}

const PING: &[u8] = b"PING\r\n";

impl Frame {
    fn len(&self) -> usize {
        match self {
            Self::Pub(bytes) | Self::Control(bytes) => bytes.len(),
            Self::Ping(_) => PING.len(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Outbound {
    frames: VecDeque<Frame>,
    bytes: usize,
    threshold: usize,
    in_flight: VecDeque<PongWaiter>,
    debug: bool,
}

impl Outbound {
    pub(crate) fn new(threshold: usize, debug: bool) -> Self {
        Self {
            frames: VecDeque::new(),
            bytes: 0,
            threshold: threshold.max(1),
            in_flight: VecDeque::new(),
            debug,
        }
    }

    /// Queue `op`. A `PING` queued this way expects no completion.
    pub(crate) fn push(&mut self, op: &ClientOp) -> Result<(), serde_json::Error> {
        if matches!(op, ClientOp::Ping) {
            self.push_ping(PongWaiter::Heartbeat);
            return Ok(());
        }
        let mut buf = BytesMut::new();
        op.encode(&mut buf)?;
        let bytes = buf.freeze();
        self.bytes += bytes.len();
        self.frames.push_back(match op {
            ClientOp::Pub { .. } => Frame::Pub(bytes),
            _ => Frame::Control(bytes),
        });
        Ok(())
    }

    /// Queue a `PING` completed by `waiter` once its `PONG` arrives.
    pub(crate) fn push_ping(&mut self, waiter: PongWaiter) {
        self.bytes += PING.len();
        self.frames.push_back(Frame::Ping(waiter));
    }

    pub(crate) fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Whether enough bytes are queued to write without waiting.
    pub(crate) fn over_threshold(&self) -> bool { self.bytes >= self.threshold }

    /// Take every queued frame as one buffer, moving `PING` waiters to the
    /// in-flight queue. Frames are echoed here, as they go to the wire.
    pub(crate) fn take_batch(&mut self) -> Bytes {
        let mut batch = BytesMut::with_capacity(self.bytes);
        for frame in self.frames.drain(..) {
            if self.debug {
                match &frame {
                    Frame::Pub(bytes) | Frame::Control(bytes) => wire::echo_sent(bytes),
                    Frame::Ping(_) => wire::echo_sent(PING),
                }
            }
            match frame {
                Frame::Pub(bytes) | Frame::Control(bytes) => batch.extend_from_slice(&bytes),
                Frame::Ping(waiter) => {
                    batch.extend_from_slice(PING);
                    self.in_flight.push_back(waiter);
                }
            }
        }
        self.bytes = 0;
        batch.freeze()
    }

    /// Waiter completed by the next `PONG`.
    pub(crate) fn pong(&mut self) -> Option<PongWaiter> { self.in_flight.pop_front() }

    /// Requeue in-flight waiters that must survive a lost connection. They
    /// were written before anything still pending, so they go first.
    pub(crate) fn on_disconnect(&mut self) {
        while let Some(waiter) = self.in_flight.pop_back() {
            if waiter.survives_reconnect() {
                self.bytes += PING.len();
                self.frames.push_front(Frame::Ping(waiter));
            }
        }
    }

    /// Keep only what a new connection should still send: publishes and
    /// pings with a waiter. Subscriptions are replayed separately.
    pub(crate) fn retain_for_reconnect(&mut self) {
        self.frames.retain(|frame| match frame {
            Frame::Pub(_) => true,
            Frame::Control(_) => false,
            Frame::Ping(waiter) => waiter.survives_reconnect(),
        });
        self.bytes = self.frames.iter().map(Frame::len).sum();
    }

    /// Resolve every waiter with [`ClientError::Closed`] and drop all output.
    pub(crate) fn fail_all(&mut self) {
        for waiter in self.in_flight.drain(..) {
            waiter.fail();
        }
        for frame in self.frames.drain(..) {
            if let Frame::Ping(waiter) = frame {
                waiter.fail();
            }
        }
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tokio::sync::oneshot;
    use tracing_test::traced_test;

    use super::*;

    #[fixture]
    fn outbound() -> Outbound { Outbound::new(64, false) }

    fn publish(subject: &str, payload: &'static [u8]) -> ClientOp {
        ClientOp::Pub {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload: Bytes::from_static(payload),
        }
    }

    #[rstest]
    fn batch_preserves_enqueue_order(mut outbound: Outbound) {
        outbound.push(&publish("a", b"1")).expect("push");
        outbound
            .push(&ClientOp::Sub {
                subject: "b".into(),
                queue_group: None,
                sid: 1,
            })
            .expect("push");
        outbound.push(&ClientOp::Ping).expect("push");
        let batch = outbound.take_batch();
        assert_eq!(batch.as_ref(), b"PUB a 1\r\n1\r\nSUB b 1\r\nPING\r\n");
        assert!(outbound.is_empty());
        assert!(matches!(outbound.pong(), Some(PongWaiter::Heartbeat)));
    }

    #[rstest]
    fn threshold_tracks_queued_bytes(mut outbound: Outbound) {
        outbound.push(&publish("small", b"x")).expect("push");
        assert!(!outbound.over_threshold());
        outbound
            .push(&publish("large", &[b'x'; 64]))
            .expect("push");
        assert!(outbound.over_threshold());
        outbound.take_batch();
        assert!(!outbound.over_threshold());
    }

    #[rstest]
    fn pongs_complete_waiters_in_order(mut outbound: Outbound) {
        let (first, mut first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();
        outbound.push_ping(PongWaiter::Flush(first));
        outbound.push_ping(PongWaiter::Heartbeat);
        outbound.push_ping(PongWaiter::Flush(second));
        outbound.take_batch();

        if let Some(PongWaiter::Flush(done)) = outbound.pong() {
            done.send(Ok(())).expect("send");
        }
        assert!(first_rx.try_recv().is_ok());
        assert!(matches!(outbound.pong(), Some(PongWaiter::Heartbeat)));
        assert!(second_rx.try_recv().is_err());
    }

    #[rstest]
    fn reconnect_keeps_publishes_and_waited_pings(mut outbound: Outbound) {
        let (in_flight, _in_flight_rx) = oneshot::channel();
        outbound.push_ping(PongWaiter::Flush(in_flight));
        outbound.push_ping(PongWaiter::Heartbeat);
        outbound.take_batch();

        let (queued, _queued_rx) = oneshot::channel();
        outbound.push(&publish("a", b"1")).expect("push");
        outbound
            .push(&ClientOp::Unsub { sid: 4, max: None })
            .expect("push");
        outbound.push(&ClientOp::Ping).expect("push");
        outbound.push_ping(PongWaiter::Flush(queued));

        outbound.on_disconnect();
        outbound.retain_for_reconnect();
        let batch = outbound.take_batch();
        assert_eq!(batch.as_ref(), b"PING\r\nPUB a 1\r\n1\r\nPING\r\n");
        assert!(matches!(outbound.pong(), Some(PongWaiter::Flush(_))));
        assert!(matches!(outbound.pong(), Some(PongWaiter::Flush(_))));
        assert!(outbound.pong().is_none());
    }

    #[rstest]
    fn fail_all_rejects_every_waiter(mut outbound: Outbound) {
        let (written, mut written_rx) = oneshot::channel();
        let (queued, mut queued_rx) = oneshot::channel();
        outbound.push_ping(PongWaiter::Flush(written));
        outbound.take_batch();
        outbound.push_ping(PongWaiter::Drain(queued));
        outbound.fail_all();
        assert!(matches!(written_rx.try_recv(), Ok(Err(ClientError::Closed))));
        assert!(matches!(queued_rx.try_recv(), Ok(Err(ClientError::Closed))));
    }

    #[test]
    #[traced_test]
    fn only_written_frames_are_echoed() {
        let mut outbound = Outbound::new(64, true);
        outbound
            .push(&ClientOp::Sub {
                subject: "dropped".into(),
                queue_group: None,
                sid: 9,
            })
            .expect("push");
        outbound.push(&publish("kept", b"1")).expect("push");
        assert!(!logs_contain(">> PUB kept 1"));

        outbound.retain_for_reconnect();
        outbound.take_batch();
        assert!(logs_contain(">> PUB kept 1"));
        assert!(!logs_contain("SUB dropped 9"));
    }
}
