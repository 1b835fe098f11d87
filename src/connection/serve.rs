//! The connected event loop and its handlers.
//!
//! [`ConnectionActor::serve`] polls every source with an unbiased
//! `tokio::select!`, turns the winner into a [`Step`] and handles it after
//! the select so handlers may borrow the actor freely. Between connect
//! attempts [`ConnectionActor::idle`] keeps commands and timers flowing.

use std::{collections::VecDeque, io, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::AsyncReadExt,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use super::{
    Command,
    Completion,
    ConnectionActor,
    ConnectionState,
    Event,
    Exit,
    allocate_sid,
    handshake::READ_CAPACITY,
    outbound::PongWaiter,
};
use crate::{
    client::Interest,
    error::ClientError,
    headers::HeaderMap,
    metrics::{self, Direction},
    proto::{ClientOp, ServerOp, Sid},
    request::RequestSpec,
    subscription::{Routed, Sink, SubscriptionSpec, Termination, UnsubscribeOutcome},
    transport::BoxTransport,
};

const STALE_CONNECTION: &str = "stale connection";
const PERMISSIONS_VIOLATION: &str = "permissions violation";

/// Heartbeat ticker, or `None` when `interval` is zero.
fn heartbeat_timer(interval: Duration) -> Option<Interval> {
    if interval.is_zero() {
        return None;
    }
    let mut timer = time::interval_at(Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_heartbeat(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sources polled by the select loop.
enum Step {
    Shutdown,
    Read(io::Result<usize>),
    Command(Option<Command>),
    SubscriptionTimeout(Sid),
    RequestTimeout(String),
    Heartbeat,
    Flush,
}

impl ConnectionActor {
    /// Drive an established connection until it is lost or the client
    /// closes.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus operations internally"
    )]
    pub(super) async fn serve(
        &mut self,
        transport: &mut BoxTransport,
        backlog: VecDeque<ServerOp>,
    ) -> Exit {
        for op in backlog {
            if let Err(error) = self.handle_server_op(op) {
                return Exit::Lost(error);
            }
        }

        let mut heartbeat = heartbeat_timer(self.config.ping.interval);
        let mut read_buf = BytesMut::with_capacity(READ_CAPACITY);
        let mut ops = Vec::new();

        loop {
            if let Some(done) = self.drain_done.take() {
                return Exit::Drained(done);
            }
            if self.outbound.over_threshold() {
                if let Err(error) = self.write_pending(transport).await {
                    return Exit::Lost(error);
                }
            }

            let step = tokio::select! {
                () = self.shutdown.cancelled() => Step::Shutdown,
                read = transport.read_buf(&mut read_buf) => Step::Read(read),
                command = self.commands.recv() => Step::Command(command),
                Some(sid) = self.registry.next_timeout(), if self.registry.has_timers() => {
                    Step::SubscriptionTimeout(sid)
                }
                Some(token) = self.mux.next_timeout(), if self.mux.has_timers() => {
                    Step::RequestTimeout(token)
                }
                () = next_heartbeat(heartbeat.as_mut()) => Step::Heartbeat,
                () = std::future::ready(()), if !self.outbound.is_empty() => Step::Flush,
            };

            let outcome = match step {
                Step::Shutdown | Step::Command(None) => return Exit::Close(None),
                Step::Read(Ok(0)) => {
                    Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())
                }
                Step::Read(Ok(_)) => self.process_input(&mut read_buf, &mut ops),
                Step::Read(Err(error)) => Err(error.into()),
                Step::Command(Some(command)) => match self.handle_command(command) {
                    Some(exit) => return exit,
                    None => Ok(()),
                },
                Step::SubscriptionTimeout(sid) => {
                    self.expire_subscription(sid);
                    Ok(())
                }
                Step::RequestTimeout(token) => {
                    self.mux.expire(&token);
                    Ok(())
                }
                Step::Heartbeat => self.heartbeat(),
                Step::Flush => self.write_pending(transport).await,
            };
            if let Err(error) = outcome {
                return Exit::Lost(error);
            }
        }
    }

    /// Wait out a reconnect delay while still serving commands and timers.
    /// Frames queued meanwhile are sent after the next handshake.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus operations internally"
    )]
    pub(super) async fn idle(&mut self, delay: Duration) -> Option<Exit> {
        debug!(delay_ms = delay.as_millis(), "waiting before reconnect");
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let step = tokio::select! {
                () = &mut sleep => return None,
                () = self.shutdown.cancelled() => Step::Shutdown,
                command = self.commands.recv() => Step::Command(command),
                Some(sid) = self.registry.next_timeout(), if self.registry.has_timers() => {
                    Step::SubscriptionTimeout(sid)
                }
                Some(token) = self.mux.next_timeout(), if self.mux.has_timers() => {
                    Step::RequestTimeout(token)
                }
            };
            match step {
                Step::Shutdown | Step::Command(None) => return Some(Exit::Close(None)),
                Step::Command(Some(command)) => {
                    if let Some(exit) = self.handle_command(command) {
                        return Some(exit);
                    }
                }
                Step::SubscriptionTimeout(sid) => self.expire_subscription(sid),
                Step::RequestTimeout(token) => self.mux.expire(&token),
                Step::Read(_) | Step::Heartbeat | Step::Flush => {}
            }
        }
    }

    fn process_input(
        &mut self,
        buf: &mut BytesMut,
        ops: &mut Vec<ServerOp>,
    ) -> Result<(), ClientError> {
        let parsed = self.parse(buf, ops);
        for op in ops.drain(..) {
            self.handle_server_op(op)?;
        }
        parsed
    }

    /// Handle one server operation. An error ends the connection.
    pub(super) fn handle_server_op(&mut self, op: ServerOp) -> Result<(), ClientError> {
        match op {
            ServerOp::Info(info) => self.apply_info(*info),
            ServerOp::Msg(frame) => {
                let sid = frame.sid;
                let len = frame.payload.len();
                self.shared.stats.record_in(len);
                metrics::record_message(Direction::Inbound, len);
                match self.registry.route(frame) {
                    Routed::Unknown | Routed::Delivered => {}
                    Routed::SlowConsumer => {
                        warn!(sid, "slow consumer, message dropped");
                        self.emit(Event::SlowConsumer { sid });
                    }
                    Routed::Completed { subject } => {
                        debug!(sid, subject, "subscription reached its maximum");
                        self.emit(Event::Unsubscribed { sid, subject });
                    }
                    Routed::Overflow | Routed::Abandoned => {
                        self.queue(&ClientOp::Unsub { sid, max: None });
                    }
                    Routed::Mux(message) => {
                        self.mux.dispatch(message);
                    }
                }
            }
            ServerOp::Err(text) => return self.server_error(text),
            ServerOp::Ok => {}
            ServerOp::Ping => self.queue(&ClientOp::Pong),
            ServerOp::Pong => self.on_pong(),
        }
        Ok(())
    }

    fn server_error(&mut self, text: String) -> Result<(), ClientError> {
        let lowered = text.to_ascii_lowercase();
        if lowered.contains(STALE_CONNECTION) {
            warn!("server reported a stale connection");
            self.emit(Event::StaleConnection);
            return Err(ClientError::StaleConnection);
        }
        if lowered.contains(PERMISSIONS_VIOLATION) {
            warn!(error = %text, "permissions violation");
            self.emit(Event::PermissionViolation(text));
            return Ok(());
        }
        error!(error = %text, "server error");
        Err(ClientError::Server(text))
    }

    fn on_pong(&mut self) {
        self.pings_outstanding = 0;
        match self.outbound.pong() {
            Some(PongWaiter::Flush(done)) => {
                let _ = done.send(Ok(()));
            }
            Some(PongWaiter::Drain(done)) => self.drain_done = Some(done),
            Some(PongWaiter::Heartbeat) | None => {}
        }
    }

    fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.pings_outstanding += 1;
        if self.pings_outstanding > self.config.ping.max_outstanding {
            warn!(
                outstanding = self.pings_outstanding - 1,
                "server stopped answering pings"
            );
            self.emit(Event::StaleConnection);
            return Err(ClientError::StaleConnection);
        }
        self.outbound.push_ping(PongWaiter::Heartbeat);
        Ok(())
    }

    fn expire_subscription(&mut self, sid: Sid) {
        if let Some(removed) = self.registry.expire(sid) {
            debug!(sid, subject = %removed.subject, "subscription timed out");
            self.queue(&ClientOp::Unsub { sid, max: None });
            self.emit(Event::Unsubscribed {
                sid,
                subject: removed.subject,
            });
        }
    }

    /// Handle a command from a client handle. Returns an exit when the
    /// command ends the actor.
    pub(super) fn handle_command(&mut self, command: Command) -> Option<Exit> {
        match command {
            Command::Publish {
                subject,
                reply,
                headers,
                payload,
            } => self.publish(subject, reply, headers, payload),
            Command::Subscribe {
                sid,
                subject,
                queue_group,
                max,
                timeout,
                sender,
                termination,
            } => {
                if self.draining {
                    let _ = termination.set(Termination::Drained);
                    return None;
                }
                let ops = self.registry.insert(
                    sid,
                    SubscriptionSpec {
                        subject,
                        queue_group,
                        max,
                        timeout,
                        sink: Sink::Channel {
                            sender,
                            termination,
                        },
                    },
                );
                for op in &ops {
                    self.queue(op);
                }
            }
            Command::Unsubscribe {
                interest: Interest::Subscription(sid),
                max,
            } => self.unsubscribe(sid, max),
            Command::Unsubscribe {
                interest: Interest::Request(token),
                ..
            } => {
                self.mux.cancel(&token);
            }
            Command::Request {
                subject,
                headers,
                payload,
                spec,
            } => self.request(subject, headers, payload, spec),
            Command::Flush(done) => self.outbound.push_ping(PongWaiter::Flush(done)),
            Command::Drain(done) => self.drain(done),
            Command::Close(reply) => return Some(Exit::Close(Some(reply))),
        }
        None
    }

    fn publish(
        &mut self,
        subject: String,
        reply: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
    ) {
        self.shared.stats.record_out(payload.len());
        metrics::record_message(Direction::Outbound, payload.len());
        self.queue(&ClientOp::Pub {
            subject,
            reply,
            headers,
            payload,
        });
    }

    fn unsubscribe(&mut self, sid: Sid, max: Option<u64>) {
        if self.mux.sid() == Some(sid) {
            debug!(sid, "ignoring unsubscribe of the request inbox");
            return;
        }
        match self.registry.unsubscribe(sid, max) {
            UnsubscribeOutcome::Unknown => {}
            UnsubscribeOutcome::Removed { subject } => {
                self.queue(&ClientOp::Unsub { sid, max: None });
                self.emit(Event::Unsubscribed { sid, subject });
            }
            UnsubscribeOutcome::Capped => self.queue(&ClientOp::Unsub { sid, max }),
        }
    }

    fn request(
        &mut self,
        subject: String,
        headers: Option<HeaderMap>,
        payload: Bytes,
        spec: RequestSpec,
    ) {
        if self.draining {
            let _ = spec.sender.send(Err(ClientError::Draining.into()));
            return;
        }
        if self.mux.sid().is_none() {
            let sid = allocate_sid(&self.shared.sids);
            let ops = self.registry.insert(
                sid,
                SubscriptionSpec {
                    subject: self.mux.subject(),
                    queue_group: None,
                    max: None,
                    timeout: None,
                    sink: Sink::Mux,
                },
            );
            for op in &ops {
                self.queue(op);
            }
            self.mux.set_sid(Some(sid));
        }
        let reply = self.mux.reply_subject(&spec.token);
        self.mux.register(spec);
        self.publish(subject, Some(reply), headers, payload);
    }

    fn drain(&mut self, done: Completion) {
        if self.draining {
            let _ = done.send(Err(ClientError::Draining));
            return;
        }
        self.draining = true;
        self.set_state(ConnectionState::Draining);
        let sids = self.registry.subscriber_sids();
        info!(subscriptions = sids.len(), "draining");
        for sid in sids {
            self.queue(&ClientOp::Unsub { sid, max: None });
        }
        self.outbound.push_ping(PongWaiter::Drain(done));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_disables_the_heartbeat() {
        assert!(heartbeat_timer(Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_first_fires_after_one_interval() {
        let mut timer = heartbeat_timer(Duration::from_secs(5));
        let started = Instant::now();
        next_heartbeat(timer.as_mut()).await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
