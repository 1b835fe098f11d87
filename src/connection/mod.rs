//! Connection actor owning the transport and all protocol state.
//!
//! One actor task runs per [`Client`](crate::Client). It connects, performs
//! the `INFO`/`CONNECT`/`PING` handshake, then polls the transport, the
//! command channel, subscription and request timers and the heartbeat with
//! a single `tokio::select!` loop. When the connection is lost it rotates
//! the server list and reconnects until the policy gives up.

mod command;
mod event;
mod handshake;
mod outbound;
mod serve;
mod wire;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub(crate) use command::{Command, CommandReceiver, CommandSender, Completion};
pub(crate) use event::Counters;
pub use event::{ConnectionState, Event, Statistics};
use outbound::Outbound;
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, oneshot, watch},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
pub use wire::WIRE_TARGET;

use crate::{
    auth::SharedAuthenticator,
    client::{FlushConfig, PingConfig, ReconnectConfig},
    error::{ClientError, RequestError},
    metrics,
    parser::Parser,
    proto::{ClientOp, ServerInfo, Sid},
    request::RequestMux,
    server_list::ServerList,
    subscription::{Registry, Termination},
    tls::TlsMode,
    transport::{BoxTransport, SharedConnector},
};

/// Allocate the next subscription id from `counter`. Ids start at 1.
pub(crate) fn allocate_sid(counter: &AtomicU64) -> Sid { counter.fetch_add(1, Ordering::Relaxed) + 1 }

/// Settings the actor needs from [`ClientBuilder`](crate::ClientBuilder).
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag maps to an independent CONNECT option"
)]
#[derive(Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) ping: PingConfig,
    pub(crate) flush: FlushConfig,
    pub(crate) connect_timeout: Duration,
    pub(crate) tls_mode: TlsMode,
    pub(crate) verbose: bool,
    pub(crate) pedantic: bool,
    pub(crate) echo: bool,
    pub(crate) name: Option<String>,
    pub(crate) headers: bool,
    pub(crate) no_responders: bool,
    pub(crate) debug: bool,
    pub(crate) max_control_line: usize,
    pub(crate) authenticator: Option<SharedAuthenticator>,
}

/// State published by the actor for [`Client`](crate::Client) handles.
pub(crate) struct Shared {
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) info: watch::Sender<Option<Arc<ServerInfo>>>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) stats: Arc<Counters>,
    pub(crate) sids: Arc<AtomicU64>,
}

/// How a connected session or the whole actor ended.
enum Exit {
    /// The transport failed or the server forced a disconnect.
    Lost(ClientError),
    /// Closed by the caller, or every handle was dropped.
    Close(Option<oneshot::Sender<()>>),
    /// The drain `PING` was answered.
    Drained(Completion),
    /// No server is left or reconnection is disabled.
    Failed(Arc<ClientError>),
}

pub(crate) struct ConnectionActor {
    config: ConnectionConfig,
    connector: SharedConnector,
    servers: ServerList,
    commands: CommandReceiver,
    shutdown: CancellationToken,
    shared: Shared,
    registry: Registry,
    mux: RequestMux,
    outbound: Outbound,
    parser: Parser,
    pings_outstanding: u32,
    draining: bool,
    drain_done: Option<Completion>,
    ever_connected: bool,
    secure: bool,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: ConnectionConfig,
        connector: SharedConnector,
        servers: ServerList,
        inbox_prefix: String,
        commands: CommandReceiver,
        shutdown: CancellationToken,
        shared: Shared,
    ) -> Self {
        let outbound = Outbound::new(config.flush.threshold, config.debug);
        let parser = Parser::with_max_control_line(config.max_control_line);
        Self {
            config,
            connector,
            servers,
            commands,
            shutdown,
            shared,
            registry: Registry::new(),
            mux: RequestMux::new(inbox_prefix),
            outbound,
            parser,
            pings_outstanding: 0,
            draining: false,
            drain_done: None,
            ever_connected: false,
            secure: false,
        }
    }

    /// Spawn the actor. The returned receiver resolves once the first
    /// handshake completes or the actor gives up.
    pub(crate) fn spawn(self) -> oneshot::Receiver<Result<(), ClientError>> {
        let (ready, connected) = oneshot::channel();
        tokio::spawn(self.run(ready));
        connected
    }

    async fn run(mut self, ready: oneshot::Sender<Result<(), ClientError>>) {
        let mut ready = Some(ready);
        let mut last_error: Option<Arc<ClientError>> = None;
        let exit = loop {
            let Some(server) = self.servers.current() else {
                break Exit::Failed(
                    last_error
                        .take()
                        .unwrap_or_else(|| Arc::new(ClientError::NoServers)),
                );
            };
            let addr = server.addr().clone();
            let attempt = server.attempts() + 1;
            let did_connect = server.did_connect();
            let untried = server.is_untried();

            if !untried {
                if let Some(exit) = self.idle(self.config.reconnect.delay()).await {
                    break exit;
                }
            }
            if self.ever_connected {
                self.set_state(ConnectionState::Reconnecting);
                info!(server = %addr, attempt, "reconnecting");
                self.emit(Event::Reconnecting {
                    server: addr.to_string(),
                    attempt,
                });
            } else {
                self.set_state(ConnectionState::Connecting);
            }
            self.servers.record_attempt();

            let shutdown = self.shutdown.clone();
            let connect_timeout = self.config.connect_timeout;
            let established = tokio::select! {
                () = shutdown.cancelled() => break Exit::Close(None),
                result = time::timeout(connect_timeout, self.establish(&addr)) => {
                    result.unwrap_or(Err(ClientError::ConnectTimeout))
                }
            };

            match established {
                Ok((mut transport, backlog)) => {
                    self.servers.mark_connected();
                    self.set_state(ConnectionState::Connected);
                    if self.ever_connected {
                        self.shared.stats.record_reconnect();
                        metrics::inc_reconnects();
                        info!(server = %addr, "reconnected");
                        self.emit(Event::Reconnected {
                            server: addr.to_string(),
                        });
                    } else {
                        info!(server = %addr, "connected");
                        self.emit(Event::Connected {
                            server: addr.to_string(),
                        });
                    }
                    self.ever_connected = true;
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(()));
                    }

                    match self.serve(&mut transport, backlog).await {
                        Exit::Lost(error) => {
                            warn!(server = %addr, %error, "connection lost");
                            metrics::inc_errors();
                            let error = Arc::new(error);
                            self.emit(Event::Error(Arc::clone(&error)));
                            self.emit(Event::Disconnected {
                                server: addr.to_string(),
                            });
                            self.outbound.on_disconnect();
                            self.pings_outstanding = 0;
                            self.set_state(ConnectionState::Disconnected);
                            if !self.config.reconnect.enabled {
                                break Exit::Failed(error);
                            }
                            self.servers
                                .rotate(false, self.config.reconnect.max_attempts);
                            last_error = Some(error);
                        }
                        exit => {
                            self.close_transport(&mut transport).await;
                            break exit;
                        }
                    }
                }
                Err(error) => {
                    warn!(server = %addr, %error, "connect attempt failed");
                    metrics::inc_errors();
                    let tls_mismatch =
                        matches!(error, ClientError::TlsRequired | ClientError::TlsUnavailable);
                    let drop = tls_mismatch
                        || !self.config.reconnect.enabled
                        || (!did_connect && !self.config.reconnect.wait_on_first_connect);
                    let error = Arc::new(error);
                    self.emit(Event::Error(Arc::clone(&error)));
                    self.set_state(ConnectionState::Disconnected);
                    self.servers
                        .rotate(drop, self.config.reconnect.max_attempts);
                    last_error = Some(error);
                }
            }
        };
        self.finish(exit, ready);
    }

    /// Write what is still queued and shut the transport down, bounded by
    /// the connect timeout.
    async fn close_transport(&mut self, transport: &mut BoxTransport) {
        let timeout = self.config.connect_timeout;
        let closing = async {
            let _ = self.write_pending(transport).await;
            let _ = transport.shutdown().await;
        };
        if time::timeout(timeout, closing).await.is_err() {
            warn!("timed out writing pending frames on close");
        }
    }

    /// Resolve everything still waiting and publish the terminal state.
    fn finish(&mut self, exit: Exit, mut ready: Option<oneshot::Sender<Result<(), ClientError>>>) {
        let termination = match exit {
            Exit::Drained(_) => Termination::Drained,
            _ => Termination::Closed,
        };
        self.registry.clear(termination);
        self.mux.fail_all(&RequestError::Closed);
        self.mux.set_sid(None);
        self.outbound.fail_all();
        self.set_state(ConnectionState::Closed);

        let reason = match exit {
            Exit::Close(reply) => {
                info!("connection closed");
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                None
            }
            Exit::Drained(done) => {
                info!("connection drained and closed");
                let _ = done.send(Ok(()));
                None
            }
            Exit::Lost(error) => Some(Arc::new(error)),
            Exit::Failed(error) => {
                warn!(%error, "connection closed for good");
                match ready.take() {
                    Some(ready) => {
                        let error = Arc::try_unwrap(error)
                            .unwrap_or_else(|shared| ClientError::Server(shared.to_string()));
                        let _ = ready.send(Err(error));
                        None
                    }
                    None => Some(error),
                }
            }
        };
        if let Some(ready) = ready {
            let _ = ready.send(Err(ClientError::Closed));
        }
        self.emit(Event::Closed { reason });
    }

    fn set_state(&self, state: ConnectionState) { self.shared.state.send_replace(state); }

    fn emit(&self, event: Event) { let _ = self.shared.events.send(event); }

    /// Queue a frame for the next write.
    fn queue(&mut self, op: &ClientOp) {
        if let Err(error) = self.outbound.push(op) {
            tracing::error!(%error, "failed to encode frame");
        }
    }
}
