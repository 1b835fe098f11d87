//! Connect attempt: `INFO`, optional TLS upgrade, `CONNECT`, subscription
//! replay and the `PING`/`PONG` round trip.

use std::{collections::VecDeque, io, sync::Arc};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{ConnectionActor, ConnectionState, Event, wire};
use crate::{
    auth::Credentials,
    error::ClientError,
    parser::{DEFAULT_MAX_PAYLOAD, Parser},
    proto::{ClientOp, ConnectInfo, PROTOCOL_VERSION, ServerInfo, ServerOp},
    server_list::ServerAddr,
    tls::TlsMode,
    transport::BoxTransport,
};

pub(super) const READ_CAPACITY: usize = 32 * 1024;

/// Room for an `HMSG` header block on top of the advertised `max_payload`.
const HEADER_SLACK: usize = 64 * 1024;

impl ConnectionActor {
    /// Open a transport to `addr` and complete the handshake. Operations
    /// received after the handshake `PONG` in the same read are returned.
    pub(super) async fn establish(
        &mut self,
        addr: &ServerAddr,
    ) -> Result<(BoxTransport, VecDeque<ServerOp>), ClientError> {
        let mut transport = self.connector.connect(addr).await?;
        self.set_state(ConnectionState::AwaitingInfo);
        self.parser = Parser::with_max_control_line(self.config.max_control_line);
        let mut backlog = VecDeque::new();

        let info = match self.next_op(&mut transport, &mut backlog).await? {
            ServerOp::Info(info) => *info,
            other => return Err(ClientError::UnexpectedFirstFrame(other.verb())),
        };

        let wants_tls = self.config.tls_mode == TlsMode::Required || addr.is_tls();
        if info.tls_required && self.config.tls_mode == TlsMode::Disabled {
            return Err(ClientError::TlsRequired);
        }
        if wants_tls && !info.tls_required && !info.tls_available {
            return Err(ClientError::TlsUnavailable);
        }
        if (info.tls_required || wants_tls) && !transport.is_encrypted() {
            self.set_state(ConnectionState::TlsUpgrading);
            debug!(server = %addr, "upgrading to tls");
            transport = self.connector.upgrade(transport, addr.host()).await?;
        }
        self.secure = transport.is_encrypted();

        self.set_state(ConnectionState::Handshaking);
        let connect = self.connect_info(&info, addr)?;
        self.apply_info(info);

        let mut handshake = BytesMut::new();
        self.encode_direct(&ClientOp::Connect(Box::new(connect)), &mut handshake)?;
        for op in self.registry.replay() {
            self.encode_direct(&op, &mut handshake)?;
        }
        self.encode_direct(&ClientOp::Ping, &mut handshake)?;
        self.outbound.retain_for_reconnect();
        transport.write_all(&handshake).await?;
        transport.flush().await?;

        self.await_pong(&mut transport, &mut backlog).await?;
        Ok((transport, backlog))
    }

    async fn await_pong(
        &mut self,
        transport: &mut BoxTransport,
        backlog: &mut VecDeque<ServerOp>,
    ) -> Result<(), ClientError> {
        loop {
            match self.next_op(transport, backlog).await? {
                ServerOp::Pong => return Ok(()),
                other => self.handle_server_op(other)?,
            }
        }
    }

    /// Next parsed operation, reading from the transport as needed.
    async fn next_op(
        &mut self,
        transport: &mut BoxTransport,
        backlog: &mut VecDeque<ServerOp>,
    ) -> Result<ServerOp, ClientError> {
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);
        let mut ops = Vec::new();
        loop {
            if let Some(op) = backlog.pop_front() {
                return Ok(op);
            }
            if transport.read_buf(&mut buf).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            let parsed = self.parse(&mut buf, &mut ops);
            backlog.extend(ops.drain(..));
            parsed?;
        }
    }

    /// Feed `buf` to the parser, echoing received operations when the debug
    /// flag is set.
    pub(super) fn parse(
        &mut self,
        buf: &mut BytesMut,
        out: &mut Vec<ServerOp>,
    ) -> Result<(), ClientError> {
        let start = out.len();
        let result = self.parser.feed(&buf[..], out);
        buf.clear();
        if self.config.debug {
            for op in &out[start..] {
                wire::echo_received(op);
            }
        }
        result.map_err(ClientError::from)
    }

    fn connect_info(&self, info: &ServerInfo, addr: &ServerAddr) -> Result<ConnectInfo, ClientError> {
        let headers = self.config.headers && info.headers;
        let mut connect = ConnectInfo {
            verbose: self.config.verbose,
            pedantic: self.config.pedantic,
            tls_required: self.secure,
            lang: "rust".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol: PROTOCOL_VERSION,
            echo: self.config.echo,
            headers,
            no_responders: headers && self.config.no_responders,
            name: self.config.name.clone(),
            ..ConnectInfo::default()
        };
        let credentials = match (addr.credentials(), &self.config.authenticator) {
            (Some(credentials), _) => credentials.clone(),
            (None, Some(authenticator)) => authenticator.authenticate(info.nonce.as_deref())?,
            (None, None) => Credentials::default(),
        };
        credentials.validate()?;
        if info.auth_required && credentials.is_empty() {
            debug!(server = %addr, "server requires auth but no credentials are configured");
        }
        credentials.apply_to(&mut connect);
        Ok(connect)
    }

    /// Record a server `INFO`: cluster topology, lame duck mode and the
    /// advertised limits.
    pub(super) fn apply_info(&mut self, info: ServerInfo) {
        if !info.connect_urls.is_empty() {
            let delta = self.servers.apply_connect_urls(&info.connect_urls, self.secure);
            if !delta.is_empty() {
                info!(
                    added = delta.added.len(),
                    removed = delta.removed.len(),
                    "cluster topology changed"
                );
                self.emit(Event::TopologyChanged {
                    added: delta.added.iter().map(ToString::to_string).collect(),
                    removed: delta.removed.iter().map(ToString::to_string).collect(),
                });
            }
        }
        if info.ldm {
            warn!(server = %info.server_id, "server entered lame duck mode");
            self.emit(Event::LameDuckMode);
        }
        self.parser.set_max_payload(inbound_limit(info.max_payload));
        self.shared.info.send_replace(Some(Arc::new(info)));
    }

    /// Encode a handshake frame that bypasses the outbound queue.
    fn encode_direct(&self, op: &ClientOp, dst: &mut BytesMut) -> Result<(), ClientError> {
        let start = dst.len();
        op.encode(dst)?;
        if self.config.debug {
            wire::echo_sent(&dst[start..]);
        }
        Ok(())
    }

    /// Write every queued frame.
    pub(super) async fn write_pending(
        &mut self,
        transport: &mut BoxTransport,
    ) -> Result<(), ClientError> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        let batch = self.outbound.take_batch();
        transport.write_all(&batch).await?;
        transport.flush().await?;
        Ok(())
    }
}

/// Largest payload accepted from a server advertising `max_payload`.
fn inbound_limit(max_payload: usize) -> usize {
    if max_payload == 0 {
        DEFAULT_MAX_PAYLOAD
    } else {
        max_payload.saturating_add(HEADER_SLACK)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, DEFAULT_MAX_PAYLOAD)]
    #[case(1024, 1024 + HEADER_SLACK)]
    #[case(usize::MAX, usize::MAX)]
    fn inbound_limit_follows_advertised_payload(#[case] advertised: usize, #[case] expected: usize) {
        assert_eq!(inbound_limit(advertised), expected);
    }
}
