//! Byte-stream transports and the factories that open them.
//!
//! The connection state machine only needs a duplex byte stream that can say
//! whether it is encrypted. [`Connector`] opens such streams and upgrades a
//! plaintext stream to TLS in place, after the server's `INFO` asked for it.

mod socket;

use std::{io, sync::Arc};

use async_trait::async_trait;
use rustls::{ClientConfig, pki_types::ServerName};
pub use socket::SocketOptions;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    net::{TcpSocket, TcpStream, lookup_host},
};
use tokio_rustls::{TlsConnector, client::TlsStream};

use crate::{error::ClientError, server_list::ServerAddr};

/// Duplex byte stream used by one connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Whether bytes on this stream are protected by TLS.
    fn is_encrypted(&self) -> bool;
}

/// Owned, type-erased [`Transport`].
pub type BoxTransport = Box<dyn Transport>;

impl Transport for TcpStream {
    fn is_encrypted(&self) -> bool { false }
}

impl Transport for DuplexStream {
    fn is_encrypted(&self) -> bool { false }
}

impl<S> Transport for TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_encrypted(&self) -> bool { true }
}

/// Opens transports to servers.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a plaintext stream to `addr`.
    async fn connect(&self, addr: &ServerAddr) -> Result<BoxTransport, ClientError>;

    /// Upgrade `transport` to TLS, verifying the certificate against `host`.
    async fn upgrade(
        &self,
        transport: BoxTransport,
        host: &str,
    ) -> Result<BoxTransport, ClientError>;
}

/// Shared handle to a [`Connector`].
pub type SharedConnector = Arc<dyn Connector>;

/// [`Connector`] for TCP with rustls upgrades.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    socket_options: SocketOptions,
    tls: Arc<ClientConfig>,
}

impl TcpConnector {
    /// Create a connector applying `socket_options` to every socket and
    /// using `tls` for upgrades.
    #[must_use]
    pub fn new(socket_options: SocketOptions, tls: Arc<ClientConfig>) -> Self {
        Self {
            socket_options,
            tls,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &ServerAddr) -> Result<BoxTransport, ClientError> {
        let mut last_error = None;
        for resolved in lookup_host((addr.host(), addr.port())).await? {
            let socket = if resolved.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            self.socket_options.apply(&socket)?;
            match socket.connect(resolved).await {
                Ok(stream) => return Ok(Box::new(stream)),
                Err(err) => {
                    tracing::debug!(%resolved, error = %err, "address refused connection");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
            })
            .into())
    }

    async fn upgrade(
        &self,
        transport: BoxTransport,
        host: &str,
    ) -> Result<BoxTransport, ClientError> {
        let name = ServerName::try_from(host.to_owned())
            .map_err(|err| ClientError::Tls(format!("invalid server name {host:?}: {err}")))?;
        let stream = TlsConnector::from(Arc::clone(&self.tls))
            .connect(name, transport)
            .await
            .map_err(|err| ClientError::Tls(err.to_string()))?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::tls::TlsConfig;

    fn connector() -> TcpConnector {
        TcpConnector::new(
            SocketOptions::default(),
            TlsConfig::default().build().expect("tls config"),
        )
    }

    #[tokio::test]
    async fn tcp_connector_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            stream.write_all(b"INFO {}\r\n").await.expect("write");
        });

        let addr: ServerAddr = format!("127.0.0.1:{port}").parse().expect("addr");
        let mut transport = connector().connect(&addr).await.expect("connect");
        assert!(!transport.is_encrypted());
        let mut buf = [0u8; 9];
        transport.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"INFO {}\r\n");
        accept.await.expect("join");
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let addr: ServerAddr = format!("127.0.0.1:{port}").parse().expect("addr");
        assert!(matches!(
            connector().connect(&addr).await,
            Err(ClientError::Io(_))
        ));
    }

    #[tokio::test]
    async fn upgrade_against_plaintext_peer_fails() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let _ = server.read(&mut buf).await;
            let _ = server.write_all(b"not a tls record\r\n").await;
        });
        let result = connector().upgrade(Box::new(client), "localhost").await;
        assert!(matches!(result, Err(ClientError::Tls(_))));
    }
}
