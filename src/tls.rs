//! TLS client configuration.
//!
//! Trust roots start from the Mozilla set shipped by `webpki-roots`; extra CA
//! certificates and a client identity may be loaded from PEM files. A fully
//! custom [`rustls::ClientConfig`] can be supplied instead.

use std::{path::PathBuf, sync::Arc};

use rustls::{
    ClientConfig,
    RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
};

use crate::error::ClientError;

/// Whether a connection uses TLS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Upgrade only when the server requires TLS or the URL scheme is
    /// `tls://`.
    #[default]
    Auto,
    /// Always upgrade; servers that do not offer TLS are rejected.
    Required,
    /// Never upgrade; servers that require TLS are rejected.
    Disabled,
}

/// TLS settings shared by every connect attempt.
///
/// # Examples
///
/// ```
/// use natwire::{TlsConfig, TlsMode};
///
/// let tls = TlsConfig::default().mode(TlsMode::Required);
/// assert_eq!(tls.tls_mode(), TlsMode::Required);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    mode: TlsMode,
    root_cert: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    custom: Option<Arc<ClientConfig>>,
}

impl TlsConfig {
    /// Select when connections are upgraded.
    #[must_use]
    pub fn mode(mut self, mode: TlsMode) -> Self {
        self.mode = mode;
        self
    }

    /// Trust the CA certificates in the PEM file at `path` in addition to the
    /// built-in roots.
    #[must_use]
    pub fn root_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_cert = Some(path.into());
        self
    }

    /// Present the certificate chain and private key in the given PEM files.
    #[must_use]
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Use a prepared rustls configuration, ignoring the file settings.
    #[must_use]
    pub fn client_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.custom = Some(config);
        self
    }

    /// Configured [`TlsMode`].
    #[must_use]
    pub fn tls_mode(&self) -> TlsMode { self.mode }

    /// Build the rustls configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Tls`] when a PEM file cannot be read or the
    /// client identity is rejected.
    pub fn build(&self) -> Result<Arc<ClientConfig>, ClientError> {
        if let Some(config) = &self.custom {
            return Ok(Arc::clone(config));
        }
        let tls_err = |err: &dyn std::fmt::Display| ClientError::Tls(err.to_string());

        let mut roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        };
        if let Some(path) = &self.root_cert {
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| tls_err(&e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tls_err(&e))?;
            roots.add_parsable_certificates(certs);
        }

        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| tls_err(&e))?
                .with_root_certificates(roots);

        let config = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => {
                let chain = CertificateDer::pem_file_iter(cert)
                    .map_err(|e| tls_err(&e))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| tls_err(&e))?;
                let key = PrivateKeyDer::from_pem_file(key).map_err(|e| tls_err(&e))?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| tls_err(&e))?
            }
            _ => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}
