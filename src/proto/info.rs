//! JSON bodies of the `INFO` and `CONNECT` operations.

use serde::{Deserialize, Serialize};

/// Capabilities and topology advertised by the server in `INFO`.
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag mirrors an INFO field"
)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique identifier of the server.
    pub server_id: String,
    /// Configured server name.
    pub server_name: String,
    /// Server version.
    pub version: String,
    /// Host the server listens on.
    pub host: String,
    /// Port the server listens on.
    pub port: u16,
    /// Whether the server understands `HPUB`/`HMSG`.
    pub headers: bool,
    /// Whether the server requires authentication.
    pub auth_required: bool,
    /// Whether the server requires TLS.
    pub tls_required: bool,
    /// Whether the server offers TLS without requiring it.
    pub tls_available: bool,
    /// Largest payload the server accepts.
    pub max_payload: usize,
    /// Protocol version supported by the server.
    pub proto: i8,
    /// Identifier the server assigned to this client.
    pub client_id: u64,
    /// Nonce to sign for nkey authentication.
    pub nonce: Option<String>,
    /// Name of the cluster the server belongs to.
    pub cluster: Option<String>,
    /// Client URLs of the cluster peers (`host:port`).
    pub connect_urls: Vec<String>,
    /// Whether the server entered lame duck mode.
    pub ldm: bool,
}

/// Options sent to the server in `CONNECT`.
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag maps to an independent CONNECT field"
)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Request `+OK` acknowledgements.
    pub verbose: bool,
    /// Request strict subject checking.
    pub pedantic: bool,
    /// Whether the client is using TLS.
    pub tls_required: bool,
    /// Client implementation language.
    pub lang: String,
    /// Client implementation version.
    pub version: String,
    /// Client protocol version.
    pub protocol: u8,
    /// Whether the server may deliver the client's own publishes back.
    pub echo: bool,
    /// Whether the client understands `HMSG`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub headers: bool,
    /// Whether the server should reply `503` to requests nobody answers.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_responders: bool,
    /// Optional client name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    /// Bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// User JWT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    /// Public nkey.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nkey: Option<String>,
    /// Signed nonce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_tolerates_unknown_and_missing_fields() {
        let json = r#"{"server_id":"abc","max_payload":1048576,"jetstream":true,"connect_urls":["10.0.0.2:4222"]}"#;
        let info: ServerInfo = serde_json::from_str(json).expect("parse info");
        assert_eq!(info.server_id, "abc");
        assert_eq!(info.max_payload, 1_048_576);
        assert_eq!(info.connect_urls, vec!["10.0.0.2:4222".to_string()]);
        assert!(!info.tls_required);
    }

    #[test]
    fn connect_omits_absent_credentials() {
        let info = ConnectInfo {
            lang: "rust".into(),
            version: "0.1.0".into(),
            protocol: 1,
            ..ConnectInfo::default()
        };
        let json = serde_json::to_string(&info).expect("serialize connect");
        assert!(!json.contains("user"));
        assert!(!json.contains("auth_token"));
        assert!(!json.contains("headers"));
        assert!(json.contains(r#""lang":"rust""#));
    }
}
