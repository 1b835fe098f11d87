//! Known server endpoints and their rotation order.
//!
//! The list keeps the server currently in use at the front. Rotating after a
//! disconnect moves it to the back, or drops it entirely when it never
//! accepted a connection. Peers learned from `INFO` are appended as
//! *implicit* servers and removed again when the cluster stops advertising
//! them.

use std::{collections::VecDeque, fmt, str::FromStr};

use rand::seq::SliceRandom;
use url::Url;

use crate::{auth::Credentials, error::ClientError};

/// Port used when a server URL does not name one.
pub const DEFAULT_PORT: u16 = 4222;

/// URL used when no server is configured.
pub const DEFAULT_URL: &str = "nats://127.0.0.1:4222";

/// Address of one server, parsed from a `nats://` or `tls://` URL.
///
/// A bare `host:port` is accepted and treated as `nats://`.
///
/// # Examples
///
/// ```
/// use natwire::ServerAddr;
///
/// let addr: ServerAddr = "tls://derek:pw@demo.nats.io".parse().unwrap();
/// assert_eq!(addr.host(), "demo.nats.io");
/// assert_eq!(addr.port(), 4222);
/// assert!(addr.is_tls());
/// assert_eq!(addr.to_string(), "tls://demo.nats.io:4222");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddr {
    host: String,
    port: u16,
    tls: bool,
    credentials: Option<Credentials>,
}

impl ServerAddr {
    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str { &self.host }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 { self.port }

    /// Whether the URL scheme demands TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool { self.tls }

    /// Credentials embedded in the URL.
    ///
    /// `user:pass@` yields a user and password; a lone `token@` yields a
    /// bearer token.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> { self.credentials.as_ref() }

    fn same_endpoint(&self, other: &Self) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }

    fn implicit(host_port: &str, tls: bool) -> Result<Self, ClientError> {
        let scheme = if tls { "tls" } else { "nats" };
        let mut addr: Self = format!("{scheme}://{host_port}").parse()?;
        addr.credentials = None;
        Ok(addr)
    }
}

impl FromStr for ServerAddr {
    type Err = ClientError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ClientError::InvalidUrl {
            url: input.to_owned(),
            reason: reason.to_owned(),
        };
        let trimmed = input.trim();
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("nats://{trimmed}"))
        }
        .map_err(|err| invalid(&err.to_string()))?;

        let tls = match url.scheme() {
            "nats" => false,
            "tls" => true,
            other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_owned();

        let user = url.username();
        let credentials = match (user.is_empty(), url.password()) {
            (true, None) => None,
            (true, Some(_)) => return Err(invalid("password without user")),
            (false, Some(pass)) => Some(Credentials {
                user: Some(user.to_owned()),
                pass: Some(pass.to_owned()),
                ..Credentials::default()
            }),
            (false, None) => Some(Credentials {
                auth_token: Some(user.to_owned()),
                ..Credentials::default()
            }),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            tls,
            credentials,
        })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "tls" } else { "nats" };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        }
    }
}

/// A server together with its connection history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Server {
    addr: ServerAddr,
    did_connect: bool,
    implicit: bool,
    attempts: u32,
}

impl Server {
    fn new(addr: ServerAddr, implicit: bool) -> Self {
        Self {
            addr,
            did_connect: false,
            implicit,
            attempts: 0,
        }
    }

    /// Endpoint address.
    #[must_use]
    pub fn addr(&self) -> &ServerAddr { &self.addr }

    /// Whether a connection to this server ever completed its handshake.
    #[must_use]
    pub fn did_connect(&self) -> bool { self.did_connect }

    /// Whether the server was learned from cluster gossip.
    #[must_use]
    pub fn is_implicit(&self) -> bool { self.implicit }

    /// Connect attempts since the last successful connection.
    #[must_use]
    pub fn attempts(&self) -> u32 { self.attempts }

    /// Whether the next attempt against this server may start immediately.
    #[must_use]
    pub fn is_untried(&self) -> bool { !self.did_connect && self.attempts == 0 }
}

/// Servers added and removed by an `INFO` update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyDelta {
    /// Newly discovered servers.
    pub added: Vec<ServerAddr>,
    /// Implicit servers no longer advertised.
    pub removed: Vec<ServerAddr>,
}

impl TopologyDelta {
    /// Whether the update changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() }
}

/// Ordered, rotating collection of servers.
#[derive(Clone, Debug)]
pub struct ServerList {
    servers: VecDeque<Server>,
    randomize: bool,
}

impl ServerList {
    /// Build a list from configured addresses, shuffled once when
    /// `randomize` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoServers`] when `addrs` is empty.
    pub fn new(addrs: Vec<ServerAddr>, randomize: bool) -> Result<Self, ClientError> {
        if addrs.is_empty() {
            return Err(ClientError::NoServers);
        }
        let mut servers: VecDeque<Server> = VecDeque::with_capacity(addrs.len());
        for addr in addrs {
            if !servers.iter().any(|s| s.addr.same_endpoint(&addr)) {
                servers.push_back(Server::new(addr, false));
            }
        }
        if randomize {
            servers.make_contiguous().shuffle(&mut rand::rng());
        }
        Ok(Self { servers, randomize })
    }

    /// Server to use for the next attempt, or the one in use.
    #[must_use]
    pub fn current(&self) -> Option<&Server> { self.servers.front() }

    /// Number of known servers.
    #[must_use]
    pub fn len(&self) -> usize { self.servers.len() }

    /// Whether no server is left.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.servers.is_empty() }

    /// Iterate servers in rotation order, starting with the current one.
    pub fn iter(&self) -> impl Iterator<Item = &Server> { self.servers.iter() }

    /// Count an attempt against the current server.
    pub fn record_attempt(&mut self) {
        if let Some(server) = self.servers.front_mut() {
            server.attempts = server.attempts.saturating_add(1);
        }
    }

    /// Mark the current server as connected and reset its attempt count.
    pub fn mark_connected(&mut self) {
        if let Some(server) = self.servers.front_mut() {
            server.did_connect = true;
            server.attempts = 0;
        }
    }

    /// Move past the current server.
    ///
    /// The current server goes to the back of the rotation unless `drop` is
    /// set, in which case it is forgotten. Servers whose attempts reached
    /// `max_attempts` are pruned as well. Returns the next server.
    pub fn rotate(&mut self, drop: bool, max_attempts: Option<u32>) -> Option<&Server> {
        match self.servers.pop_front() {
            Some(server) if !drop => self.servers.push_back(server),
            _ => {}
        }
        if let Some(max) = max_attempts {
            self.servers.retain(|server| server.attempts < max);
        }
        self.servers.front()
    }

    /// Apply the `connect_urls` of an `INFO` frame.
    ///
    /// Unknown peers are appended as implicit servers using `tls` for the
    /// scheme; implicit servers missing from `connect_urls` are removed,
    /// except the current one. Entries that fail to parse are skipped.
    pub fn apply_connect_urls(&mut self, connect_urls: &[String], tls: bool) -> TopologyDelta {
        let advertised: Vec<ServerAddr> = connect_urls
            .iter()
            .filter_map(|host_port| ServerAddr::implicit(host_port, tls).ok())
            .collect();

        let mut delta = TopologyDelta::default();
        let mut index = 1;
        while index < self.servers.len() {
            let server = &self.servers[index];
            if server.implicit && !advertised.iter().any(|a| a.same_endpoint(&server.addr)) {
                if let Some(removed) = self.servers.remove(index) {
                    delta.removed.push(removed.addr);
                }
            } else {
                index += 1;
            }
        }

        for addr in advertised {
            if !self.servers.iter().any(|s| s.addr.same_endpoint(&addr)) {
                delta.added.push(addr.clone());
                self.servers.push_back(Server::new(addr, true));
            }
        }

        if self.randomize && !delta.added.is_empty() && self.servers.len() > 2 {
            self.servers.make_contiguous()[1..].shuffle(&mut rand::rng());
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn addr(url: &str) -> ServerAddr { url.parse().expect("valid url") }

    fn list(urls: &[&str]) -> ServerList {
        ServerList::new(urls.iter().map(|u| addr(u)).collect(), false).expect("non-empty")
    }

    fn hosts(list: &ServerList) -> Vec<String> {
        list.iter().map(|s| s.addr().to_string()).collect()
    }

    #[rstest]
    #[case("nats://localhost:4223", "localhost", 4223, false)]
    #[case("tls://example.com", "example.com", DEFAULT_PORT, true)]
    #[case("127.0.0.1:5000", "127.0.0.1", 5000, false)]
    #[case("nats://[::1]:4222", "::1", 4222, false)]
    fn urls_are_parsed(
        #[case] input: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] tls: bool,
    ) {
        let parsed = addr(input);
        assert_eq!(parsed.host(), host);
        assert_eq!(parsed.port(), port);
        assert_eq!(parsed.is_tls(), tls);
    }

    #[rstest]
    #[case("http://localhost")]
    #[case("nats://")]
    #[case("nats://:pw@localhost")]
    fn bad_urls_are_rejected(#[case] input: &str) {
        assert!(matches!(
            input.parse::<ServerAddr>(),
            Err(ClientError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn url_credentials_are_extracted() {
        let with_pass = addr("nats://derek:pw@localhost");
        let creds = with_pass.credentials().expect("credentials");
        assert_eq!(creds.user.as_deref(), Some("derek"));
        assert_eq!(creds.pass.as_deref(), Some("pw"));

        let with_token = addr("nats://s3cr3t@localhost");
        let creds = with_token.credentials().expect("credentials");
        assert_eq!(creds.auth_token.as_deref(), Some("s3cr3t"));
        assert_eq!(with_token.to_string(), "nats://localhost:4222");
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(
            ServerList::new(Vec::new(), true),
            Err(ClientError::NoServers)
        ));
    }

    #[test]
    fn rotation_moves_current_to_back() {
        let mut servers = list(&["nats://a:1", "nats://b:2"]);
        let next = servers.rotate(false, None).expect("server");
        assert_eq!(next.addr().host(), "b");
        assert_eq!(hosts(&servers), ["nats://b:2", "nats://a:1"]);
    }

    #[test]
    fn dropped_server_is_forgotten() {
        let mut servers = list(&["nats://a:1", "nats://b:2"]);
        servers.rotate(true, None);
        assert_eq!(hosts(&servers), ["nats://b:2"]);
        assert!(servers.rotate(true, None).is_none());
        assert!(servers.is_empty());
    }

    #[test]
    fn exhausted_servers_are_pruned() {
        let mut servers = list(&["nats://a:1"]);
        servers.record_attempt();
        servers.record_attempt();
        assert!(servers.rotate(false, Some(3)).is_some());
        servers.record_attempt();
        assert!(servers.rotate(false, Some(3)).is_none());
    }

    #[test]
    fn connecting_resets_attempts() {
        let mut servers = list(&["nats://a:1"]);
        assert!(servers.current().is_some_and(Server::is_untried));
        servers.record_attempt();
        servers.mark_connected();
        let current = servers.current().expect("server");
        assert!(current.did_connect());
        assert_eq!(current.attempts(), 0);
        assert!(!current.is_untried());
    }

    #[test]
    fn gossip_adds_and_removes_implicit_servers() {
        let mut servers = list(&["nats://seed:4222"]);
        let delta = servers.apply_connect_urls(&["p1:4222".into(), "p2:4222".into()], false);
        assert_eq!(delta.added.len(), 2);
        assert!(delta.removed.is_empty());
        assert!(servers.iter().skip(1).all(Server::is_implicit));

        let delta = servers.apply_connect_urls(&["p2:4222".into()], false);
        assert_eq!(delta.removed, vec![addr("nats://p1:4222")]);
        assert_eq!(hosts(&servers), ["nats://seed:4222", "nats://p2:4222"]);
    }

    #[test]
    fn gossip_never_removes_configured_or_current_servers() {
        let mut servers = list(&["nats://seed:4222", "nats://other:4222"]);
        servers.apply_connect_urls(&["p1:4222".into()], false);
        servers.rotate(false, None);
        servers.rotate(false, None);
        assert_eq!(servers.current().map(|s| s.addr().host()), Some("p1"));

        let delta = servers.apply_connect_urls(&[], false);
        assert!(delta.is_empty());
        assert_eq!(servers.len(), 3);
    }

    #[test]
    fn gossip_uses_tls_scheme_when_required() {
        let mut servers = list(&["tls://seed:4222"]);
        let delta = servers.apply_connect_urls(&["peer:4443".into()], true);
        assert!(delta.added[0].is_tls());
    }

    #[test]
    fn randomized_additions_stay_behind_current() {
        let mut servers = ServerList::new(vec![addr("nats://seed:4222")], true).expect("list");
        let peers: Vec<String> = (0..20).map(|i| format!("p{i}:4222")).collect();
        servers.apply_connect_urls(&peers, false);
        assert_eq!(servers.current().map(|s| s.addr().host()), Some("seed"));
        assert_eq!(servers.len(), 21);
    }
}
