//! Scripted in-process NATS server for integration tests.
//!
//! [`MockServer`] speaks enough of the protocol for a client to connect,
//! subscribe, publish and request over real TCP. Tests can rewrite the
//! `INFO` it advertises, inject raw frames, stop answering pings, kill every
//! connection and restart on the same port. Every control line a client
//! sends is recorded in order.

use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{BufMut, Bytes, BytesMut};
use natwire::ServerInfo;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{Notify, mpsc},
    task::JoinHandle,
    time,
};

const NO_RESPONDERS_HEADERS: &[u8] = b"NATS/1.0 503\r\n\r\n";

enum Outgoing {
    Frame(Bytes),
    Kill,
}

#[derive(Debug)]
struct Sub {
    conn: u64,
    sid: u64,
    subject: String,
    queue: Option<String>,
    max: Option<u64>,
    delivered: u64,
}

struct Conn {
    sender: mpsc::UnboundedSender<Outgoing>,
    echo: bool,
    headers: bool,
    no_responders: bool,
}

#[derive(Default)]
struct State {
    info: Mutex<ServerInfo>,
    conns: Mutex<HashMap<u64, Conn>>,
    subs: Mutex<Vec<Sub>>,
    ops: Mutex<Vec<String>>,
    connects: Mutex<Vec<serde_json::Value>>,
    next_conn: AtomicU64,
    queue_cursor: AtomicU64,
    silent_pings: AtomicBool,
    changed: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Whether `subject` matches the subscription `pattern`, which may use `*`
/// for one token and a trailing `>` for one or more.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Handle to a running mock server.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    accept: JoinHandle<()>,
}

impl MockServer {
    /// Start on a free localhost port with a default `INFO`.
    ///
    /// # Errors
    ///
    /// Returns any error from binding the listener.
    pub async fn start() -> io::Result<Self> { Self::start_with(default_info()).await }

    /// Start on a free localhost port advertising `info`.
    ///
    /// # Errors
    ///
    /// Returns any error from binding the listener.
    pub async fn start_with(info: ServerInfo) -> io::Result<Self> {
        Self::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0), info).await
    }

    /// Start on `addr` advertising `info`.
    ///
    /// # Errors
    ///
    /// Returns any error from binding the listener.
    pub async fn bind(addr: SocketAddr, mut info: ServerInfo) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info.port = addr.port();
        let state = Arc::new(State {
            info: Mutex::new(info),
            ..State::default()
        });
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        Ok(Self {
            addr,
            state,
            accept,
        })
    }

    /// Stop this server and start a fresh one on the same port with the
    /// same `INFO`. Recorded operations are not carried over.
    ///
    /// # Errors
    ///
    /// Returns any error from binding the listener again.
    pub async fn restart(self) -> io::Result<Self> {
        let info = lock(&self.state.info).clone();
        let addr = self.addr;
        self.stop().await;
        Self::bind(addr, info).await
    }

    /// Stop accepting and close every connection.
    pub async fn stop(mut self) {
        self.accept.abort();
        let _ = (&mut self.accept).await;
        self.kill_connections();
    }

    /// Listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// `nats://` URL of this server.
    #[must_use]
    pub fn url(&self) -> String { format!("nats://{}", self.addr) }

    /// Rewrite the `INFO` sent to future connections.
    pub fn update_info(&self, update: impl FnOnce(&mut ServerInfo)) { update(&mut *lock(&self.state.info)); }

    /// Send `info` to every connected client.
    ///
    /// # Panics
    ///
    /// Panics if `info` cannot be serialized.
    pub fn send_info(&self, info: &ServerInfo) {
        let json = serde_json::to_string(info).expect("serialize info");
        self.inject(format!("INFO {json}\r\n"));
    }

    /// Write raw bytes to every connected client.
    pub fn inject(&self, raw: impl Into<Bytes>) {
        let raw = raw.into();
        for conn in lock(&self.state.conns).values() {
            let _ = conn.sender.send(Outgoing::Frame(raw.clone()));
        }
    }

    /// Stop or resume answering client pings.
    pub fn answer_pings(&self, answer: bool) { self.state.silent_pings.store(!answer, Ordering::SeqCst); }

    /// Drop every client connection. The listener keeps running.
    pub fn kill_connections(&self) {
        for (_, conn) in lock(&self.state.conns).drain() {
            let _ = conn.sender.send(Outgoing::Kill);
        }
        lock(&self.state.subs).clear();
        self.state.changed.notify_waiters();
    }

    /// Number of connected clients.
    #[must_use]
    pub fn connections(&self) -> usize { lock(&self.state.conns).len() }

    /// Number of live subscriptions across all clients.
    #[must_use]
    pub fn subscriptions(&self) -> usize { lock(&self.state.subs).len() }

    /// Every control line received so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<String> { lock(&self.state.ops).clone() }

    /// Bodies of every `CONNECT` received so far.
    #[must_use]
    pub fn connects(&self) -> Vec<serde_json::Value> { lock(&self.state.connects).clone() }

    /// Wait until a recorded control line satisfies `predicate`.
    pub async fn wait_for_op(
        &self,
        predicate: impl Fn(&str) -> bool,
        timeout: Duration,
    ) -> Option<String> {
        self.wait_until(timeout, || {
            lock(&self.state.ops)
                .iter()
                .find(|op| predicate(op))
                .cloned()
        })
        .await
    }

    /// Wait until `count` clients are connected.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || (self.connections() >= count).then_some(()))
            .await
            .is_some()
    }

    /// Wait until `count` subscriptions are live.
    pub async fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || (self.subscriptions() >= count).then_some(()))
            .await
            .is_some()
    }

    async fn wait_until<T>(&self, timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = time::Instant::now() + timeout;
        loop {
            let notified = self.state.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(found) = check() {
                return Some(found);
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return check();
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
        for (_, conn) in lock(&self.state.conns).drain() {
            let _ = conn.sender.send(Outgoing::Kill);
        }
    }
}

/// `INFO` advertised by [`MockServer::start`]: headers on, 1 MiB payloads.
#[must_use]
pub fn default_info() -> ServerInfo {
    ServerInfo {
        server_id: "MOCK".into(),
        server_name: "mock".into(),
        version: "2.10.0".into(),
        host: "127.0.0.1".into(),
        headers: true,
        max_payload: 1024 * 1024,
        proto: 1,
        ..ServerInfo::default()
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>) {
    while let Ok((stream, _)) = listener.accept().await {
        let id = state.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(serve_conn(stream, id, Arc::clone(&state)));
    }
}

async fn serve_conn(stream: TcpStream, id: u64, state: Arc<State>) {
    let (reader, mut writer) = stream.into_split();
    let (sender, mut outgoing) = mpsc::unbounded_channel();

    let mut info = lock(&state.info).clone();
    info.client_id = id;
    let Ok(json) = serde_json::to_string(&info) else {
        return;
    };
    let _ = sender.send(Outgoing::Frame(format!("INFO {json}\r\n").into()));
    lock(&state.conns).insert(
        id,
        Conn {
            sender,
            echo: true,
            headers: false,
            no_responders: false,
        },
    );
    state.changed.notify_waiters();

    let writer_task = tokio::spawn(async move {
        while let Some(out) = outgoing.recv().await {
            match out {
                Outgoing::Frame(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Outgoing::Kill => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut reader = BufReader::new(reader);
    let mut reading = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            let _ = read_loop(&mut reader, id, &state).await;
        }
    });
    tokio::select! {
        _ = &mut reading => {}
        _ = writer_task => reading.abort(),
    }

    lock(&state.conns).remove(&id);
    lock(&state.subs).retain(|sub| sub.conn != id);
    state.changed.notify_waiters();
}

async fn read_loop(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    id: u64,
    state: &State,
) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).trim_end().to_owned();
        let mut parts = text.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
        let rest = parts.next().unwrap_or_default();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let mut payload = None;
        match verb.as_str() {
            "PUB" | "HPUB" => {
                let Some(total) = args.last().and_then(|n| n.parse::<usize>().ok()) else {
                    continue;
                };
                let mut body = vec![0; total + 2];
                reader.read_exact(&mut body).await?;
                body.truncate(total);
                payload = Some(Bytes::from(body));
            }
            _ => {}
        }

        record(state, &text);
        match verb.as_str() {
            "CONNECT" => on_connect(state, id, rest),
            "PING" => {
                if !state.silent_pings.load(Ordering::SeqCst) {
                    send_to(state, id, Bytes::from_static(b"PONG\r\n"));
                }
            }
            "SUB" => on_sub(state, id, &args),
            "UNSUB" => on_unsub(state, id, &args),
            "PUB" => {
                let (subject, reply) = subject_and_reply(&args, 1);
                publish(state, id, subject, reply, None, payload.unwrap_or_default());
            }
            "HPUB" => {
                let (subject, reply) = subject_and_reply(&args, 2);
                let header_len = args
                    .get(args.len().saturating_sub(2))
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or_default();
                let body = payload.unwrap_or_default();
                let header_len = header_len.min(body.len());
                let headers = body.slice(..header_len);
                publish(state, id, subject, reply, Some(headers), body.slice(header_len..));
            }
            _ => {}
        }
    }
}

fn record(state: &State, line: &str) {
    lock(&state.ops).push(line.to_owned());
    state.changed.notify_waiters();
}

fn send_to(state: &State, id: u64, frame: Bytes) {
    if let Some(conn) = lock(&state.conns).get(&id) {
        let _ = conn.sender.send(Outgoing::Frame(frame));
    }
}

fn on_connect(state: &State, id: u64, body: &str) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return;
    };
    if let Some(conn) = lock(&state.conns).get_mut(&id) {
        let flag = |name: &str, default: bool| json.get(name).and_then(serde_json::Value::as_bool).unwrap_or(default);
        conn.echo = flag("echo", true);
        conn.headers = flag("headers", false);
        conn.no_responders = flag("no_responders", false);
    }
    lock(&state.connects).push(json);
}

fn on_sub(state: &State, id: u64, args: &[&str]) {
    let (subject, queue, sid) = match args {
        [subject, sid] => (*subject, None, *sid),
        [subject, queue, sid] => (*subject, Some((*queue).to_owned()), *sid),
        _ => return,
    };
    let Ok(sid) = sid.parse() else {
        return;
    };
    lock(&state.subs).push(Sub {
        conn: id,
        sid,
        subject: subject.to_owned(),
        queue,
        max: None,
        delivered: 0,
    });
}

fn on_unsub(state: &State, id: u64, args: &[&str]) {
    let Some(Ok(sid)) = args.first().map(|sid| sid.parse::<u64>()) else {
        return;
    };
    let max = args.get(1).and_then(|max| max.parse::<u64>().ok());
    let mut subs = lock(&state.subs);
    match max {
        Some(max) => {
            for sub in subs.iter_mut().filter(|sub| sub.conn == id && sub.sid == sid) {
                sub.max = Some(max);
            }
            subs.retain(|sub| !(sub.conn == id && sub.sid == sid && sub.delivered >= max));
        }
        None => subs.retain(|sub| !(sub.conn == id && sub.sid == sid)),
    }
}

fn subject_and_reply<'a>(args: &[&'a str], sizes: usize) -> (&'a str, Option<&'a str>) {
    let subject = args.first().copied().unwrap_or_default();
    let reply = (args.len() == 2 + sizes).then(|| args[1]);
    (subject, reply)
}

fn publish(
    state: &State,
    from: u64,
    subject: &str,
    reply: Option<&str>,
    headers: Option<Bytes>,
    payload: Bytes,
) {
    let mut deliveries = Vec::new();
    {
        let conns = lock(&state.conns);
        let mut subs = lock(&state.subs);
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, sub) in subs.iter().enumerate() {
            if !subject_matches(&sub.subject, subject) {
                continue;
            }
            if sub.conn == from && !conns.get(&from).is_some_and(|conn| conn.echo) {
                continue;
            }
            match &sub.queue {
                Some(queue) => groups.entry(queue.clone()).or_default().push(index),
                None => deliveries.push(index),
            }
        }
        for members in groups.values() {
            let cursor = state.queue_cursor.fetch_add(1, Ordering::SeqCst);
            let pick = usize::try_from(cursor).unwrap_or_default() % members.len();
            deliveries.push(members[pick]);
        }
        deliveries.sort_unstable();

        let mut frames = Vec::new();
        for &index in &deliveries {
            let sub = &mut subs[index];
            sub.delivered += 1;
            frames.push((sub.conn, msg_frame(subject, sub.sid, reply, headers.as_deref(), &payload)));
        }
        subs.retain(|sub| sub.max.is_none_or(|max| sub.delivered < max));
        for (conn, frame) in frames {
            if let Some(conn) = conns.get(&conn) {
                let _ = conn.sender.send(Outgoing::Frame(frame));
            }
        }
    }

    if deliveries.is_empty() {
        let wants_status = lock(&state.conns)
            .get(&from)
            .is_some_and(|conn| conn.headers && conn.no_responders);
        if let (Some(reply), true) = (reply, wants_status) {
            publish(
                state,
                from,
                reply,
                None,
                Some(Bytes::from_static(NO_RESPONDERS_HEADERS)),
                Bytes::new(),
            );
        }
    }
}

fn msg_frame(subject: &str, sid: u64, reply: Option<&str>, headers: Option<&[u8]>, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::new();
    let reply = reply.map(|r| format!(" {r}")).unwrap_or_default();
    match headers {
        Some(headers) => {
            let total = headers.len() + payload.len();
            frame.put_slice(
                format!("HMSG {subject} {sid}{reply} {} {total}\r\n", headers.len()).as_bytes(),
            );
            frame.put_slice(headers);
        }
        None => frame.put_slice(format!("MSG {subject} {sid}{reply} {}\r\n", payload.len()).as_bytes()),
    }
    frame.put_slice(payload);
    frame.put_slice(b"\r\n");
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("foo", "foo", true)]
    #[case("foo.*", "foo.bar", true)]
    #[case("foo.*", "foo.bar.baz", false)]
    #[case("foo.>", "foo.bar.baz", true)]
    #[case("foo.>", "foo", false)]
    #[case("*.bar", "foo.bar", true)]
    #[case("foo", "foo.bar", false)]
    fn wildcard_matching(#[case] pattern: &str, #[case] subject: &str, #[case] expected: bool) {
        assert_eq!(subject_matches(pattern, subject), expected);
    }
}
