// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The embedded HTTP listener.
//!
//! URI prefixes are registered on endpoints keyed by address and port.
//! Incoming requests dispatch to the registered target whose host matches
//! and whose path is the longest prefix of the request path; ties go to
//! the earliest registration. Websocket upgrade requests are handed to
//! the server handshake and then driven through the registered
//! [`BehaviorHost`]; other requests go to the [`HttpHandler`].
//!
//! The registry holds only weak references to hosts, so dropping the last
//! application handle deregisters promptly.

pub mod prefix;
pub mod transport;

pub use prefix::{InvalidPrefix, UriPrefix};
pub use transport::{TlsAcceptor, TlsInfo, Transport};

use crate::connection::{CloseReason, Error as ConnectionError, Phase};
use crate::data::{ByteSlice125, Incoming};
use crate::extension::Extension;
use crate::handler::{BehaviorHost, Command, ErrorPolicy, HttpHandler, Session};
use crate::handshake::{self, server::Response as HandshakeResponse};
use crate::http::auth::{Authenticator, DigestState, Verdict};
use crate::http::{request, Error as HttpError, Response};
use bytes::BytesMut;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::{TcpListener as TokioTcpListener, TcpSocket};
use tokio_util::compat::TokioAsyncReadCompatExt;

/// Produces fresh per-connection extension instances (e.g. one
/// permessage-deflate per accepted connection).
pub type ExtensionFactory = Arc<dyn Fn() -> Vec<Box<dyn Extension + Send>> + Send + Sync>;

/// Listener timeouts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Read timeout for the first request of a connection.
    pub first_request_timeout: Duration,
    /// Read timeout for subsequent requests of a kept-alive connection.
    pub request_timeout: Duration,
    /// Timeout for completing the websocket opening handshake.
    pub handshake_timeout: Duration,
    /// Grace period awaiting the peer's close frame.
    pub close_grace: Duration,
    /// Interval of liveness pings on accepted sessions. A ping that is
    /// not answered by any pong before the next ping is due closes the
    /// session with 1011. `None` disables pinging.
    pub ping_interval: Option<Duration>
}

impl Default for Config {
    fn default() -> Self {
        Config {
            first_request_timeout: Duration::from_secs(90),
            request_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(5),
            ping_interval: None
        }
    }
}

/// Options for one prefix registration.
pub struct PrefixOptions {
    behavior: Option<Arc<dyn BehaviorHost>>,
    http: Option<Arc<dyn HttpHandler>>,
    auth: Arc<Authenticator>,
    protocols: Vec<String>,
    extensions: Option<ExtensionFactory>,
    reuse_address: bool
}

impl Default for PrefixOptions {
    fn default() -> Self {
        PrefixOptions::new()
    }
}

impl PrefixOptions {
    /// Empty options: no hosts, no authentication.
    pub fn new() -> Self {
        PrefixOptions {
            behavior: None,
            http: None,
            auth: Arc::new(Authenticator::open()),
            protocols: Vec::new(),
            extensions: None,
            reuse_address: false
        }
    }

    /// Attach a websocket behavior host.
    ///
    /// The registry keeps only a weak reference; the caller owns the host.
    pub fn with_behavior(mut self, host: &Arc<dyn BehaviorHost>) -> Self {
        self.behavior = Some(host.clone());
        self
    }

    /// Attach an HTTP handler for non-upgrade requests.
    pub fn with_http(mut self, handler: &Arc<dyn HttpHandler>) -> Self {
        self.http = Some(handler.clone());
        self
    }

    /// Require authentication for this prefix.
    pub fn with_auth(mut self, auth: Authenticator) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    /// Subprotocols the websocket endpoint supports.
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Extensions to offer on accepted connections.
    pub fn with_extensions(mut self, factory: ExtensionFactory) -> Self {
        self.extensions = Some(factory);
        self
    }

    /// Set `SO_REUSEADDR` on the endpoint socket.
    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }
}

struct Registration {
    prefix: UriPrefix,
    behavior: Option<Weak<dyn BehaviorHost>>,
    http: Option<Weak<dyn HttpHandler>>,
    auth: Arc<Authenticator>,
    protocols: Vec<String>,
    extensions: Option<ExtensionFactory>,
    seq: u64
}

struct Endpoint {
    secure: bool,
    reuse_address: bool,
    registrations: Vec<Registration>
}

/// A dispatch target resolved for one request.
struct Target {
    behavior: Option<Arc<dyn BehaviorHost>>,
    http: Option<Arc<dyn HttpHandler>>,
    auth: Arc<Authenticator>,
    protocols: Vec<String>,
    extensions: Option<ExtensionFactory>
}

/// The embedded HTTP listener and endpoint registry.
///
/// Create one long-lived instance, register prefixes, then [`Listener::start`]
/// the accept loops. There is no ambient global state; the listener handle
/// owns the registry.
pub struct Listener {
    config: Config,
    endpoints: Mutex<HashMap<IpAddr, HashMap<u16, Endpoint>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    tls: Mutex<Option<Arc<dyn TlsAcceptor>>>,
    next_seq: AtomicU64
}

impl Default for Listener {
    fn default() -> Self {
        Listener::new()
    }
}

impl Listener {
    /// Create a listener with default timeouts.
    pub fn new() -> Self {
        Listener::with_config(Config::default())
    }

    /// Create a listener with the given timeouts.
    pub fn with_config(config: Config) -> Self {
        Listener {
            config,
            endpoints: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            tls: Mutex::new(None),
            next_seq: AtomicU64::new(0)
        }
    }

    /// Install the TLS acceptor used by secure (`https`/`wss`) endpoints.
    ///
    /// Without one, secure endpoints refuse connections.
    pub fn set_tls_acceptor(&self, acceptor: Arc<dyn TlsAcceptor>) {
        *self.tls.lock().unwrap_or_else(|e| e.into_inner()) = Some(acceptor)
    }

    fn tls_acceptor(&self) -> Option<Arc<dyn TlsAcceptor>> {
        self.tls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register a URI prefix.
    ///
    /// The prefix host is resolved to the endpoint address: IP literals
    /// bind directly, `*` and `+` bind the wildcard address and other
    /// names resolve via DNS (falling back to the wildcard address with a
    /// warning if resolution fails). Registering the same prefix on the
    /// same endpoint again is a no-op.
    pub async fn add_prefix(&self, input: &str, options: PrefixOptions) -> Result<UriPrefix, Error> {
        let prefix = UriPrefix::parse(input)?;
        let addr = resolve_host(prefix.host(), prefix.port()).await;

        let mut endpoints = self.lock_endpoints();
        let endpoint = endpoints
            .entry(addr)
            .or_default()
            .entry(prefix.port())
            .or_insert_with(|| Endpoint {
                secure: prefix.is_secure(),
                reuse_address: options.reuse_address,
                registrations: Vec::new()
            });

        if endpoint.secure != prefix.is_secure() {
            return Err(Error::SchemeMismatch(prefix))
        }
        if endpoint.registrations.iter().any(|r| r.prefix == prefix) {
            trace!("prefix {} already registered", prefix);
            return Ok(prefix)
        }

        endpoint.registrations.push(Registration {
            prefix: prefix.clone(),
            behavior: options.behavior.as_ref().map(Arc::downgrade),
            http: options.http.as_ref().map(Arc::downgrade),
            auth: options.auth,
            protocols: options.protocols,
            extensions: options.extensions,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed)
        });
        debug!("registered prefix {}", prefix);
        Ok(prefix)
    }

    /// Remove a previously registered prefix. Unknown prefixes are a no-op.
    pub fn remove_prefix(&self, prefix: &UriPrefix) {
        let mut endpoints = self.lock_endpoints();
        for ports in endpoints.values_mut() {
            for endpoint in ports.values_mut() {
                endpoint.registrations.retain(|r| r.prefix != *prefix)
            }
        }
    }

    /// Bind all endpoints and spawn their accept loops.
    ///
    /// Returns the bound socket addresses (useful with port 0).
    pub async fn start(self: &Arc<Self>) -> Result<Vec<SocketAddr>, Error> {
        let keys: Vec<(IpAddr, u16, bool, bool)> = {
            let endpoints = self.lock_endpoints();
            endpoints.iter()
                .flat_map(|(addr, ports)| {
                    ports.iter().map(move |(port, e)| (*addr, *port, e.reuse_address, e.secure))
                })
                .collect()
        };

        let mut bound = Vec::new();
        for (addr, port, reuse, secure) in keys {
            let tcp = bind_socket(SocketAddr::new(addr, port), reuse)?;
            let local = tcp.local_addr()?;
            debug!("listening on {}", local);
            bound.push(local);
            let listener = self.clone();
            let handle = tokio::spawn(accept_loop(listener, tcp, (addr, port), secure));
            self.lock_tasks().push(handle)
        }
        Ok(bound)
    }

    /// Stop all accept loops. Established connections wind down on their
    /// own when their sockets close.
    pub fn shutdown(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort()
        }
        self.lock_endpoints().clear()
    }

    /// Resolve the dispatch target for a request on the given endpoint.
    ///
    /// Candidates must match the request host and have a path that
    /// prefixes the request path; the longest path wins and ties break
    /// towards the earliest registration. Registrations whose hosts have
    /// been dropped are pruned.
    fn lookup(&self, key: (IpAddr, u16), host: &str, path: &str) -> Option<Target> {
        let mut endpoints = self.lock_endpoints();
        let endpoint = endpoints.get_mut(&key.0)?.get_mut(&key.1)?;

        endpoint.registrations.retain(|r| {
            let behavior_dead = matches!(&r.behavior, Some(w) if w.strong_count() == 0);
            let http_dead = matches!(&r.http, Some(w) if w.strong_count() == 0);
            let any_set = r.behavior.is_some() || r.http.is_some();
            let all_dead = any_set
                && (r.behavior.is_none() || behavior_dead)
                && (r.http.is_none() || http_dead);
            if all_dead {
                debug!("pruning dead registration {}", r.prefix);
            }
            !all_dead
        });

        endpoint.registrations.iter()
            .filter(|r| r.prefix.host_matches(host) && r.prefix.path_matches(path))
            .min_by_key(|r| (std::cmp::Reverse(r.prefix.specificity()), r.seq))
            .map(|r| Target {
                behavior: r.behavior.as_ref().and_then(Weak::upgrade),
                http: r.http.as_ref().and_then(Weak::upgrade),
                auth: r.auth.clone(),
                protocols: r.protocols.clone(),
                extensions: r.extensions.clone()
            })
    }

    fn lock_endpoints(&self) -> std::sync::MutexGuard<'_, HashMap<IpAddr, HashMap<u16, Endpoint>>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resolve a prefix host to the address its endpoint binds.
async fn resolve_host(host: &str, port: u16) -> IpAddr {
    if host == "*" || host == "+" {
        return IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
    if let Ok(ip) = host.parse() {
        return ip
    }
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(a) => a.ip(),
            None => {
                warn!("no address for host {:?}; binding wildcard address", host);
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        },
        Err(e) => {
            warn!("resolving {:?} failed ({}); binding wildcard address", host, e);
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }
}

fn bind_socket(addr: SocketAddr, reuse_address: bool) -> io::Result<TokioTcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    if reuse_address {
        socket.set_reuseaddr(true)?
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn accept_loop(listener: Arc<Listener>, tcp: TokioTcpListener, key: (IpAddr, u16), secure: bool) {
    loop {
        match tcp.accept().await {
            Ok((stream, peer)) => {
                trace!("accepted connection from {}", peer);
                let listener = listener.clone();
                if secure {
                    let Some(acceptor) = listener.tls_acceptor() else {
                        warn!("secure endpoint without TLS acceptor; dropping {}", peer);
                        continue
                    };
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(io) => serve_connection(listener, key, io, peer).await,
                            Err(e) => debug!("{}: TLS accept failed: {}", peer, e)
                        }
                    });
                } else {
                    tokio::spawn(async move {
                        let io = Transport::new(stream.compat());
                        serve_connection(listener, key, io, peer).await
                    });
                }
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await
            }
        }
    }
}

/// Drive one accepted connection: read requests, dispatch, keep alive
/// or upgrade to a websocket session.
async fn serve_connection(
    listener: Arc<Listener>,
    key: (IpAddr, u16),
    mut io: Transport,
    peer: SocketAddr
) {
    let config = listener.config.clone();
    let mut buffer = BytesMut::new();
    let mut digest = DigestState::default();
    let mut first = true;

    loop {
        let limit = if first { config.first_request_timeout } else { config.request_timeout };
        first = false;

        let head = match tokio::time::timeout(limit, request::read_head(&mut io, &mut buffer)).await {
            Err(_) => {
                trace!("{}: request read timed out", peer);
                return
            }
            Ok(Ok(None)) => return,
            Ok(Ok(Some(head))) => head,
            Ok(Err(HttpError::RequestTooLarge)) => {
                let _ = Response::text(400, "request too large").write_to(&mut io, false).await;
                return
            }
            Ok(Err(e)) => {
                debug!("{}: bad request: {}", peer, e);
                let _ = Response::new(400).write_to(&mut io, false).await;
                return
            }
        };

        let keep_alive = head.keep_alive();

        let host = match head.host() {
            Some(h) => h.to_string(),
            None => {
                let _ = Response::text(400, "missing Host header").write_to(&mut io, false).await;
                return
            }
        };

        let target = match listener.lookup(key, &host, head.path()) {
            Some(t) => t,
            None => {
                if !answer(head, &mut io, &mut buffer, Response::new(404), keep_alive).await {
                    return
                }
                continue
            }
        };

        // Authentication precedes dispatch.
        let authorization = head.headers().get("authorization").map(str::to_string);
        match target.auth.verify(authorization.as_deref(), head.method(), &mut digest) {
            Verdict::Accepted { .. } => {}
            verdict => {
                let stale = matches!(verdict, Verdict::Stale);
                let mut response = Response::new(401);
                for challenge in target.auth.challenges(&mut digest, stale) {
                    response.add_challenge(&challenge)
                }
                if !answer(head, &mut io, &mut buffer, response, keep_alive).await {
                    return
                }
                continue
            }
        }

        if head.is_upgrade() {
            if let Some(behavior) = target.behavior.clone() {
                handle_upgrade(&listener, &target, behavior, head, io, buffer, peer).await;
                return
            }
            if !answer(head, &mut io, &mut buffer, Response::new(400), keep_alive).await {
                return
            }
            continue
        }

        let request = match request::read_body(head, &mut io, &mut buffer).await {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: bad request body: {}", peer, e);
                let _ = Response::new(400).write_to(&mut io, false).await;
                return
            }
        };

        let response = match &target.http {
            Some(handler) => handler.handle(&request),
            None => Response::new(404)
        };
        let keep = keep_alive && !response.is_close();
        if response.write_to(&mut io, keep).await.is_err() || !keep {
            return
        }
    }
}

/// Consume the request body, write `response` and decide whether the
/// connection continues.
async fn answer(
    head: request::RequestHead,
    io: &mut Transport,
    buffer: &mut BytesMut,
    response: Response,
    keep_alive: bool
) -> bool {
    if request::read_body(head, io, buffer).await.is_err() {
        let _ = Response::new(400).write_to(io, false).await;
        return false
    }
    response.write_to(io, keep_alive).await.is_ok() && keep_alive
}

/// Perform the websocket upgrade and drive the session until it closes.
async fn handle_upgrade(
    listener: &Arc<Listener>,
    target: &Target,
    behavior: Arc<dyn BehaviorHost>,
    head: request::RequestHead,
    io: Transport,
    buffer: BytesMut,
    peer: SocketAddr
) {
    let config = &listener.config;

    let tls = io.tls_info().cloned();
    let mut server = handshake::Server::new(io);
    let mut seed = BytesMut::from(head.raw());
    seed.extend_from_slice(&buffer);
    server.set_buffer(seed);
    for p in &target.protocols {
        server.add_protocol(p);
    }
    if let Some(factory) = &target.extensions {
        for e in factory() {
            server.add_extension(e);
        }
    }

    let request = match server.decode_buffered() {
        Ok(Some(r)) => r,
        Ok(None) => {
            let _ = server.send_response(&HandshakeResponse::Reject { status_code: 400 }).await;
            return
        }
        Err(e) => {
            debug!("{}: handshake rejected: {}", peer, e);
            let reject = HandshakeResponse::Reject { status_code: e.status_code() };
            let _ = server.send_response(&reject).await;
            return
        }
    };

    // First client-listed mutually supported protocol wins.
    let protocol = request.protocols().next().map(String::from);
    let path = request.path().to_string();
    let cookies = request.cookies().to_vec();
    let key = request.into_key();

    let accept = HandshakeResponse::Accept { key: &key, protocol: protocol.as_deref() };
    match tokio::time::timeout(config.handshake_timeout, server.send_response(&accept)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!("{}: handshake response failed: {}", peer, e);
            return
        }
        Err(_) => {
            debug!("{}: handshake timed out", peer);
            return
        }
    }

    let (mut sender, mut receiver) = server.into_builder().finish();
    let (session, mut commands) = Session::new(peer, path, protocol, cookies, tls);
    session.set_phase(Phase::Open);
    behavior.on_open(&session);

    // Liveness pings with a monotonically increasing payload. A ping
    // that sees no pong at all before the next one is due gives up.
    if let Some(interval) = config.ping_interval {
        let session = session.clone();
        tokio::spawn(async move {
            let mut counter: u64 = 0;
            let mut last_sent = None;
            loop {
                tokio::time::sleep(interval).await;
                if session.phase() == Phase::Closed {
                    break
                }
                if let Some(t) = last_sent {
                    if !session.pong_since(t) {
                        debug!("liveness ping unanswered; closing");
                        let _ = session.close_with(1011, "ping timeout");
                        break
                    }
                }
                counter += 1;
                if session.send_ping(counter.to_be_bytes().to_vec()).is_err() {
                    break
                }
                last_sent = Some(std::time::Instant::now())
            }
        });
    }

    // Outbound writer: drains the session queue in send-call order and
    // terminates after a close frame has been written.
    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let result = match command {
                Command::Text(t) => match sender.send_text(&t).await {
                    Ok(()) => sender.flush().await,
                    e => e
                },
                Command::Binary(b) => match sender.send_binary(&b).await {
                    Ok(()) => sender.flush().await,
                    e => e
                },
                Command::Ping(p) => match ByteSlice125::try_from(&p[..]) {
                    Ok(payload) => match sender.send_ping(payload).await {
                        Ok(()) => sender.flush().await,
                        e => e
                    },
                    Err(_) => {
                        debug!("dropping oversized ping payload");
                        continue
                    }
                },
                Command::Close { code, reason } => {
                    let _ = sender.close_with(code, &reason).await;
                    break
                }
            };
            if result.is_err() {
                break
            }
        }
    });

    // Inbound reader: delivers messages in wire order and completes the
    // close handshake, bounded by the close grace period once a local
    // close has been requested.
    let reason = read_session(listener, &session, behavior.as_ref(), &mut receiver).await;

    session.set_phase(Phase::Closed);
    let (code, reason_text) = match &reason {
        Some(r) => (r.code, r.reason.as_deref()),
        None => (1006, None)
    };
    behavior.on_close(&session, code, reason_text);
    writer.abort();
}

async fn read_session(
    listener: &Arc<Listener>,
    session: &Session,
    behavior: &dyn BehaviorHost,
    receiver: &mut crate::connection::Receiver<Transport>
) -> Option<CloseReason> {
    let grace = listener.config.close_grace;
    let mut close_on_error_sent = false;
    loop {
        let incoming = if session.is_close_requested() {
            match tokio::time::timeout(grace, receiver.receive()).await {
                Err(_) => {
                    debug!("close grace period expired");
                    return None
                }
                Ok(r) => r
            }
        } else {
            receiver.receive().await
        };

        match incoming {
            Ok(Incoming::Data(d)) => behavior.on_message(session, d),
            Ok(Incoming::Ping(p)) => behavior.on_ping(session, &p),
            Ok(Incoming::Pong(p)) => {
                session.note_pong();
                behavior.on_pong(session, &p)
            }
            Ok(Incoming::Closed(reason)) => {
                return reason.or(Some(CloseReason { code: 1005, reason: None }))
            }
            Err(ConnectionError::Closed) => return None,
            Err(e) => {
                session.set_error(e.to_string());
                if close_on_error_sent {
                    // The stream did not recover while awaiting the
                    // peer's close; give up.
                    return None
                }
                match behavior.on_error(session, &e) {
                    ErrorPolicy::Continue => continue,
                    ErrorPolicy::Drop => return None,
                    ErrorPolicy::CloseWithError => {
                        let _ = session.close_with(close_code_for(&e), "");
                        close_on_error_sent = true;
                        continue
                    }
                }
            }
        }
    }
}

/// The close code reflecting a connection error.
fn close_code_for(e: &ConnectionError) -> u16 {
    match e {
        ConnectionError::Codec(crate::base::Error::PayloadTooLarge { .. }) => 1009,
        ConnectionError::Codec(_) => 1002,
        ConnectionError::UnexpectedOpCode(_) | ConnectionError::UnexpectedRsv1 => 1002,
        ConnectionError::Utf8(_) => 1007,
        ConnectionError::MessageTooLarge { .. } => 1009,
        _ => 1011
    }
}

/// Listener errors.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The prefix string did not validate.
    #[error(transparent)]
    InvalidPrefix(#[from] InvalidPrefix),

    /// The prefix scheme disagrees with the endpoint it maps to.
    #[error("prefix {0} disagrees with the endpoint security setting")]
    SchemeMismatch(UriPrefix),

    /// An I/O error has been encountered.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error)
}

#[cfg(test)]
mod tests {
    use crate::data::Data;
    use crate::handler::{BehaviorHost, Session};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use super::{Listener, PrefixOptions};

    struct Null;

    impl BehaviorHost for Null {
        fn on_message(&self, _: &Session, _: Data) {}
    }

    fn host() -> Arc<dyn BehaviorHost> {
        Arc::new(Null)
    }

    #[tokio::test]
    async fn longest_path_wins() {
        let listener = Listener::new();
        let shallow = host();
        let deep = host();
        listener.add_prefix("http://127.0.0.1:8080/", PrefixOptions::new().with_behavior(&shallow)).await.unwrap();
        listener.add_prefix("http://127.0.0.1:8080/chat/", PrefixOptions::new().with_behavior(&deep)).await.unwrap();

        let key = (IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
        let t = listener.lookup(key, "127.0.0.1", "/chat/room").unwrap();
        assert!(Arc::ptr_eq(&t.behavior.unwrap(), &deep));

        let t = listener.lookup(key, "127.0.0.1", "/other").unwrap();
        assert!(Arc::ptr_eq(&t.behavior.unwrap(), &shallow))
    }

    #[tokio::test]
    async fn ties_break_to_earliest_registration() {
        let listener = Listener::new();
        let first = host();
        let second = host();
        // `*` and `+` both bind the wildcard address, so the prefixes share
        // one endpoint and both match any host.
        listener.add_prefix("http://*/chat/", PrefixOptions::new().with_behavior(&first)).await.unwrap();
        listener.add_prefix("http://+/chat/", PrefixOptions::new().with_behavior(&second)).await.unwrap();

        let key = (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 80);
        let t = listener.lookup(key, "whatever", "/chat/").unwrap();
        assert!(Arc::ptr_eq(&t.behavior.unwrap(), &first))
    }

    #[tokio::test]
    async fn duplicate_registration_is_noop() {
        let listener = Listener::new();
        let a = host();
        let b = host();
        listener.add_prefix("http://127.0.0.1/x/", PrefixOptions::new().with_behavior(&a)).await.unwrap();
        listener.add_prefix("http://127.0.0.1/x/", PrefixOptions::new().with_behavior(&b)).await.unwrap();

        let key = (IpAddr::V4(Ipv4Addr::LOCALHOST), 80);
        let t = listener.lookup(key, "127.0.0.1", "/x/").unwrap();
        assert!(Arc::ptr_eq(&t.behavior.unwrap(), &a))
    }

    #[tokio::test]
    async fn dead_hosts_are_pruned() {
        let listener = Listener::new();
        let transient = host();
        listener.add_prefix("http://127.0.0.1/x/", PrefixOptions::new().with_behavior(&transient)).await.unwrap();
        drop(transient);

        let key = (IpAddr::V4(Ipv4Addr::LOCALHOST), 80);
        assert!(listener.lookup(key, "127.0.0.1", "/x/").is_none())
    }

    #[tokio::test]
    async fn no_match_yields_none() {
        let listener = Listener::new();
        let h = host();
        listener.add_prefix("http://127.0.0.1/chat/", PrefixOptions::new().with_behavior(&h)).await.unwrap();
        let key = (IpAddr::V4(Ipv4Addr::LOCALHOST), 80);
        assert!(listener.lookup(key, "127.0.0.1", "/elsewhere").is_none());
        assert!(listener.lookup(key, "other.host", "/chat/").is_none())
    }
}
