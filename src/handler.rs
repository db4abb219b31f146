// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The contracts application code plugs into the listener with: a
//! [`BehaviorHost`] for websocket sessions and an [`HttpHandler`] for
//! plain requests, plus the [`Session`] handle a host uses to talk back.

use crate::connection::{Error as ConnectionError, Phase};
use crate::data::Data;
use crate::http::cookie::Cookie;
use crate::http::{Request, Response};
use crate::listener::TlsInfo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

/// Application-supplied handler for a websocket session.
///
/// Callbacks are invoked by the connection worker in wire order. Pings
/// have already been answered with a matching pong when
/// [`BehaviorHost::on_ping`] fires.
pub trait BehaviorHost: Send + Sync {
    /// The session is open; messages may be sent from now on.
    fn on_open(&self, _session: &Session) {}

    /// A complete (reassembled) text or binary message arrived.
    fn on_message(&self, session: &Session, message: Data);

    /// A ping arrived (the pong has been sent already).
    fn on_ping(&self, _session: &Session, _payload: &[u8]) {}

    /// A pong arrived.
    fn on_pong(&self, _session: &Session, _payload: &[u8]) {}

    /// The session closed with the given code and reason.
    fn on_close(&self, _session: &Session, _code: u16, _reason: Option<&str>) {}

    /// An error occurred; the returned policy decides how to proceed.
    fn on_error(&self, _session: &Session, _error: &ConnectionError) -> ErrorPolicy {
        ErrorPolicy::CloseWithError
    }
}

/// Application-supplied handler for non-upgrade HTTP requests.
pub trait HttpHandler: Send + Sync {
    /// Produce the response for a request.
    fn handle(&self, request: &Request) -> Response;
}

/// What to do after [`BehaviorHost::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Tear the connection down without a close frame.
    Drop,
    /// Send a close frame with a code reflecting the error, then close.
    CloseWithError,
    /// Keep the connection running if the error permits it.
    Continue
}

/// Commands queued from a [`Session`] to the connection writer.
#[derive(Debug)]
pub(crate) enum Command {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Close {
        code: u16,
        reason: String
    }
}

#[derive(Debug)]
struct Shared {
    phase: Phase,
    close_requested: bool,
    error: Option<String>,
    last_pong: Option<Instant>
}

/// Handle to one websocket session.
///
/// Sends are queued and written by the connection worker in call order.
/// The handle can be cloned and used from any thread; [`Session::close`]
/// is idempotent. Sending after a close has been requested fails with
/// [`ConnectionError::InvalidState`].
#[derive(Debug, Clone)]
pub struct Session {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
    remote: SocketAddr,
    path: String,
    protocol: Option<String>,
    cookies: Arc<Vec<Cookie>>,
    tls: Option<Arc<TlsInfo>>
}

impl Session {
    pub(crate) fn new(
        remote: SocketAddr,
        path: String,
        protocol: Option<String>,
        cookies: Vec<Cookie>,
        tls: Option<TlsInfo>
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            phase: Phase::Connecting,
            close_requested: false,
            error: None,
            last_pong: None
        }));
        let session = Session {
            tx,
            shared,
            remote,
            path,
            protocol,
            cookies: Arc::new(cookies),
            tls: tls.map(Arc::new)
        };
        (session, rx)
    }

    /// The peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The request path the session was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The negotiated subprotocol, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The cookies the client sent with the handshake.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Properties of the TLS layer the session runs over, if any.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_deref()
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// The local error record of a failed session, if any.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Queue a text message.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.send(Command::Text(text.into()))
    }

    /// Queue a binary message.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        self.send(Command::Binary(data.into()))
    }

    /// Queue a ping with the given payload (at most 125 bytes).
    pub fn send_ping(&self, payload: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        self.send(Command::Ping(payload.into()))
    }

    /// Request a close with code 1000. Idempotent.
    pub fn close(&self) -> Result<(), ConnectionError> {
        self.close_with(1000, "")
    }

    /// Request a close with the given code and reason. Idempotent.
    pub fn close_with(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        {
            let mut shared = self.lock();
            if shared.close_requested || shared.phase == Phase::Closed {
                return Ok(())
            }
            shared.close_requested = true;
            if shared.phase == Phase::Open {
                shared.phase = Phase::Closing
            }
        }
        self.tx
            .send(Command::Close { code, reason: String::from(reason) })
            .or(Err(ConnectionError::Closed))
    }

    fn send(&self, command: Command) -> Result<(), ConnectionError> {
        {
            let shared = self.lock();
            if shared.close_requested || shared.phase == Phase::Closed {
                return Err(ConnectionError::InvalidState)
            }
        }
        self.tx.send(command).or(Err(ConnectionError::Closed))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase
    }

    pub(crate) fn set_error(&self, error: String) {
        self.lock().error = Some(error)
    }

    pub(crate) fn is_close_requested(&self) -> bool {
        self.lock().close_requested
    }

    /// Record that a pong (solicited or not) arrived.
    pub(crate) fn note_pong(&self) {
        self.lock().last_pong = Some(Instant::now())
    }

    /// Has any pong arrived since `t`?
    pub(crate) fn pong_since(&self, t: Instant) -> bool {
        self.lock().last_pong.map(|p| p >= t).unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use crate::connection::{Error, Phase};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use super::{Command, Session};

    fn session() -> (Session, tokio::sync::mpsc::UnboundedReceiver<Command>) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345);
        Session::new(addr, "/chat".into(), Some("v1".into()), Vec::new(), None)
    }

    #[test]
    fn sends_are_queued_in_order() {
        let (s, mut rx) = session();
        s.set_phase(Phase::Open);
        s.send_text("one").unwrap();
        s.send_binary(vec![2]).unwrap();
        assert_matches!(rx.try_recv(), Ok(Command::Text(t)) if t == "one");
        assert_matches!(rx.try_recv(), Ok(Command::Binary(b)) if b == vec![2])
    }

    #[test]
    fn close_is_idempotent() {
        let (s, mut rx) = session();
        s.set_phase(Phase::Open);
        s.close().unwrap();
        s.close().unwrap();
        s.close_with(1001, "bye").unwrap();
        assert_matches!(rx.try_recv(), Ok(Command::Close { code: 1000, .. }));
        assert_matches!(rx.try_recv(), Err(_))
    }

    #[test]
    fn send_after_close_fails() {
        let (s, _rx) = session();
        s.set_phase(Phase::Open);
        s.close().unwrap();
        assert_matches!(s.send_text("late"), Err(Error::InvalidState))
    }

    #[test]
    fn session_metadata() {
        let (s, _rx) = session();
        assert_eq!(s.path(), "/chat");
        assert_eq!(s.protocol(), Some("v1"));
        assert_eq!(s.phase(), Phase::Connecting);
        assert!(s.error().is_none())
    }
}
