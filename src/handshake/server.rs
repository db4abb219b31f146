// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket server [handshake].
//!
//! [handshake]: https://tools.ietf.org/html/rfc6455#section-4

use crate::connection::{self, Mode};
use crate::extension::Extension;
use crate::http::cookie::Cookie;
use crate::Parsing;
use bytes::{Buf, BytesMut};
use futures::prelude::*;
use std::{mem, str};
use super::{
    accept_key,
    append_extensions,
    configure_extensions,
    expect_ascii_header,
    expect_ascii_token,
    with_first_header,
    AllowAny,
    Error,
    Policy,
    MAX_NUM_HEADERS,
    SEC_WEBSOCKET_EXTENSIONS,
    SEC_WEBSOCKET_PROTOCOL
};

const WEBSOCK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Websocket handshake server.
#[derive(Debug)]
pub struct Server<'a, T> {
    socket: T,
    /// Protocols the server supports.
    protocols: Vec<&'a str>,
    /// Extensions the server supports.
    extensions: Vec<Box<dyn Extension + Send>>,
    /// Policy for the request `Host` header.
    hosts: Box<dyn Policy>,
    /// Policy for the request `Origin` header (absent origins pass).
    origins: Box<dyn Policy>,
    /// Encoding/decoding buffer.
    buffer: BytesMut
}

impl<'a, T: AsyncRead + AsyncWrite + Unpin> Server<'a, T> {
    /// Create a new server handshake.
    pub fn new(socket: T) -> Self {
        Server {
            socket,
            protocols: Vec::new(),
            extensions: Vec::new(),
            hosts: Box::new(AllowAny),
            origins: Box::new(AllowAny),
            buffer: BytesMut::new()
        }
    }

    /// Override the buffer to use for request/response handling.
    pub fn set_buffer(&mut self, b: BytesMut) -> &mut Self {
        self.buffer = b;
        self
    }

    /// Extract the buffer.
    pub fn take_buffer(&mut self) -> BytesMut {
        mem::take(&mut self.buffer)
    }

    /// Add a protocol the server supports.
    pub fn add_protocol(&mut self, p: &'a str) -> &mut Self {
        self.protocols.push(p);
        self
    }

    /// Add an extension the server supports.
    pub fn add_extension(&mut self, e: Box<dyn Extension + Send>) -> &mut Self {
        self.extensions.push(e);
        self
    }

    /// Get back all extensions.
    pub fn drain_extensions(&mut self) -> impl Iterator<Item = Box<dyn Extension + Send>> + '_ {
        self.extensions.drain(..)
    }

    /// Restrict the hosts this server accepts handshakes for.
    pub fn set_hosts(&mut self, p: impl Policy + 'static) -> &mut Self {
        self.hosts = Box::new(p);
        self
    }

    /// Restrict the origins this server accepts handshakes from.
    ///
    /// Requests without an `Origin` header are not affected.
    pub fn set_origins(&mut self, p: impl Policy + 'static) -> &mut Self {
        self.origins = Box::new(p);
        self
    }

    /// Await an incoming client handshake request.
    pub async fn receive_request(&mut self) -> Result<ClientRequest<'a>, Error> {
        self.buffer.clear();
        loop {
            crate::read(&mut self.socket, &mut self.buffer).await?;
            if let Parsing::Done { value, offset } = self.decode_request()? {
                self.buffer.advance(offset);
                return Ok(value)
            }
        }
    }

    /// Respond to the client.
    ///
    /// Bytes which were buffered past the request head (e.g. frames the
    /// client sent right after the handshake) survive in the buffer and
    /// are handed over to the connection by [`Server::into_builder`].
    pub async fn send_response(&mut self, r: &Response<'_>) -> Result<(), Error> {
        let mut out = BytesMut::new();
        self.encode_response(r, &mut out);
        self.socket.write_all(&out).await?;
        self.socket.flush().await?;
        Ok(())
    }

    /// Decode a handshake request from bytes previously placed into the
    /// buffer with [`Server::set_buffer`], e.g. by an HTTP listener that
    /// has already read the request head off the socket.
    pub fn decode_buffered(&mut self) -> Result<Option<ClientRequest<'a>>, Error> {
        match self.decode_request()? {
            Parsing::Done { value, offset } => {
                self.buffer.advance(offset);
                Ok(Some(value))
            }
            Parsing::NeedMore(()) => Ok(None)
        }
    }

    /// Turn this handshake into a [`connection::Builder`].
    pub fn into_builder(mut self) -> connection::Builder<T> {
        let mut builder = connection::Builder::new(self.socket, Mode::Server);
        builder.set_buffer(self.buffer);
        builder.add_extensions(self.extensions.drain(..));
        builder
    }

    /// Get out the inner socket of the server.
    pub fn into_inner(self) -> T {
        self.socket
    }

    /// Decode a client handshake request that has already been read into
    /// an internal or external buffer.
    pub(crate) fn decode_request(&mut self) -> Result<Parsing<ClientRequest<'a>>, Error> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
        let mut request = httparse::Request::new(&mut header_buf);

        let offset = match request.parse(self.buffer.as_ref()) {
            Ok(httparse::Status::Complete(off)) => off,
            Ok(httparse::Status::Partial) => return Ok(Parsing::NeedMore(())),
            Err(e) => return Err(Error::Http(Box::new(e)))
        };

        if request.method != Some("GET") {
            return Err(Error::InvalidRequestMethod)
        }
        if request.version != Some(1) {
            return Err(Error::UnsupportedHttpVersion)
        }

        let host = with_first_header(request.headers, "Host", |h| Ok(Vec::from(h)))?;
        if !self.hosts.is_allowed(&host) {
            return Err(Error::ForbiddenHost)
        }

        expect_ascii_header(request.headers, "Upgrade", "websocket")?;
        expect_ascii_token(request.headers, "Connection", "upgrade")?;

        if expect_ascii_header(request.headers, "Sec-WebSocket-Version", "13").is_err() {
            return Err(Error::UnsupportedWebSocketVersion)
        }

        let ws_key = with_first_header(request.headers, "Sec-WebSocket-Key", |k| {
            Ok(Vec::from(k))
        })?;

        // The key must be 16 bytes, base64 encoded.
        match base64::decode(&ws_key) {
            Ok(k) if k.len() == 16 => {}
            _ => return Err(Error::InvalidSecWebSocketKey)
        }

        let origin = request.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case("Origin"))
            .map(|h| Vec::from(h.value));
        if let Some(o) = &origin {
            if !self.origins.is_allowed(o) {
                return Err(Error::ForbiddenOrigin)
            }
        }

        for h in request.headers.iter()
            .filter(|h| h.name.eq_ignore_ascii_case(SEC_WEBSOCKET_EXTENSIONS))
        {
            configure_extensions(&mut self.extensions, str::from_utf8(h.value)?)?
        }

        // Keep the client's listing order so the first mutually supported
        // protocol can be selected.
        let mut protocols = Vec::new();
        for h in request.headers.iter()
            .filter(|h| h.name.eq_ignore_ascii_case(SEC_WEBSOCKET_PROTOCOL))
        {
            for p in str::from_utf8(h.value)?.split(',') {
                let p = p.trim();
                if let Some(&q) = self.protocols.iter().find(|x| x.eq_ignore_ascii_case(p)) {
                    protocols.push(q)
                }
            }
        }

        let mut cookies = Vec::new();
        for h in request.headers.iter().filter(|h| h.name.eq_ignore_ascii_case("Cookie")) {
            cookies.extend(Cookie::parse_request(str::from_utf8(h.value)?))
        }

        let path = request.path.unwrap_or("/").to_string();

        let value = ClientRequest {
            ws_key,
            protocols,
            path,
            host: String::from_utf8(host).map_err(|e| Error::Utf8(e.utf8_error()))?,
            origin: origin
                .map(|o| String::from_utf8(o).map_err(|e| Error::Utf8(e.utf8_error())))
                .transpose()?,
            cookies
        };

        Ok(Parsing::Done { value, offset })
    }

    /// Encode a server handshake response into `buf`.
    fn encode_response(&self, response: &Response<'_>, buf: &mut BytesMut) {
        match response {
            Response::Accept { key, protocol } => {
                let mut key_buf = [0; 32];
                let accept_value = accept_key(key, &mut key_buf);
                buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols");
                buf.extend_from_slice(b"\r\nServer: websock-");
                buf.extend_from_slice(WEBSOCK_VERSION.as_bytes());
                buf.extend_from_slice(b"\r\nUpgrade: websocket\r\nConnection: upgrade");
                buf.extend_from_slice(b"\r\nSec-WebSocket-Accept: ");
                buf.extend_from_slice(accept_value);
                if let Some(p) = protocol {
                    buf.extend_from_slice(b"\r\nSec-WebSocket-Protocol: ");
                    buf.extend_from_slice(p.as_bytes())
                }
                append_extensions(self.extensions.iter().filter(|e| e.is_enabled()), buf);
                buf.extend_from_slice(b"\r\n\r\n")
            }
            Response::Reject { status_code } => {
                buf.extend_from_slice(b"HTTP/1.1 ");
                let status = http::StatusCode::from_u16(*status_code)
                    .ok()
                    .filter(|s| s.canonical_reason().is_some())
                    .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
                buf.extend_from_slice(status.as_str().as_bytes());
                buf.extend_from_slice(b" ");
                buf.extend_from_slice(status.canonical_reason().unwrap_or("N/A").as_bytes());
                if status == http::StatusCode::UPGRADE_REQUIRED {
                    buf.extend_from_slice(b"\r\nSec-WebSocket-Version: 13")
                }
                buf.extend_from_slice(b"\r\n\r\n")
            }
        }
    }
}

/// Handshake request received from the client.
#[derive(Debug)]
pub struct ClientRequest<'a> {
    ws_key: Vec<u8>,
    protocols: Vec<&'a str>,
    path: String,
    host: String,
    origin: Option<String>,
    cookies: Vec<Cookie>
}

impl<'a> ClientRequest<'a> {
    /// A reference to the nonce.
    pub fn key(&self) -> &[u8] {
        &self.ws_key
    }

    /// Consume this request, returning the nonce.
    pub fn into_key(self) -> Vec<u8> {
        self.ws_key
    }

    /// The protocols the client is proposing, in the client's order of
    /// preference, filtered to those the server supports.
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.protocols.iter().cloned()
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request `Host` header value.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The request `Origin` header value, if present.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Cookies the client sent along with the handshake.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }
}

/// Handshake response the server sends back to the client.
#[derive(Debug)]
pub enum Response<'a> {
    /// The server accepts the handshake request.
    Accept {
        /// The client's `Sec-WebSocket-Key` nonce.
        key: &'a [u8],
        /// The selected subprotocol, if any.
        protocol: Option<&'a str>
    },
    /// The server rejects the handshake request.
    Reject {
        /// HTTP response status code.
        status_code: u16
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use crate::handshake::Error;
    use crate::Parsing;
    use futures::io::Cursor;
    use super::{ClientRequest, Server};

    fn decode(request: &str) -> Result<Parsing<ClientRequest<'static>>, Error> {
        let mut server = Server::new(Cursor::new(Vec::new()));
        server.set_buffer(request.as_bytes().into());
        server.decode_request()
    }

    const GOOD: &str = "GET /chat HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn accepts_well_formed_request() {
        let request = match decode(GOOD) {
            Ok(Parsing::Done { value, .. }) => value,
            other => panic!("unexpected parse result: {:?}", other)
        };
        assert_eq!(request.key(), b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.host(), "example.com")
    }

    #[test]
    fn rejects_non_get() {
        let request = GOOD.replace("GET", "POST");
        assert_matches!(decode(&request), Err(Error::InvalidRequestMethod))
    }

    #[test]
    fn rejects_wrong_version() {
        let request = GOOD.replace("Version: 13", "Version: 8");
        let e = decode(&request).unwrap_err();
        assert_matches!(e, Error::UnsupportedWebSocketVersion);
        assert_eq!(e.status_code(), 426)
    }

    #[test]
    fn rejects_short_key() {
        let request = GOOD.replace("dGhlIHNhbXBsZSBub25jZQ==", "c2hvcnQ=");
        assert_matches!(decode(&request), Err(Error::InvalidSecWebSocketKey))
    }

    #[test]
    fn rejects_missing_host() {
        let request = GOOD.replace("Host: example.com\r\n", "");
        assert_matches!(decode(&request), Err(Error::HeaderNotFound(_)))
    }

    #[test]
    fn connection_header_token_list() {
        let request = GOOD.replace("Connection: Upgrade", "Connection: keep-alive, Upgrade");
        assert_matches!(decode(&request), Ok(Parsing::Done { .. }))
    }
}
