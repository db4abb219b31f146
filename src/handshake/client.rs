// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket client [handshake].
//!
//! [handshake]: https://tools.ietf.org/html/rfc6455#section-4

use crate::connection::{self, Mode};
use crate::extension::Extension;
use crate::http::cookie::{Cookie, CookieJar};
use crate::Parsing;
use bytes::{Buf, BytesMut};
use futures::prelude::*;
use smallvec::SmallVec;
use std::str;
use super::{
    accept_key,
    append_extensions,
    configure_extensions,
    expect_ascii_header,
    expect_ascii_token,
    with_first_header,
    Error,
    MAX_NUM_HEADERS,
    SEC_WEBSOCKET_EXTENSIONS,
    SEC_WEBSOCKET_PROTOCOL
};

/// Websocket client handshake.
#[derive(Debug)]
pub struct Client<'a, T> {
    /// The underlying async I/O resource.
    socket: T,
    /// The HTTP host to send the handshake to.
    host: &'a str,
    /// The HTTP resource to request.
    resource: &'a str,
    /// The HTTP origin header.
    origin: Option<&'a str>,
    /// A buffer holding the base64 encoded request nonce.
    nonce: [u8; 32],
    /// The offset into the nonce buffer.
    nonce_offset: usize,
    /// The protocols to include in the handshake.
    protocols: SmallVec<[&'a str; 4]>,
    /// The extensions the client wishes to include in the request.
    extensions: SmallVec<[Box<dyn Extension + Send>; 4]>,
    /// Cookie storage for this endpoint. Cookies are sent with the request
    /// and `Set-Cookie` response headers are stored back.
    cookies: Option<&'a mut CookieJar>,
    /// A raw `Authorization` header value to include in the request.
    authorization: Option<String>,
    /// Encoding/decoding buffer.
    buffer: BytesMut
}

impl<'a, T: AsyncRead + AsyncWrite + Unpin> Client<'a, T> {
    /// Create a new client handshake for some host and resource.
    pub fn new(socket: T, host: &'a str, resource: &'a str) -> Self {
        Client {
            socket,
            host,
            resource,
            origin: None,
            nonce: [0; 32],
            nonce_offset: 0,
            protocols: SmallVec::new(),
            extensions: SmallVec::new(),
            cookies: None,
            authorization: None,
            buffer: BytesMut::new()
        }
    }

    /// Override the buffer to use for request/response handling.
    pub fn set_buffer(&mut self, b: BytesMut) -> &mut Self {
        self.buffer = b;
        self
    }

    /// Set the handshake origin header.
    pub fn set_origin(&mut self, o: &'a str) -> &mut Self {
        self.origin = Some(o);
        self
    }

    /// Add a protocol to be included in the handshake.
    pub fn add_protocol(&mut self, p: &'a str) -> &mut Self {
        self.protocols.push(p);
        self
    }

    /// Add an extension to be included in the handshake.
    pub fn add_extension(&mut self, e: Box<dyn Extension + Send>) -> &mut Self {
        self.extensions.push(e);
        self
    }

    /// Get back all extensions.
    pub fn drain_extensions(&mut self) -> impl Iterator<Item = Box<dyn Extension + Send>> + '_ {
        self.extensions.drain(..)
    }

    /// Use the given cookie storage for this handshake.
    ///
    /// Cookies from the jar are included in the request and `Set-Cookie`
    /// headers of the response are stored into the jar.
    pub fn set_cookies(&mut self, jar: &'a mut CookieJar) -> &mut Self {
        self.cookies = Some(jar);
        self
    }

    /// Include a raw `Authorization` header value in the request.
    ///
    /// Basic credentials can be sent preemptively
    /// ([`basic_authorization`](crate::http::auth::basic_authorization));
    /// for Digest, run the handshake once, take the challenge from
    /// [`ServerResponse::Rejected`], compute the value with
    /// [`digest_authorization`](crate::http::auth::digest_authorization)
    /// and retry.
    pub fn set_authorization(&mut self, value: String) -> &mut Self {
        self.authorization = Some(value);
        self
    }

    /// Initiate client handshake request to server and get back the response.
    pub async fn handshake(&mut self) -> Result<ServerResponse, Error> {
        self.buffer.clear();
        self.encode_request();
        self.socket.write_all(&self.buffer).await?;
        self.socket.flush().await?;
        self.buffer.clear();

        loop {
            crate::read(&mut self.socket, &mut self.buffer).await?;
            if let Parsing::Done { value, offset } = self.decode_response()? {
                self.buffer.advance(offset);
                return Ok(value)
            }
        }
    }

    /// Turn this handshake into a [`connection::Builder`].
    pub fn into_builder(mut self) -> connection::Builder<T> {
        let mut builder = connection::Builder::new(self.socket, Mode::Client);
        builder.set_buffer(self.buffer);
        builder.add_extensions(self.extensions.drain(..));
        builder
    }

    /// Get out the inner socket of the client.
    pub fn into_inner(self) -> T {
        self.socket
    }

    /// Encode the client handshake as a request, ready to be sent to the server.
    fn encode_request(&mut self) {
        let nonce: [u8; 16] = rand::random();
        self.nonce_offset = base64::encode_config_slice(nonce, base64::STANDARD, &mut self.nonce);
        self.buffer.extend_from_slice(b"GET ");
        self.buffer.extend_from_slice(self.resource.as_bytes());
        self.buffer.extend_from_slice(b" HTTP/1.1");
        self.buffer.extend_from_slice(b"\r\nHost: ");
        self.buffer.extend_from_slice(self.host.as_bytes());
        self.buffer.extend_from_slice(b"\r\nUpgrade: websocket\r\nConnection: upgrade");
        self.buffer.extend_from_slice(b"\r\nSec-WebSocket-Key: ");
        self.buffer.extend_from_slice(&self.nonce[.. self.nonce_offset]);
        if let Some(o) = &self.origin {
            self.buffer.extend_from_slice(b"\r\nOrigin: ");
            self.buffer.extend_from_slice(o.as_bytes())
        }
        if let Some(a) = &self.authorization {
            self.buffer.extend_from_slice(b"\r\nAuthorization: ");
            self.buffer.extend_from_slice(a.as_bytes())
        }
        if let Some(jar) = &self.cookies {
            if let Some(value) = jar.request_header_value() {
                self.buffer.extend_from_slice(b"\r\nCookie: ");
                self.buffer.extend_from_slice(value.as_bytes())
            }
        }
        if let Some((last, prefix)) = self.protocols.split_last() {
            self.buffer.extend_from_slice(b"\r\nSec-WebSocket-Protocol: ");
            for p in prefix {
                self.buffer.extend_from_slice(p.as_bytes());
                self.buffer.extend_from_slice(b",")
            }
            self.buffer.extend_from_slice(last.as_bytes())
        }
        append_extensions(&self.extensions, &mut self.buffer);
        self.buffer.extend_from_slice(b"\r\nSec-WebSocket-Version: 13\r\n\r\n")
    }

    /// Decode the server response to this client request.
    fn decode_response(&mut self) -> Result<Parsing<ServerResponse>, Error> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
        let mut response = httparse::Response::new(&mut header_buf);

        let offset = match response.parse(self.buffer.as_ref()) {
            Ok(httparse::Status::Complete(off)) => off,
            Ok(httparse::Status::Partial) => return Ok(Parsing::NeedMore(())),
            Err(e) => return Err(Error::Http(Box::new(e)))
        };

        if response.version != Some(1) {
            return Err(Error::UnsupportedHttpVersion)
        }

        // Remember any cookies the server set, whatever the outcome.
        if let Some(jar) = &mut self.cookies {
            for h in response.headers.iter()
                .filter(|h| h.name.eq_ignore_ascii_case("Set-Cookie"))
            {
                for cookie in Cookie::parse_response(str::from_utf8(h.value)?) {
                    if let Err(e) = jar.set_or_remove(cookie) {
                        log::debug!("cookie not stored: {}", e)
                    }
                }
            }
        }

        match response.code {
            Some(101) => (),
            Some(code @ (301 ..= 303)) | Some(code @ 307) | Some(code @ 308) => { // redirect response
                let location = with_first_header(response.headers, "Location", |loc| {
                    Ok(String::from(str::from_utf8(loc)?))
                })?;
                let response = ServerResponse::Redirect { status_code: code, location };
                return Ok(Parsing::Done { value: response, offset })
            }
            other => {
                // Keep the challenge of a 401 so the caller can compute
                // an `Authorization` value and retry the handshake.
                let mut www_authenticate = None;
                if let Some(h) = response.headers.iter()
                    .find(|h| h.name.eq_ignore_ascii_case("WWW-Authenticate"))
                {
                    www_authenticate = Some(str::from_utf8(h.value)?.to_string())
                }
                let response = ServerResponse::Rejected {
                    status_code: other.unwrap_or(0),
                    www_authenticate
                };
                return Ok(Parsing::Done { value: response, offset })
            }
        }

        expect_ascii_header(response.headers, "Upgrade", "websocket")?;
        expect_ascii_token(response.headers, "Connection", "upgrade")?;

        let nonce = &self.nonce[.. self.nonce_offset];
        with_first_header(response.headers, "Sec-WebSocket-Accept", |theirs| {
            let mut key_buf = [0; 32];
            let ours = accept_key(nonce, &mut key_buf);
            if ours != theirs {
                return Err(Error::InvalidSecWebSocketAccept)
            }
            Ok(())
        })?;

        // Parse `Sec-WebSocket-Extensions` headers. Selecting an
        // extension we did not offer aborts the handshake.

        for h in response.headers.iter()
            .filter(|h| h.name.eq_ignore_ascii_case(SEC_WEBSOCKET_EXTENSIONS))
        {
            let line = str::from_utf8(h.value)?;
            for e in line.split(',') {
                let name = e.split(';').next().unwrap_or("").trim();
                if !name.is_empty()
                    && !self.extensions.iter().any(|x| x.name().eq_ignore_ascii_case(name))
                {
                    return Err(Error::UnsolicitedExtension)
                }
            }
            configure_extensions(&mut self.extensions, line)?
        }

        // Match `Sec-WebSocket-Protocol` header.

        let mut selected_proto = None;
        if let Some(tp) = response.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case(SEC_WEBSOCKET_PROTOCOL))
        {
            if let Some(&p) = self.protocols.iter().find(|x| x.as_bytes() == tp.value) {
                selected_proto = Some(String::from(p))
            } else {
                return Err(Error::UnsolicitedProtocol)
            }
        }

        let response = ServerResponse::Accepted { protocol: selected_proto };
        Ok(Parsing::Done { value: response, offset })
    }
}

/// Handshake response received from the server.
#[derive(Debug)]
pub enum ServerResponse {
    /// The server has accepted our request.
    Accepted {
        /// The protocol (if any) the server has selected.
        protocol: Option<String>
    },
    /// The server is redirecting us to some other location.
    Redirect {
        /// The HTTP response status code.
        status_code: u16,
        /// The location URL we should go to.
        location: String
    },
    /// The server rejected our request.
    Rejected {
        /// HTTP response status code.
        status_code: u16,
        /// The `WWW-Authenticate` challenge of a `401` answer.
        ///
        /// Parse it with [`Challenge::parse`](crate::http::auth::Challenge::parse),
        /// compute an `Authorization` value (e.g. via
        /// [`digest_authorization`](crate::http::auth::digest_authorization)),
        /// hand it to [`Client::set_authorization`] and run
        /// [`Client::handshake`] again.
        www_authenticate: Option<String>
    }
}
