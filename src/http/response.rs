// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Writing HTTP/1.1 responses: status line, header block and body,
//! either content-length delimited or as chunk frames.

use crate::http::chunked::{encode_chunk, encode_last_chunk};
use crate::http::cookie::Cookie;
use crate::http::headers::{self, Headers, Mode};
use bytes::BytesMut;
use futures::io::{AsyncWrite, AsyncWriteExt};
use http::StatusCode;
use std::io;

const SERVER: &str = concat!("websock-", env!("CARGO_PKG_VERSION"));

/// An HTTP response under construction.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    send_chunked: bool,
    close: bool
}

impl Response {
    /// Create an empty response with the given status code.
    ///
    /// Unknown codes map to `500 Internal Server Error`.
    pub fn new(status: u16) -> Self {
        Response {
            // Codes without a canonical reason phrase map to 500, like
            // any out-of-range value.
            status: StatusCode::from_u16(status)
                .ok()
                .filter(|s| s.canonical_reason().is_some())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: Headers::with_mode(Mode::Response),
            body: Vec::new(),
            send_chunked: false,
            close: false
        }
    }

    /// Create a plain text response.
    pub fn text(status: u16, body: &str) -> Self {
        let mut r = Response::new(status);
        let _ = r.headers.add("Content-Type", "text/plain; charset=utf-8");
        r.body = body.as_bytes().to_vec();
        r
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Add a header through the generic name-based API
    /// (restricted fields are rejected).
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), headers::Error> {
        self.headers.add(name, value)
    }

    /// The response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set the response body.
    pub fn set_body(&mut self, body: Vec<u8>) -> &mut Self {
        self.body = body;
        self
    }

    /// The response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Write the body as chunk frames instead of content-length delimited.
    pub fn set_send_chunked(&mut self, chunked: bool) -> &mut Self {
        self.send_chunked = chunked;
        self
    }

    /// Force `Connection: close` on this response.
    pub fn set_close(&mut self, close: bool) -> &mut Self {
        self.close = close;
        self
    }

    /// Does this response close the connection?
    pub fn is_close(&self) -> bool {
        self.close
    }

    /// Append a `Set-Cookie` header for the given cookie.
    pub fn add_cookie(&mut self, cookie: &Cookie) {
        let _ = self.headers.add("Set-Cookie", &cookie.to_set_cookie_string());
    }

    /// Append a `WWW-Authenticate` challenge header.
    pub fn add_challenge(&mut self, challenge: &crate::http::auth::Challenge) {
        let _ = self.headers.add("WWW-Authenticate", &challenge.to_string());
    }

    /// Encode this response into `buf`.
    ///
    /// The machinery fields (`Date`, `Server`, `Content-Length` or
    /// `Transfer-Encoding`, `Connection`) are emitted here and can not be
    /// overridden through the generic header API.
    pub fn encode(&self, buf: &mut BytesMut, keep_alive: bool) {
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.canonical_reason().unwrap_or("N/A").as_bytes());
        buf.extend_from_slice(b"\r\nServer: ");
        buf.extend_from_slice(SERVER.as_bytes());
        buf.extend_from_slice(b"\r\nDate: ");
        let now = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        buf.extend_from_slice(now.as_bytes());
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes())
        }
        if self.send_chunked {
            buf.extend_from_slice(b"\r\nTransfer-Encoding: chunked")
        } else {
            buf.extend_from_slice(b"\r\nContent-Length: ");
            buf.extend_from_slice(self.body.len().to_string().as_bytes())
        }
        if self.close || !keep_alive {
            buf.extend_from_slice(b"\r\nConnection: close")
        }
        buf.extend_from_slice(b"\r\n\r\n");
        if self.send_chunked {
            encode_chunk(&self.body, buf);
            encode_last_chunk(buf)
        } else {
            buf.extend_from_slice(&self.body)
        }
    }

    /// Encode and write this response to `writer`.
    pub async fn write_to<W>(&self, writer: &mut W, keep_alive: bool) -> io::Result<()>
    where
        W: AsyncWrite + Unpin
    {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, keep_alive);
        writer.write_all(&buf).await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use super::Response;

    fn encoded(r: &Response, keep_alive: bool) -> String {
        let mut buf = BytesMut::new();
        r.encode(&mut buf, keep_alive);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn status_line_and_length() {
        let r = Response::text(404, "nothing here");
        let s = encoded(&r, true);
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", s);
        assert!(s.contains("\r\nContent-Length: 12\r\n"), "{}", s);
        assert!(s.ends_with("\r\n\r\nnothing here"), "{}", s);
        assert!(!s.contains("Connection: close"))
    }

    #[test]
    fn close_header_when_not_keep_alive() {
        let r = Response::new(204);
        let s = encoded(&r, false);
        assert!(s.contains("\r\nConnection: close\r\n"), "{}", s)
    }

    #[test]
    fn chunked_body() {
        let mut r = Response::text(200, "Wikipedia");
        r.set_send_chunked(true);
        let s = encoded(&r, true);
        assert!(s.contains("\r\nTransfer-Encoding: chunked\r\n"), "{}", s);
        assert!(!s.contains("Content-Length"), "{}", s);
        assert!(s.ends_with("\r\n\r\n9\r\nWikipedia\r\n0\r\n\r\n"), "{}", s)
    }

    #[test]
    fn unknown_status_maps_to_500() {
        let r = Response::new(999);
        let s = encoded(&r, true);
        assert!(s.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{}", s)
    }

    #[test]
    fn restricted_headers_rejected() {
        let mut r = Response::new(200);
        assert!(r.add_header("Content-Length", "10").is_err());
        assert!(r.add_header("X-Custom", "1").is_ok())
    }
}
