// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Reading HTTP/1.1 requests: request line, header block and body
//! (content-length delimited or chunked).

use crate::http::chunked::ChunkedDecoder;
use crate::http::cookie::Cookie;
use crate::http::headers::{Headers, Mode};
use crate::http::Error;
use bytes::{Buf, BytesMut};
use futures::io::AsyncRead;
use std::io;

/// Cap of the per-connection request buffer.
pub const MAX_REQUEST_BUFFER: usize = 32 * 1024;

/// How many HTTP headers do we support during parsing?
const MAX_NUM_HEADERS: usize = 64;

/// The request line and header block of a request.
#[derive(Debug)]
pub struct RequestHead {
    method: String,
    path: String,
    /// Minor HTTP version (`HTTP/1.<minor>`).
    version: u8,
    headers: Headers,
    /// The raw bytes of the head, as read from the transport.
    raw: BytesMut
}

impl RequestHead {
    /// The request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The minor HTTP version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw head bytes (request line, headers, terminating CRLF).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The `Host` header value, if present.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }

    /// Should the connection be kept alive after this request
    /// (RFC 7230, section 6.3)?
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers.get("connection").unwrap_or("");
        let has = |token: &str| connection.split(',').any(|t| t.trim().eq_ignore_ascii_case(token));
        if self.version >= 1 {
            !has("close")
        } else {
            has("keep-alive")
        }
    }

    /// Is this a websocket upgrade request?
    pub fn is_upgrade(&self) -> bool {
        let connection = self.headers.get("connection").unwrap_or("");
        connection.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
            && self.headers.get("upgrade").map(|u| u.eq_ignore_ascii_case("websocket")).unwrap_or(false)
    }

    /// The `Content-Length`, if present and well-formed.
    pub fn content_length(&self) -> Result<Option<u64>, Error> {
        match self.headers.get("content-length") {
            None => Ok(None),
            Some(v) => v.trim().parse().map(Some)
                .map_err(|_| Error::Protocol("invalid content-length"))
        }
    }

    /// Does the request carry a chunked body?
    pub fn is_chunked(&self) -> bool {
        self.headers.get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
    }
}

/// A complete request: head plus assembled body.
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    body: BytesMut,
    trailers: Headers
}

impl Request {
    /// The request line and headers.
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// The request method.
    pub fn method(&self) -> &str {
        self.head.method()
    }

    /// The request path.
    pub fn path(&self) -> &str {
        self.head.path()
    }

    /// The request headers.
    pub fn headers(&self) -> &Headers {
        self.head.headers()
    }

    /// The assembled request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Trailer fields of a chunked body (empty otherwise).
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// All cookies carried by `Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie> {
        let mut cookies = Vec::new();
        for v in self.head.headers.get_all("cookie") {
            cookies.extend(Cookie::parse_request(v))
        }
        cookies
    }
}

/// Read a request head from `reader`, buffering into `buffer`.
///
/// Returns `Ok(None)` on a clean EOF before the first byte (the peer
/// closed an idle connection). Bytes following the head remain in
/// `buffer`. Exceeding the 32 KiB request buffer fails with
/// [`Error::RequestTooLarge`].
pub async fn read_head<R>(reader: &mut R, buffer: &mut BytesMut) -> Result<Option<RequestHead>, Error>
where
    R: AsyncRead + Unpin
{
    loop {
        if !buffer.is_empty() {
            if buffer.len() > MAX_REQUEST_BUFFER {
                return Err(Error::RequestTooLarge)
            }
            if let Some(head) = parse_head(buffer)? {
                return Ok(Some(head))
            }
        }
        match crate::read(reader, buffer).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && buffer.is_empty() =>
                return Ok(None),
            Err(e) => return Err(e.into())
        }
    }
}

/// Read the body belonging to `head` and return the complete request.
pub async fn read_body<R>(
    head: RequestHead,
    reader: &mut R,
    buffer: &mut BytesMut
) -> Result<Request, Error>
where
    R: AsyncRead + Unpin
{
    if head.is_chunked() {
        let mut decoder = ChunkedDecoder::new();
        loop {
            if !buffer.is_empty() {
                let consumed = decoder.decode(buffer.as_ref())?;
                buffer.advance(consumed);
                if decoder.is_end() {
                    break
                }
            }
            crate::read(reader, buffer).await?;
        }
        let body = decoder.take_data();
        let trailers = decoder.take_trailers();
        return Ok(Request { head, body, trailers })
    }

    let len = head.content_length()?.unwrap_or(0) as usize;
    while buffer.len() < len {
        crate::read(reader, buffer).await?;
    }
    let body = buffer.split_to(len);
    Ok(Request { head, body, trailers: Headers::new() })
}

/// Read a complete request (head and body).
pub async fn read_request<R>(reader: &mut R, buffer: &mut BytesMut) -> Result<Option<Request>, Error>
where
    R: AsyncRead + Unpin
{
    let head = match read_head(reader, buffer).await? {
        Some(h) => h,
        None => return Ok(None)
    };
    read_body(head, reader, buffer).await.map(Some)
}

/// Try to parse a request head out of `buffer`. On success the head bytes
/// are split off the buffer.
fn parse_head(buffer: &mut BytesMut) -> Result<Option<RequestHead>, Error> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
    let mut request = httparse::Request::new(&mut header_buf);

    let offset = match request.parse(buffer.as_ref()) {
        Ok(httparse::Status::Complete(off)) => off,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::Parser(Box::new(e)))
    };

    let method = request.method.unwrap_or("GET").to_string();
    let path = request.path.unwrap_or("/").to_string();
    let version = request.version.unwrap_or(1);

    let mut headers = Headers::with_mode(Mode::Request);
    for h in request.headers.iter() {
        let value = std::str::from_utf8(h.value)?;
        headers.add_restricted(h.name, value)?
    }

    let raw = buffer.split_to(offset);
    Ok(Some(RequestHead { method, path, version, headers, raw }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::BytesMut;
    use crate::http::Error;
    use futures::executor::block_on;
    use futures::io::Cursor;
    use super::{read_head, read_request, MAX_REQUEST_BUFFER};

    fn buffer(s: &str) -> BytesMut {
        BytesMut::from(s.as_bytes())
    }

    #[test]
    fn parses_simple_request() {
        let mut buf = buffer("GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let mut reader = Cursor::new(Vec::new());
        let head = block_on(read_head(&mut reader, &mut buf)).unwrap().unwrap();
        assert_eq!(head.method(), "GET");
        assert_eq!(head.path(), "/index.html");
        assert_eq!(head.host(), Some("example.com"));
        assert!(head.keep_alive());
        assert!(!head.is_upgrade());
        assert!(buf.is_empty())
    }

    #[test]
    fn keep_alive_rules() {
        let mut buf = buffer("GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
        let mut reader = Cursor::new(Vec::new());
        let head = block_on(read_head(&mut reader, &mut buf)).unwrap().unwrap();
        assert!(!head.keep_alive());

        let mut buf = buffer("GET / HTTP/1.0\r\nHost: h\r\n\r\n");
        let head = block_on(read_head(&mut reader, &mut buf)).unwrap().unwrap();
        assert!(!head.keep_alive())
    }

    #[test]
    fn detects_upgrade() {
        let mut buf = buffer(
            "GET /chat HTTP/1.1\r\nHost: h\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\r\n"
        );
        let mut reader = Cursor::new(Vec::new());
        let head = block_on(read_head(&mut reader, &mut buf)).unwrap().unwrap();
        assert!(head.is_upgrade())
    }

    #[test]
    fn reads_content_length_body() {
        let mut buf = buffer("POST /echo HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello");
        let mut reader = Cursor::new(Vec::new());
        let request = block_on(read_request(&mut reader, &mut buf)).unwrap().unwrap();
        assert_eq!(request.body(), b"hello")
    }

    #[test]
    fn reads_chunked_body() {
        let mut buf = buffer(
            "POST /echo HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
             4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
        );
        let mut reader = Cursor::new(Vec::new());
        let request = block_on(read_request(&mut reader, &mut buf)).unwrap().unwrap();
        assert_eq!(request.body(), b"Wikipedia");
        assert!(request.trailers().is_empty());
        assert!(buf.is_empty())
    }

    #[test]
    fn oversized_head_rejected() {
        let mut big = String::from("GET / HTTP/1.1\r\nHost: h\r\n");
        big.push_str(&format!("X-Filler: {}\r\n", "y".repeat(MAX_REQUEST_BUFFER)));
        big.push_str("\r\n");
        let mut buf = buffer(&big);
        let mut reader = Cursor::new(Vec::new());
        // The whole head is buffered, but over the cap.
        assert_matches!(block_on(read_head(&mut reader, &mut buf)), Err(Error::RequestTooLarge))
    }

    #[test]
    fn clean_eof_returns_none() {
        let mut buf = BytesMut::new();
        let mut reader = Cursor::new(Vec::new());
        assert_matches!(block_on(read_head(&mut reader, &mut buf)), Ok(None))
    }

    #[test]
    fn pipelined_bytes_remain() {
        let mut buf = buffer("GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\n");
        let mut reader = Cursor::new(Vec::new());
        let head = block_on(read_head(&mut reader, &mut buf)).unwrap().unwrap();
        assert_eq!(head.path(), "/a");
        assert_eq!(&buf[..], b"GET /b HTTP/1.1\r\n")
    }
}
