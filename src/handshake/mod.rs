// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket [handshake] (client and server side).
//!
//! [handshake]: https://tools.ietf.org/html/rfc6455#section-4

pub mod client;
pub mod proxy;
pub mod server;

mod access_control;

pub use access_control::{AllowAny, AllowList, Policy};
pub use client::{Client, ServerResponse};
pub use server::{ClientRequest, Response, Server};

use crate::extension::{Extension, Param};
use bytes::BytesMut;
use smallvec::SmallVec;
use std::{io, str};

/// Defined in RFC 6455 and used to generate the `Sec-WebSocket-Accept`
/// header in the server handshake response.
const KEY: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// How many HTTP headers do we support during parsing?
const MAX_NUM_HEADERS: usize = 32;

/// Some HTTP headers we need to check during parsing.
const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// Compute the `Sec-WebSocket-Accept` value for the given key.
///
/// Returns the prefix of `out` holding the base64 encoded digest.
pub(crate) fn accept_key<'a>(key: &[u8], out: &'a mut [u8; 32]) -> &'a [u8] {
    use sha1::{Digest, Sha1};
    let mut digest = Sha1::new();
    digest.update(key);
    digest.update(KEY);
    let d = digest.finalize();
    let n = base64::encode_config_slice(d, base64::STANDARD, out);
    &out[.. n]
}

/// Check a set of headers contains a specific one (ASCII case-insensitive
/// comparison of the value).
fn expect_ascii_header(headers: &[httparse::Header], name: &str, ours: &str) -> Result<(), Error> {
    with_first_header(headers, name, |theirs| {
        let s = str::from_utf8(theirs)?;
        if s.eq_ignore_ascii_case(ours) {
            Ok(())
        } else {
            Err(Error::UnexpectedHeader(name.into()))
        }
    })
}

/// Check that the comma-separated token list of a header contains a token
/// (ASCII case-insensitive). Used for `Connection: keep-alive, Upgrade`
/// style values.
fn expect_ascii_token(headers: &[httparse::Header], name: &str, token: &str) -> Result<(), Error> {
    with_first_header(headers, name, |theirs| {
        let s = str::from_utf8(theirs)?;
        if s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)) {
            Ok(())
        } else {
            Err(Error::UnexpectedHeader(name.into()))
        }
    })
}

/// Pick the first header with the given name and apply the given closure to it.
fn with_first_header<F, R>(headers: &[httparse::Header], name: &str, f: F) -> Result<R, Error>
where
    F: Fn(&[u8]) -> Result<R, Error>
{
    if let Some(h) = headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)) {
        f(h.value)
    } else {
        Err(Error::HeaderNotFound(name.into()))
    }
}

/// Configure all extensions with parsed parameters from a
/// `Sec-WebSocket-Extensions` header value.
fn configure_extensions(extensions: &mut [Box<dyn Extension + Send>], line: &str) -> Result<(), Error> {
    for e in line.split(',') {
        let mut it = e.split(';');
        if let Some(name) = it.next() {
            let name = name.trim();
            if let Some(x) = extensions.iter_mut().find(|x| x.name().eq_ignore_ascii_case(name)) {
                let mut params = SmallVec::<[Param; 4]>::new();
                for p in it {
                    let p = p.trim();
                    if p.is_empty() {
                        continue
                    }
                    if let Some(i) = p.find('=') {
                        let (key, val) = p.split_at(i);
                        let val = val[1 ..].trim().trim_matches('"');
                        let mut q = Param::new(key.trim().to_string());
                        q.set_value(Some(val.to_string()));
                        params.push(q)
                    } else {
                        params.push(Param::new(p.to_string()))
                    }
                }
                x.configure(&params).map_err(Error::Extension)?
            }
        }
    }
    Ok(())
}

/// Write all enabled extensions (and their parameters) into the given buffer.
fn append_extensions<'a, I>(extensions: I, buf: &mut BytesMut)
where
    I: IntoIterator<Item = &'a Box<dyn Extension + Send>>
{
    let mut iter = extensions.into_iter().peekable();

    if iter.peek().is_some() {
        buf.extend_from_slice(b"\r\nSec-WebSocket-Extensions: ")
    }

    while let Some(e) = iter.next() {
        buf.extend_from_slice(e.name().as_bytes());
        for p in e.params() {
            buf.extend_from_slice(b"; ");
            buf.extend_from_slice(p.name().as_bytes());
            if let Some(v) = p.value() {
                buf.extend_from_slice(b"=");
                buf.extend_from_slice(v.as_bytes())
            }
        }
        if iter.peek().is_some() {
            buf.extend_from_slice(b", ")
        }
    }
}

// Handshake error type ///////////////////////////////////////////////////////////////////////////

/// Enumeration of possible handshake errors.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error has been encountered.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// An HTTP version =/= 1.1 was encountered.
    #[error("http version was not 1.1")]
    UnsupportedHttpVersion,

    /// The handshake request was not a GET request.
    #[error("handshake not a GET request")]
    InvalidRequestMethod,

    /// The client requested a websocket version other than 13.
    #[error("unsupported websocket version")]
    UnsupportedWebSocketVersion,

    /// The HTTP response code was unexpected.
    #[error("unexpected response status: {0}")]
    UnexpectedStatusCode(u16),

    /// An HTTP header has not been present.
    #[error("header {0} not found")]
    HeaderNotFound(String),

    /// An HTTP header value was not expected.
    #[error("header {0} had unexpected value")]
    UnexpectedHeader(String),

    /// The Sec-WebSocket-Key header was not 16 base64-decoded bytes.
    #[error("invalid Sec-WebSocket-Key")]
    InvalidSecWebSocketKey,

    /// The Sec-WebSocket-Accept header value did not match.
    #[error("websocket key mismatch")]
    InvalidSecWebSocketAccept,

    /// The server returned an extension we did not ask for.
    #[error("unsolicited extension returned")]
    UnsolicitedExtension,

    /// The server returned a protocol we did not ask for.
    #[error("unsolicited protocol returned")]
    UnsolicitedProtocol,

    /// The request `Host` is not allowed by the configured policy.
    #[error("host not allowed")]
    ForbiddenHost,

    /// The request `Origin` is not allowed by the configured policy.
    #[error("origin not allowed")]
    ForbiddenOrigin,

    /// An extension produced an error during negotiation.
    #[error("extension error: {0}")]
    Extension(#[source] crate::BoxedError),

    /// The HTTP entity could not be parsed successfully.
    #[error("http parser error: {0}")]
    Http(#[source] crate::BoxedError),

    /// UTF-8 decoding failed.
    #[error("utf-8 decoding error: {0}")]
    Utf8(#[from] str::Utf8Error)
}

impl Error {
    /// The HTTP status code a server should answer with when
    /// rejecting a handshake due to this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnsupportedWebSocketVersion => 426,
            _ => 400
        }
    }
}

#[cfg(test)]
mod tests {
    use super::accept_key;

    #[test]
    fn rfc6455_sample_accept_key() {
        // The sample nonce of RFC 6455, section 1.3.
        let mut buf = [0; 32];
        let accept = accept_key(b"dGhlIHNhbXBsZSBub25jZQ==", &mut buf);
        assert_eq!(accept, b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    }
}
