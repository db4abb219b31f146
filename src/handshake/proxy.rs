// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `CONNECT` tunneling through an HTTP proxy.
//!
//! An outbound `wss://` connection through a proxy first establishes a
//! tunnel to the target, then performs TLS and the websocket handshake
//! inside it.

use crate::Parsing;
use bytes::{Buf, BytesMut};
use futures::prelude::*;
use super::{Error, MAX_NUM_HEADERS};

/// Establish a tunnel to `host:port` through the proxy the socket is
/// connected to.
///
/// On success the socket is ready for the next protocol layer (usually
/// TLS). Authentication to the proxy can be supplied as a pre-computed
/// `Proxy-Authorization` value, e.g. via
/// [`basic_authorization`](crate::http::auth::basic_authorization).
pub async fn tunnel<T>(
    socket: &mut T,
    host: &str,
    port: u16,
    authorization: Option<&str>
) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin
{
    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(b"CONNECT ");
    let target = format!("{}:{}", host, port);
    buffer.extend_from_slice(target.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    buffer.extend_from_slice(target.as_bytes());
    if let Some(a) = authorization {
        buffer.extend_from_slice(b"\r\nProxy-Authorization: ");
        buffer.extend_from_slice(a.as_bytes())
    }
    buffer.extend_from_slice(b"\r\n\r\n");
    socket.write_all(&buffer).await?;
    socket.flush().await?;
    buffer.clear();

    loop {
        crate::read(socket, &mut buffer).await?;
        if let Parsing::Done { value: (), offset } = decode_answer(&buffer)? {
            // Anything past the proxy answer belongs to the tunneled
            // protocol; there should be nothing, since we speak first.
            buffer.advance(offset);
            return Ok(())
        }
    }
}

/// Decode the proxy's answer to a `CONNECT` request.
fn decode_answer(buffer: &[u8]) -> Result<Parsing<()>, Error> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
    let mut response = httparse::Response::new(&mut header_buf);

    let offset = match response.parse(buffer) {
        Ok(httparse::Status::Complete(off)) => off,
        Ok(httparse::Status::Partial) => return Ok(Parsing::NeedMore(())),
        Err(e) => return Err(Error::Http(Box::new(e)))
    };

    match response.code {
        Some(code) if (200 .. 300).contains(&code) => Ok(Parsing::Done { value: (), offset }),
        other => Err(Error::UnexpectedStatusCode(other.unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use crate::handshake::Error;
    use crate::Parsing;
    use super::decode_answer;

    #[test]
    fn accepts_2xx() {
        let answer = b"HTTP/1.1 200 Connection Established\r\n\r\n";
        assert_matches!(decode_answer(answer), Ok(Parsing::Done { .. }))
    }

    #[test]
    fn partial_answer_needs_more() {
        assert_matches!(decode_answer(b"HTTP/1.1 200"), Ok(Parsing::NeedMore(())))
    }

    #[test]
    fn rejects_failure_status() {
        let answer = b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n";
        assert_matches!(decode_answer(answer), Err(Error::UnexpectedStatusCode(407)))
    }
}
