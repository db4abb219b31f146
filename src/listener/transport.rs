// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The transport the listener serves connections over.
//!
//! TLS stream setup is not part of this crate; secure endpoints are
//! served through a user-supplied [`TlsAcceptor`] which turns accepted
//! TCP streams into established TLS transports.

use futures::future::Future;
use futures::io::{AsyncRead, AsyncWrite};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpStream;

/// Object-safe polling surface of a bidirectional byte stream.
trait RawIo: Send {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncRead + AsyncWrite + Send> RawIo for T {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        AsyncRead::poll_read(self, cx, buf)
    }

    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self, cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_close(self, cx)
    }
}

/// Properties of an established TLS stream.
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    /// DER encoding of the certificate the peer presented, if any.
    pub peer_certificate: Option<Vec<u8>>,
    /// The ALPN protocol that was negotiated, if any.
    pub negotiated_protocol: Option<String>
}

/// A type-erased connection transport.
///
/// Wraps either a plain TCP stream or an established TLS stream.
pub struct Transport {
    io: Pin<Box<dyn RawIo>>,
    tls: Option<TlsInfo>
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Transport").field("tls", &self.tls).finish()
    }
}

impl Transport {
    /// Erase the type of the given stream.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static
    {
        Transport { io: Box::pin(io), tls: None }
    }

    /// Erase the type of an established TLS stream, recording its
    /// properties.
    pub fn with_tls_info<T>(io: T, info: TlsInfo) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static
    {
        Transport { io: Box::pin(io), tls: Some(info) }
    }

    /// Properties of the TLS layer, if this transport has one.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }
}

impl AsyncRead for Transport {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        self.io.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for Transport {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.io.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.io.as_mut().poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.io.as_mut().poll_close(cx)
    }
}

/// Performs the TLS handshake on streams accepted by secure endpoints.
///
/// Implementations typically wrap a TLS library acceptor and return the
/// established stream via [`Transport::with_tls_info`].
pub trait TlsAcceptor: Send + Sync {
    /// Accept the TLS handshake on the given TCP stream.
    fn accept(&self, stream: TcpStream) -> Pin<Box<dyn Future<Output = io::Result<Transport>> + Send>>;
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use futures::io::{AsyncReadExt, AsyncWriteExt, Cursor};
    use super::Transport;

    #[test]
    fn erased_stream_reads_and_writes() {
        let mut t = Transport::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 3];
        block_on(t.read_exact(&mut buf)).unwrap();
        assert_eq!(buf, [1, 2, 3]);

        let mut t = Transport::new(Cursor::new(Vec::new()));
        block_on(t.write_all(b"ok")).unwrap();
        block_on(t.flush()).unwrap()
    }
}
