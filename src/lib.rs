// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! An implementation of the [RFC 6455][rfc6455] websocket protocol (client
//! and server) on top of an embedded HTTP/1.1 listener.
//!
//! The crate is split into a protocol core and an HTTP layer:
//!
//! - [`base`] contains the frame model and an incremental frame header codec.
//! - [`connection`] provides a [`Sender`]/[`Receiver`] pair for an
//!   established connection, handling fragmentation, control frames and the
//!   close handshake.
//! - [`handshake`] implements the opening handshake for both roles.
//! - [`extension`] defines the extension trait and, behind the `deflate`
//!   feature, the permessage-deflate extension of [RFC 7692][rfc7692].
//! - [`http`] holds the HTTP/1.1 machinery the handshake and listener rely
//!   on: header collections, chunked transfer, cookies, request/response
//!   assembly and authentication.
//! - [`listener`] is the embedded HTTP listener with URI-prefix dispatch
//!   which upgrades matching requests into websocket sessions driven
//!   through a [`handler::BehaviorHost`].
//!
//! [rfc6455]: https://tools.ietf.org/html/rfc6455
//! [rfc7692]: https://tools.ietf.org/html/rfc7692

#![forbid(unsafe_code)]

pub mod base;
pub mod connection;
pub mod data;
pub mod extension;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod listener;


pub use connection::{Mode, Receiver, Sender};
pub use data::{Data, Incoming};

use bytes::{Buf, BytesMut};
use futures::io::{AsyncRead, AsyncReadExt};
use std::io;

/// A boxed error which can cross thread boundaries.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The result of some incremental parsing operation.
#[derive(Debug, Clone)]
pub enum Parsing<T, N = ()> {
    /// The parser needs more data.
    NeedMore(N),
    /// The parser produced a value and consumed `offset` bytes of input.
    Done {
        /// The parsed value.
        value: T,
        /// The number of input bytes consumed.
        offset: usize
    }
}

/// Payload data, either borrowed or owned.
#[derive(Debug)]
pub enum Storage<'a> {
    /// Data that is shared and can not be modified in place.
    Shared(&'a [u8]),
    /// Data that is not shared and can be modified in place.
    Unique(&'a mut [u8]),
    /// Data owned by this value.
    Owned(Vec<u8>)
}

impl AsRef<[u8]> for Storage<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Storage::Shared(d) => d,
            Storage::Unique(d) => d,
            Storage::Owned(b) => b
        }
    }
}

/// Allocation block size of [`Buffer`].
const BLOCK_SIZE: usize = 8 * 1024;

/// A read buffer which reads from its source in block-sized chunks.
#[derive(Debug, Default)]
pub struct Buffer {
    inner: BytesMut
}

impl Buffer {
    /// Create a fresh empty buffer.
    pub fn new() -> Self {
        Buffer { inner: BytesMut::new() }
    }

    /// The number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Is this buffer empty?
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Split off and return the first `n` buffered bytes.
    pub fn split_to(&mut self, n: usize) -> BytesMut {
        self.inner.split_to(n)
    }

    /// Discard the first `n` buffered bytes.
    pub fn advance(&mut self, n: usize) {
        self.inner.advance(n)
    }

    /// Read once from `reader`, appending to this buffer.
    ///
    /// Returns the number of bytes read. EOF is reported as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin
    {
        read(reader, &mut self.inner).await
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.inner.as_ref()
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.inner.as_mut()
    }
}

impl From<BytesMut> for Buffer {
    fn from(b: BytesMut) -> Self {
        Buffer { inner: b }
    }
}

impl From<Buffer> for BytesMut {
    fn from(b: Buffer) -> Self {
        b.inner
    }
}

/// Read once from `reader`, appending to `buffer`.
pub(crate) async fn read<R>(reader: &mut R, buffer: &mut BytesMut) -> io::Result<usize>
where
    R: AsyncRead + Unpin
{
    let mut block = [0u8; BLOCK_SIZE];
    let n = reader.read(&mut block).await?;
    if n == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into())
    }
    buffer.extend_from_slice(&block[.. n]);
    Ok(n)
}

/// Take and return the contents of `data`, leaving an empty `BytesMut` behind.
pub(crate) fn take(data: &mut BytesMut) -> BytesMut {
    std::mem::take(data)
}

/// Cast a `usize` to `u64` (always widening).
pub(crate) const fn as_u64(n: usize) -> u64 {
    n as u64
}
