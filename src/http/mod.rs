// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! HTTP/1.1 machinery the websocket handshake and the embedded listener
//! depend on: header field classification, header collections, chunked
//! transfer-encoding, cookies, request/response assembly and
//! authentication.

pub mod auth;
pub mod chunked;
pub mod cookie;
pub mod field;
pub mod headers;
pub mod request;
pub mod response;

pub use headers::{Headers, Mode as HeaderMode};
pub use request::{Request, RequestHead};
pub use response::Response;

use std::io;

/// Errors of the HTTP request/response machinery.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error has been encountered.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the HTTP protocol.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The request head exceeded the request buffer capacity.
    #[error("request too large")]
    RequestTooLarge,

    /// A header collection operation failed.
    #[error(transparent)]
    Header(#[from] headers::Error),

    /// UTF-8 decoding failed.
    #[error("utf-8 decoding error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The HTTP entity could not be parsed successfully.
    #[error("http parser error: {0}")]
    Parser(#[source] crate::BoxedError)
}
