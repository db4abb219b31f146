// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A persistent websocket connection after the handshake phase, represented
//! as a [`Sender`] and [`Receiver`] pair.
//!
//! The two halves share the underlying socket and a connection phase.
//! Outgoing frames are serialized through a single writer lock, so messages
//! queued before a close are flushed before the close frame goes out.
//! Sending application data after a close frame has been sent fails with
//! [`Error::InvalidState`].

use crate::{
    base::{self, Header, OpCode, MAX_HEADER_SIZE},
    data::{ByteSlice125, Data, Incoming},
    extension::Extension,
    Buffer, Storage
};
use bytes::BytesMut;
use futures::{io::{BufWriter, ReadHalf, WriteHalf}, lock::Mutex, prelude::*, stream};
use smallvec::SmallVec;
use std::{io, sync::Arc};

/// Accumulated max. size of a complete message.
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;
/// Max. size of a single message frame.
const MAX_FRAME_SIZE: usize = MAX_MESSAGE_SIZE;
/// Write buffer capacity.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Is the connection used by a client or server?
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Client-side of a connection (implies masking of payload data).
    Client,
    /// Server-side of a connection.
    Server
}

impl Mode {
    /// Is this the client-side?
    pub fn is_client(self) -> bool {
        matches!(self, Mode::Client)
    }

    /// Is this the server-side?
    pub fn is_server(self) -> bool {
        !self.is_client()
    }
}

/// The lifecycle phase of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The opening handshake has not completed yet.
    Connecting,
    /// The connection is established and open for data.
    Open,
    /// A close frame has been sent; awaiting the peer's close.
    Closing,
    /// The close handshake completed or the connection failed.
    Closed
}

/// The close code and reason of a received close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// The close code (RFC 6455, section 7.4).
    pub code: u16,
    /// An optional UTF-8 encoded reason.
    pub reason: Option<String>
}

/// State shared between [`Sender`] and [`Receiver`].
#[derive(Debug)]
struct Status {
    phase: Phase,
    close_sent: bool,
    close_received: bool
}

impl Status {
    fn new() -> Self {
        Status { phase: Phase::Open, close_sent: false, close_received: false }
    }
}

type SharedStatus = Arc<std::sync::Mutex<Status>>;
type SharedWriter<T> = Arc<Mutex<BufWriter<WriteHalf<T>>>>;
type SharedExtensions = Arc<Mutex<SmallVec<[Box<dyn Extension + Send>; 4]>>>;

/// The sending half of a connection.
#[derive(Debug)]
pub struct Sender<T> {
    mode: Mode,
    codec: base::Codec,
    writer: SharedWriter<T>,
    status: SharedStatus,
    buffer: Vec<u8>, // mask buffer
    extensions: SharedExtensions,
    has_extensions: bool
}

/// The receiving half of a connection.
#[derive(Debug)]
pub struct Receiver<T> {
    mode: Mode,
    codec: base::Codec,
    reader: ReadHalf<T>,
    writer: SharedWriter<T>,
    status: SharedStatus,
    extensions: SharedExtensions,
    has_extensions: bool,
    buffer: Buffer, // read buffer
    message: BytesMut, // message buffer (concatenated fragment payloads)
    /// Opcode of the fragmented message currently being reassembled.
    fragment_opcode: Option<OpCode>,
    mask_buffer: Vec<u8>,
    max_message_size: usize
}

/// A connection builder.
///
/// Allows configuring certain parameters and extensions before
/// creating the [`Sender`]/[`Receiver`] pair that represents the
/// connection.
#[derive(Debug)]
pub struct Builder<T> {
    mode: Mode,
    socket: T,
    codec: base::Codec,
    extensions: SmallVec<[Box<dyn Extension + Send>; 4]>,
    buffer: Buffer,
    max_message_size: usize
}

impl<T: AsyncRead + AsyncWrite + Unpin> Builder<T> {
    /// Create a new `Builder` from the given async I/O resource and mode.
    ///
    /// **Note**: Use this type only after a successful handshake
    /// (cf. [`Client::into_builder`][1] and [`Server::into_builder`][2]
    /// for examples).
    ///
    /// [1]: crate::handshake::Client::into_builder
    /// [2]: crate::handshake::Server::into_builder
    pub fn new(socket: T, mode: Mode) -> Self {
        let mut codec = base::Codec::new(mode);
        codec.set_max_data_size(MAX_FRAME_SIZE);
        Builder {
            mode,
            socket,
            codec,
            extensions: SmallVec::new(),
            buffer: Buffer::new(),
            max_message_size: MAX_MESSAGE_SIZE
        }
    }

    /// Set a custom buffer to use.
    pub fn set_buffer(&mut self, b: BytesMut) {
        self.buffer = Buffer::from(b)
    }

    /// Add extensions to use with this connection.
    ///
    /// Only enabled extensions will be considered.
    pub fn add_extensions<I>(&mut self, extensions: I)
    where
        I: IntoIterator<Item = Box<dyn Extension + Send>>
    {
        for e in extensions.into_iter().filter(|e| e.is_enabled()) {
            log::debug!("using extension: {}", e.name());
            self.codec.add_reserved_bits(e.reserved_bits());
            self.extensions.push(e)
        }
    }

    /// Set the maximum size of a complete message.
    ///
    /// Message fragments will be buffered and concatenated up to this value,
    /// i.e. the sum of all message frames payload lengths will not be greater
    /// than this maximum. However, extensions may increase the total message
    /// size further, e.g. by decompressing the payload data.
    pub fn set_max_message_size(&mut self, max: usize) {
        self.max_message_size = max
    }

    /// Set the maximum size of a single websocket frame payload.
    pub fn set_max_frame_size(&mut self, max: usize) {
        self.codec.set_max_data_size(max);
    }

    /// Create a configured [`Sender`]/[`Receiver`] pair.
    pub fn finish(self) -> (Sender<T>, Receiver<T>) {
        let (rhlf, whlf) = self.socket.split();
        let writer = Arc::new(Mutex::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, whlf)));
        let status = Arc::new(std::sync::Mutex::new(Status::new()));
        let has_extensions = !self.extensions.is_empty();
        let extensions = Arc::new(Mutex::new(self.extensions));

        let recv = Receiver {
            mode: self.mode,
            reader: rhlf,
            writer: writer.clone(),
            status: status.clone(),
            codec: self.codec.clone(),
            extensions: extensions.clone(),
            has_extensions,
            buffer: self.buffer,
            message: BytesMut::new(),
            fragment_opcode: None,
            mask_buffer: Vec::new(),
            max_message_size: self.max_message_size
        };

        let send = Sender {
            mode: self.mode,
            writer,
            status,
            buffer: Vec::new(),
            codec: self.codec,
            extensions,
            has_extensions
        };

        (send, recv)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Receiver<T> {
    /// The current connection phase.
    pub fn phase(&self) -> Phase {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).phase
    }

    /// Receive the next websocket message.
    ///
    /// Fragmented messages will be concatenated and returned as one block.
    /// Pings are answered with a matching pong before being surfaced;
    /// a received close frame is answered (unless a close was already
    /// sent) and surfaced as [`Incoming::Closed`].
    pub async fn receive(&mut self) -> Result<Incoming, Error> {
        loop {
            if self.phase() == Phase::Closed {
                log::debug!("can not receive, connection is closed");
                return Err(Error::Closed)
            }

            let mut header = self.receive_header().await?;
            log::trace!("recv: {}", header);

            // Handle control frames.
            if header.opcode().is_control() {
                self.read_buffer(&header).await?;
                let mut data = self.buffer.split_to(header.payload_len());
                base::Codec::apply_mask(&header, data.as_mut());
                match header.opcode() {
                    OpCode::Pong => return Ok(Incoming::Pong(data)),
                    OpCode::Ping => {
                        let mut answer = Header::new(OpCode::Pong);
                        let mut unmasked = Storage::Owned(data.to_vec());
                        self.write(&mut answer, &mut unmasked).await?;
                        self.flush().await?;
                        return Ok(Incoming::Ping(data))
                    }
                    OpCode::Close => {
                        return self.on_close(&data).await.map(Incoming::Closed)
                    }
                    oc => return Err(Error::UnexpectedOpCode(oc))
                }
            }

            if header.opcode() == OpCode::Continue && header.is_rsv1() {
                log::debug!("reserved bit set on a continuation frame");
                return Err(Error::UnexpectedRsv1)
            }

            // Check if total message does not exceed maximum.
            if header.payload_len() + self.message.len() > self.max_message_size {
                log::warn!("accumulated message length exceeds maximum");
                return Err(Error::MessageTooLarge {
                    current: self.message.len() + header.payload_len(),
                    maximum: self.max_message_size
                })
            }

            self.read_buffer(&header).await?;
            base::Codec::apply_mask(&header, &mut self.buffer.as_mut()[.. header.payload_len()]);
            self.message.unsplit(self.buffer.split_to(header.payload_len()));

            match (header.is_fin(), header.opcode()) {
                (false, OpCode::Continue) => { // Intermediate message fragment.
                    if self.fragment_opcode.is_none() {
                        log::debug!("continue frame while not processing message fragments");
                        return Err(Error::UnexpectedOpCode(OpCode::Continue))
                    }
                    continue
                }
                (false, oc) => { // Initial message fragment.
                    if self.fragment_opcode.is_some() {
                        log::debug!("initial fragment while processing a fragmented message");
                        return Err(Error::UnexpectedOpCode(oc))
                    }
                    if !oc.is_data() {
                        return Err(Error::UnexpectedOpCode(oc))
                    }
                    self.fragment_opcode = Some(oc);
                    self.decode_with_extensions(&mut header).await?;
                    continue
                }
                (true, OpCode::Continue) => { // Last message fragment.
                    if let Some(oc) = self.fragment_opcode.take() {
                        header.set_payload_len(self.message.len());
                        log::trace!("last fragment: total length = {} bytes", self.message.len());
                        self.decode_with_extensions(&mut header).await?;
                        header.set_opcode(oc);
                    } else {
                        log::debug!("last continue frame while not processing message fragments");
                        return Err(Error::UnexpectedOpCode(OpCode::Continue))
                    }
                }
                (true, oc) => { // Regular non-fragmented message.
                    if self.fragment_opcode.is_some() {
                        log::debug!("regular message while processing fragmented message");
                        return Err(Error::UnexpectedOpCode(oc))
                    }
                    self.decode_with_extensions(&mut header).await?
                }
            }

            if header.opcode() == OpCode::Text {
                std::str::from_utf8(&self.message)?;
                return Ok(Incoming::Data(Data::text(crate::take(&mut self.message))))
            }

            return Ok(Incoming::Data(Data::binary(crate::take(&mut self.message))))
        }
    }

    /// Receive the next websocket message, skipping over control frames.
    ///
    /// Fragmented messages will be concatenated and returned as one block.
    /// A received close frame yields [`Error::Closed`].
    pub async fn receive_data(&mut self) -> Result<Data, Error> {
        loop {
            match self.receive().await? {
                Incoming::Data(d) => return Ok(d),
                Incoming::Closed(_) => return Err(Error::Closed),
                Incoming::Ping(_) | Incoming::Pong(_) => continue
            }
        }
    }

    /// Read the next frame header.
    async fn receive_header(&mut self) -> Result<Header, Error> {
        loop {
            match self.codec.decode_header(self.buffer.as_ref())? {
                crate::Parsing::Done { value: header, offset } => {
                    debug_assert!(offset <= MAX_HEADER_SIZE);
                    self.buffer.advance(offset);
                    return Ok(header)
                }
                crate::Parsing::NeedMore(_) => {
                    self.buffer.read_from(&mut self.reader).await?;
                }
            }
        }
    }

    /// Read more data into read buffer if necessary.
    async fn read_buffer(&mut self, header: &Header) -> Result<(), Error> {
        while self.buffer.len() < header.payload_len() {
            self.buffer.read_from(&mut self.reader).await?;
        }
        Ok(())
    }

    /// Answer an incoming close frame and conclude the close handshake.
    async fn on_close(&mut self, data: &[u8]) -> Result<Option<CloseReason>, Error> {
        let close_sent = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.close_received = true;
            status.phase = Phase::Closed;
            let sent = status.close_sent;
            status.close_sent = true;
            sent
        };

        let (mut header, reason) = close_answer(data)?;

        if !close_sent {
            if let Some(r) = &reason {
                let mut answer = r.code.to_be_bytes().to_vec();
                if let Some(text) = &r.reason {
                    answer.extend_from_slice(text.as_bytes())
                }
                self.write(&mut header, &mut Storage::Owned(answer)).await?
            } else {
                self.write(&mut header, &mut Storage::Shared(&[])).await?
            }
            self.flush().await?;
        }

        self.writer.lock().await.close().await.or(Err(Error::Closed))?;
        Ok(reason)
    }

    /// Apply all extensions to the given header and the internal message buffer.
    async fn decode_with_extensions(&mut self, header: &mut Header) -> Result<(), Error> {
        if !self.has_extensions {
            return Ok(())
        }
        for e in self.extensions.lock().await.iter_mut() {
            log::trace!("decoding with extension: {}", e.name());
            e.decode(header, &mut self.message).map_err(Error::Extension)?
        }
        Ok(())
    }

    /// Flush the socket buffer.
    async fn flush(&mut self) -> Result<(), Error> {
        log::trace!("flushing connection");
        self.writer.lock().await.flush().await.or(Err(Error::Closed))
    }

    /// Write final header and payload data to socket.
    ///
    /// The data will be masked if necessary.
    /// No extensions will be applied to header and payload data.
    async fn write(&mut self, header: &mut Header, data: &mut Storage<'_>) -> Result<(), Error> {
        write(self.mode, &mut self.codec, &self.writer, header, data, &mut self.mask_buffer).await
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Sender<T> {
    /// The current connection phase.
    pub fn phase(&self) -> Phase {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).phase
    }

    /// Send a text value over the websocket connection.
    pub async fn send_text(&mut self, data: impl AsRef<str>) -> Result<(), Error> {
        self.check_open()?;
        let mut header = Header::new(OpCode::Text);
        self.send_frame(&mut header, &mut Storage::Shared(data.as_ref().as_bytes())).await
    }

    /// Send some binary data over the websocket connection.
    pub async fn send_binary(&mut self, data: impl AsRef<[u8]>) -> Result<(), Error> {
        self.check_open()?;
        let mut header = Header::new(OpCode::Binary);
        self.send_frame(&mut header, &mut Storage::Shared(data.as_ref())).await
    }

    /// Send some binary data over the websocket connection.
    ///
    /// In contrast to [`Sender::send_binary`] the provided data is modified
    /// in-place, e.g. if masking is necessary.
    pub async fn send_binary_mut(&mut self, mut data: impl AsMut<[u8]>) -> Result<(), Error> {
        self.check_open()?;
        let mut header = Header::new(OpCode::Binary);
        self.send_frame(&mut header, &mut Storage::Unique(data.as_mut())).await
    }

    /// Ping the remote end.
    pub async fn send_ping(&mut self, data: ByteSlice125<'_>) -> Result<(), Error> {
        self.check_open()?;
        let mut header = Header::new(OpCode::Ping);
        self.write(&mut header, &mut Storage::Shared(data.as_ref())).await
    }

    /// Send an unsolicited Pong to the remote.
    pub async fn send_pong(&mut self, data: ByteSlice125<'_>) -> Result<(), Error> {
        self.check_open()?;
        let mut header = Header::new(OpCode::Pong);
        self.write(&mut header, &mut Storage::Shared(data.as_ref())).await
    }

    /// Flush the socket buffer.
    pub async fn flush(&mut self) -> Result<(), Error> {
        log::trace!("flushing connection");
        self.writer.lock().await.flush().await.or(Err(Error::Closed))
    }

    /// Send a close frame with code 1000 (normal closure).
    ///
    /// Closing is idempotent: repeated calls are no-ops. The peer's close
    /// answer is observed by the [`Receiver`], which completes the close
    /// handshake.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.close_with(1000, "").await
    }

    /// Send a close frame with the given code and reason.
    ///
    /// The code must be one permitted on the wire by RFC 6455, section 7.4
    /// and the reason must not exceed 123 bytes.
    pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        if !is_sendable_close_code(code) {
            return Err(Error::InvalidCloseCode(code))
        }
        if reason.len() > 123 {
            return Err(Error::InvalidCloseReason)
        }

        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if status.close_sent {
                return Ok(())
            }
            status.close_sent = true;
            status.phase = if status.close_received { Phase::Closed } else { Phase::Closing };
        }

        log::trace!("closing connection with code {}", code);
        let mut header = Header::new(OpCode::Close);
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        self.write(&mut header, &mut Storage::Owned(payload)).await?;
        self.flush().await
    }

    /// Fail with [`Error::InvalidState`] once a close frame has been sent.
    fn check_open(&self) -> Result<(), Error> {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.close_sent || status.phase == Phase::Closed {
            return Err(Error::InvalidState)
        }
        Ok(())
    }

    /// Send arbitrary websocket frames.
    ///
    /// Before sending, extensions will be applied to header and payload data.
    async fn send_frame(&mut self, header: &mut Header, data: &mut Storage<'_>) -> Result<(), Error> {
        if !self.has_extensions {
            return self.write(header, data).await
        }

        let mut owned = BytesMut::from(data.as_ref());
        for e in self.extensions.lock().await.iter_mut() {
            log::trace!("encoding with extension: {}", e.name());
            e.encode(header, &mut owned).map_err(Error::Extension)?
        }

        self.write(header, &mut Storage::Owned(owned.to_vec())).await
    }

    /// Write final header and payload data to socket.
    ///
    /// The data will be masked if necessary.
    /// No extensions will be applied to header and payload data.
    async fn write(&mut self, header: &mut Header, data: &mut Storage<'_>) -> Result<(), Error> {
        write(self.mode, &mut self.codec, &self.writer, header, data, &mut self.buffer).await
    }
}

/// Write header and payload data to socket.
async fn write<T: AsyncWrite + Unpin>(
    mode: Mode,
    codec: &mut base::Codec,
    writer: &SharedWriter<T>,
    header: &mut Header,
    data: &mut Storage<'_>,
    mask_buffer: &mut Vec<u8>
) -> Result<(), Error> {
    if mode.is_client() {
        header.set_masked(true);
        header.set_mask(rand::random());
    }
    header.set_payload_len(data.as_ref().len());

    log::trace!("send: {}", header);

    let header_bytes = codec.encode_header(header).to_vec();
    let mut w = writer.lock().await;
    w.write_all(&header_bytes).await.or(Err(Error::Closed))?;

    if !header.is_masked() {
        return w.write_all(data.as_ref()).await.or(Err(Error::Closed))
    }

    match data {
        Storage::Shared(slice) => {
            mask_buffer.clear();
            mask_buffer.extend_from_slice(slice);
            base::Codec::apply_mask(header, mask_buffer);
            w.write_all(mask_buffer).await.or(Err(Error::Closed))
        }
        Storage::Unique(slice) => {
            base::Codec::apply_mask(header, slice);
            w.write_all(slice).await.or(Err(Error::Closed))
        }
        Storage::Owned(ref mut bytes) => {
            base::Codec::apply_mask(header, bytes);
            w.write_all(bytes).await.or(Err(Error::Closed))
        }
    }
}

/// Check if the close code is one we may send out (RFC 6455, section 7.4).
fn is_sendable_close_code(code: u16) -> bool {
    matches!(code, 1000 ..= 1003 | 1007 ..= 1011 | 3000 ..= 4999)
}

/// Create a close answer based on the given close frame payload.
fn close_answer(data: &[u8]) -> Result<(Header, Option<CloseReason>), Error> {
    let answer = Header::new(OpCode::Close);
    if data.len() < 2 {
        return Ok((answer, None))
    }
    let code = u16::from_be_bytes([data[0], data[1]]);
    let reason =
        if data.len() > 2 {
            Some(String::from(std::str::from_utf8(&data[2 ..])?))
        } else {
            None
        };
    match code {
        | 1000 ..= 1003
        | 1007 ..= 1011
        | 1015
        | 3000 ..= 4999 => Ok((answer, Some(CloseReason { code, reason }))),
        // Invalid close code on the wire, e.g. the reserved 1005/1006
        // range. Answer with a protocol error.
        _ => Ok((answer, Some(CloseReason { code: 1002, reason: None })))
    }
}

/// Turn a [`Receiver`] into a [`futures::Stream`].
pub fn into_stream<T>(r: Receiver<T>) -> impl stream::Stream<Item = Result<Incoming, Error>>
where
    T: AsyncRead + AsyncWrite + Unpin
{
    stream::unfold(r, |mut r| async {
        match r.receive().await {
            Ok(item) => Some((Ok(item), r)),
            Err(Error::Closed) => None,
            Err(e) => Some((Err(e), r))
        }
    })
}

/// Errors which may occur when sending or receiving messages.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error was encountered.
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),

    /// The base codec errored.
    #[error("codec error: {0}")]
    Codec(#[from] base::Error),

    /// An extension produced an error while encoding or decoding.
    #[error("extension error: {0}")]
    Extension(#[source] crate::BoxedError),

    /// An unexpected opcode was encountered.
    #[error("unexpected opcode: {0}")]
    UnexpectedOpCode(OpCode),

    /// A continuation frame carried the rsv1 bit.
    #[error("reserved bit set on a continuation frame")]
    UnexpectedRsv1,

    /// A payload was not correctly UTF-8 encoded.
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The total message payload data size exceeds the configured maximum.
    #[error("message too large: len >= {current}, maximum = {maximum}")]
    MessageTooLarge {
        /// Accumulated message length.
        current: usize,
        /// The configured maximum.
        maximum: usize
    },

    /// A close code outside the sendable range was given.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// A close reason longer than 123 bytes was given.
    #[error("close reason exceeds 123 bytes")]
    InvalidCloseReason,

    /// The operation is not permitted in the current connection phase.
    #[error("operation not valid in current connection state")]
    InvalidState,

    /// The connection is closed.
    #[error("connection closed")]
    Closed
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Closed
        } else {
            Error::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use crate::data::{ByteSlice125, Incoming};
    use std::convert::TryFrom;
    use tokio::io::DuplexStream;
    use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
    use super::{close_answer, is_sendable_close_code, Builder, CloseReason, Error, Mode, Phase, Receiver, Sender};

    type Half = (Sender<Compat<DuplexStream>>, Receiver<Compat<DuplexStream>>);

    /// An in-memory client/server connection pair.
    fn pair() -> (Half, Half) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = Builder::new(a.compat(), Mode::Client).finish();
        let server = Builder::new(b.compat(), Mode::Server).finish();
        (client, server)
    }

    #[tokio::test]
    async fn masked_text_roundtrip() {
        let ((mut cs, _cr), (_ss, mut sr)) = pair();
        cs.send_text("Hello").await.unwrap();
        cs.flush().await.unwrap();
        let message = sr.receive_data().await.unwrap();
        assert!(message.is_text());
        assert_eq!(message.as_ref(), b"Hello")
    }

    #[tokio::test]
    async fn ping_is_answered_with_same_payload() {
        let ((mut cs, mut cr), (_ss, mut sr)) = pair();
        let payload = ByteSlice125::try_from(&b"are you there"[..]).unwrap();
        cs.send_ping(payload).await.unwrap();
        cs.flush().await.unwrap();

        assert_matches!(sr.receive().await, Ok(Incoming::Ping(p)) if p.as_ref() == b"are you there");
        assert_matches!(cr.receive().await, Ok(Incoming::Pong(p)) if p.as_ref() == b"are you there")
    }

    #[tokio::test]
    async fn send_after_close_is_invalid_state() {
        let ((mut cs, _cr), (_ss, mut sr)) = pair();
        cs.close().await.unwrap();
        assert_eq!(cs.phase(), Phase::Closing);
        assert_matches!(cs.send_text("late").await, Err(Error::InvalidState));

        // The peer observes the close and answers it.
        assert_matches!(
            sr.receive().await,
            Ok(Incoming::Closed(Some(CloseReason { code: 1000, .. })))
        )
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let ((mut cs, _cr), _server) = pair();
        cs.close_with(1001, "going away").await.unwrap();
        cs.close().await.unwrap();
        cs.close_with(4000, "again").await.unwrap()
    }

    #[tokio::test]
    async fn unsendable_close_codes_are_rejected() {
        let ((mut cs, _cr), _server) = pair();
        assert_matches!(cs.close_with(1005, "").await, Err(Error::InvalidCloseCode(1005)));
        assert_matches!(cs.close_with(2500, "").await, Err(Error::InvalidCloseCode(2500)));
        let long = "x".repeat(124);
        assert_matches!(cs.close_with(1000, &long).await, Err(Error::InvalidCloseReason))
    }

    #[test]
    fn sendable_close_codes() {
        for code in [1000, 1001, 1002, 1003, 1007, 1011, 3000, 4999] {
            assert!(is_sendable_close_code(code), "{} should be sendable", code)
        }
        for code in [0, 999, 1004, 1005, 1006, 1015, 2999, 5000] {
            assert!(!is_sendable_close_code(code), "{} should not be sendable", code)
        }
    }

    #[test]
    fn close_answer_echoes_valid_code() {
        let payload = [0x03, 0xe8, b'b', b'y', b'e']; // 1000 + "bye"
        let (_, reason) = close_answer(&payload).unwrap();
        assert_eq!(reason, Some(CloseReason { code: 1000, reason: Some("bye".into()) }))
    }

    #[test]
    fn close_answer_rejects_reserved_code() {
        let payload = 1005_u16.to_be_bytes();
        let (_, reason) = close_answer(&payload).unwrap();
        assert_eq!(reason, Some(CloseReason { code: 1002, reason: None }))
    }

    #[test]
    fn close_answer_without_code() {
        let (_, reason) = close_answer(&[]).unwrap();
        assert_eq!(reason, None)
    }
}
