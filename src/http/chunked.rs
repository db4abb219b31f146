// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Streaming decoder for the chunked transfer-encoding of
//! [RFC 7230, section 4.1][chunked], plus the chunk framing helpers used
//! when writing chunked bodies.
//!
//! [chunked]: https://tools.ietf.org/html/rfc7230#section-4.1

use super::{headers::Headers, Error};
use bytes::BytesMut;
use std::collections::VecDeque;

/// Max. number of characters of a chunk size line (hex digits).
const MAX_SIZE_CHARS: usize = 20;

/// Max. accumulated size of the trailer block.
const MAX_TRAILER_LEN: usize = 4 * 1024;

/// Decoder phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading a chunk size line (hex digits, optional extensions, CRLF).
    None,
    /// Reading chunk payload data.
    Data,
    /// Chunk payload complete; expecting the terminating CRLF.
    DataEnded,
    /// Zero-size chunk seen; accumulating the trailer block.
    Trailer,
    /// The final CRLF has been consumed; no further input is accepted.
    End
}

/// A byte-driven decoder for chunked transfer-encoded bodies.
///
/// Feed arbitrary splits of the input stream with [`ChunkedDecoder::decode`];
/// decoded chunk payloads accumulate in an internal queue and trailer
/// fields are collected into a header collection once the final chunk has
/// been seen.
#[derive(Debug)]
pub struct ChunkedDecoder {
    phase: Phase,
    /// Size of the chunk currently being read.
    size: u64,
    /// How much of the current chunk has been read.
    read: u64,
    /// Accumulates the hex digits of a size line.
    size_buf: String,
    /// Set while skipping a `;ext` chunk extension.
    in_extension: bool,
    /// Set when the CR of a line terminator was seen.
    saw_cr: bool,
    /// Accumulates the trailer block.
    trailer_buf: BytesMut,
    /// Decoded chunk payloads.
    chunks: VecDeque<BytesMut>,
    /// Trailer fields, available once decoding [`is_end`](Self::is_end).
    trailers: Headers
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        ChunkedDecoder::new()
    }
}

impl ChunkedDecoder {
    /// Create a new decoder at the start of a chunked body.
    pub fn new() -> Self {
        ChunkedDecoder {
            phase: Phase::None,
            size: 0,
            read: 0,
            size_buf: String::new(),
            in_extension: false,
            saw_cr: false,
            trailer_buf: BytesMut::new(),
            chunks: VecDeque::new(),
            trailers: Headers::new()
        }
    }

    /// Has the terminating chunk (and trailer) been decoded?
    pub fn is_end(&self) -> bool {
        self.phase == Phase::End
    }

    /// Take the next decoded chunk, if any.
    pub fn next_chunk(&mut self) -> Option<BytesMut> {
        self.chunks.pop_front()
    }

    /// Drain all decoded chunks into one contiguous block.
    pub fn take_data(&mut self) -> BytesMut {
        let mut out = BytesMut::new();
        while let Some(c) = self.chunks.pop_front() {
            out.unsplit(c)
        }
        out
    }

    /// The trailer fields (empty until [`is_end`](Self::is_end)).
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// Take the trailer fields out of the decoder.
    pub fn take_trailers(&mut self) -> Headers {
        std::mem::take(&mut self.trailers)
    }

    /// Decode some input, returning how many bytes were consumed.
    ///
    /// All input is consumed unless the final chunk terminator is reached,
    /// in which case the remainder belongs to the next message. Feeding a
    /// decoder that has ended fails.
    pub fn decode(&mut self, input: &[u8]) -> Result<usize, Error> {
        if self.phase == Phase::End {
            return Err(Error::Protocol("chunked stream already ended"))
        }
        let mut pos = 0;
        while pos < input.len() {
            match self.phase {
                Phase::None => pos += self.decode_size_line(&input[pos ..])?,
                Phase::Data => {
                    let want = (self.size - self.read) as usize;
                    let take = want.min(input.len() - pos);
                    if let Some(last) = self.chunks.back_mut() {
                        last.extend_from_slice(&input[pos .. pos + take]);
                    }
                    self.read += take as u64;
                    pos += take;
                    if self.read == self.size {
                        self.phase = Phase::DataEnded;
                        self.saw_cr = false
                    }
                }
                Phase::DataEnded => {
                    let b = input[pos];
                    pos += 1;
                    if !self.saw_cr && b == b'\r' {
                        self.saw_cr = true
                    } else if self.saw_cr && b == b'\n' {
                        self.reset_size_line();
                        self.phase = Phase::None
                    } else {
                        return Err(Error::Protocol("missing CRLF after chunk data"))
                    }
                }
                Phase::Trailer => {
                    let b = input[pos];
                    pos += 1;
                    if self.trailer_buf.len() >= MAX_TRAILER_LEN {
                        return Err(Error::Protocol("trailer too long"))
                    }
                    self.trailer_buf.extend_from_slice(&[b]);
                    let t = &self.trailer_buf;
                    if t.as_ref() == b"\r\n" || t.ends_with(b"\r\n\r\n") {
                        self.finish_trailer()?;
                        self.phase = Phase::End;
                        break
                    }
                }
                Phase::End => break
            }
        }
        Ok(pos)
    }

    /// Consume bytes of a chunk size line. Returns the number consumed.
    fn decode_size_line(&mut self, input: &[u8]) -> Result<usize, Error> {
        let mut pos = 0;
        while pos < input.len() {
            let b = input[pos];
            pos += 1;
            if self.saw_cr {
                if b != b'\n' {
                    return Err(Error::Protocol("malformed chunk size line"))
                }
                let size = u64::from_str_radix(&self.size_buf, 16)
                    .map_err(|_| Error::Protocol("malformed chunk size"))?;
                self.size = size;
                self.read = 0;
                if size == 0 {
                    self.trailer_buf.clear();
                    self.phase = Phase::Trailer
                } else {
                    self.chunks.push_back(BytesMut::with_capacity(size.min(64 * 1024) as usize));
                    self.phase = Phase::Data
                }
                return Ok(pos)
            }
            match b {
                b'\r' => self.saw_cr = true,
                b';' => self.in_extension = true,
                _ if self.in_extension => {} // chunk extensions are discarded
                _ => {
                    if !b.is_ascii_hexdigit() {
                        return Err(Error::Protocol("malformed chunk size"))
                    }
                    if self.size_buf.len() >= MAX_SIZE_CHARS {
                        return Err(Error::Protocol("chunk size too big"))
                    }
                    self.size_buf.push(b as char)
                }
            }
        }
        Ok(pos)
    }

    fn reset_size_line(&mut self) {
        self.size_buf.clear();
        self.in_extension = false;
        self.saw_cr = false
    }

    /// Split the accumulated trailer block into header fields.
    fn finish_trailer(&mut self) -> Result<(), Error> {
        let block = std::str::from_utf8(&self.trailer_buf)?;
        for line in block.split("\r\n").filter(|l| !l.is_empty()) {
            if let Some(i) = line.find(':') {
                let (name, value) = line.split_at(i);
                self.trailers.add_restricted(name.trim(), value[1 ..].trim())?
            } else {
                return Err(Error::Protocol("malformed trailer line"))
            }
        }
        Ok(())
    }
}

// Chunk framing //////////////////////////////////////////////////////////////////////////////////

/// Append a single chunk frame for `data` to `buf`.
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    if data.is_empty() {
        // An empty chunk would terminate the body.
        return
    }
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n")
}

/// Append the terminating zero-size chunk to `buf`.
pub fn encode_last_chunk(buf: &mut BytesMut) {
    buf.extend_from_slice(b"0\r\n\r\n")
}

/// Streams a chunked body: every write emits one chunk frame.
#[derive(Debug)]
pub struct ChunkedWriter<W> {
    writer: W,
    scratch: BytesMut
}

impl<W> ChunkedWriter<W>
where
    W: futures::io::AsyncWrite + Unpin
{
    /// Start a chunked body on the given writer (the response head with
    /// `Transfer-Encoding: chunked` must have been written already).
    pub fn new(writer: W) -> Self {
        ChunkedWriter { writer, scratch: BytesMut::new() }
    }

    /// Write one chunk frame. Empty input writes nothing.
    pub async fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        use futures::io::AsyncWriteExt;
        if data.is_empty() {
            return Ok(())
        }
        self.scratch.clear();
        encode_chunk(data, &mut self.scratch);
        self.writer.write_all(&self.scratch).await
    }

    /// Terminate the body and get the writer back.
    pub async fn finish(mut self) -> std::io::Result<W> {
        use futures::io::AsyncWriteExt;
        self.scratch.clear();
        encode_last_chunk(&mut self.scratch);
        self.writer.write_all(&self.scratch).await?;
        self.writer.flush().await?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::BytesMut;
    use crate::http::Error;
    use super::{encode_chunk, encode_last_chunk, ChunkedDecoder};

    const WIKIPEDIA: &[u8] = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";

    #[test]
    fn decodes_whole_input() {
        let mut d = ChunkedDecoder::new();
        let n = d.decode(WIKIPEDIA).unwrap();
        assert_eq!(n, WIKIPEDIA.len());
        assert!(d.is_end());
        assert_eq!(&d.take_data()[..], b"Wikipedia");
        assert!(d.trailers().is_empty())
    }

    #[test]
    fn decodes_any_split() {
        for split in 1 .. WIKIPEDIA.len() {
            let mut d = ChunkedDecoder::new();
            let mut fed = 0;
            for piece in WIKIPEDIA.chunks(split) {
                fed += d.decode(piece).unwrap()
            }
            assert_eq!(fed, WIKIPEDIA.len(), "split = {}", split);
            assert!(d.is_end(), "split = {}", split);
            assert_eq!(&d.take_data()[..], b"Wikipedia", "split = {}", split)
        }
    }

    #[test]
    fn collects_trailers() {
        let input = b"3\r\nabc\r\n0\r\nExpires: never\r\nX-Checksum: 99\r\n\r\n";
        let mut d = ChunkedDecoder::new();
        d.decode(input).unwrap();
        assert!(d.is_end());
        assert_eq!(&d.take_data()[..], b"abc");
        assert_eq!(d.trailers().get("expires"), Some("never"));
        assert_eq!(d.trailers().get("x-checksum"), Some("99"))
    }

    #[test]
    fn discards_chunk_extensions() {
        let input = b"4;name=value\r\nWiki\r\n0\r\n\r\n";
        let mut d = ChunkedDecoder::new();
        d.decode(input).unwrap();
        assert!(d.is_end());
        assert_eq!(&d.take_data()[..], b"Wiki")
    }

    #[test]
    fn leaves_pipelined_bytes() {
        let mut input = WIKIPEDIA.to_vec();
        input.extend_from_slice(b"GET / HTTP/1.1\r\n");
        let mut d = ChunkedDecoder::new();
        let n = d.decode(&input).unwrap();
        assert_eq!(n, WIKIPEDIA.len());
        assert!(d.is_end())
    }

    #[test]
    fn rejects_oversized_size_line() {
        let input = b"000000000000000000001\r\nx\r\n";
        let mut d = ChunkedDecoder::new();
        assert_matches!(d.decode(input), Err(Error::Protocol("chunk size too big")))
    }

    #[test]
    fn rejects_oversized_trailer() {
        let mut input = BytesMut::from(&b"0\r\n"[..]);
        let big = "y".repeat(5000);
        input.extend_from_slice(format!("X-Big: {}\r\n\r\n", big).as_bytes());
        let mut d = ChunkedDecoder::new();
        assert_matches!(d.decode(&input), Err(Error::Protocol("trailer too long")))
    }

    #[test]
    fn rejects_input_after_end() {
        let mut d = ChunkedDecoder::new();
        d.decode(b"0\r\n\r\n").unwrap();
        assert!(d.is_end());
        assert_matches!(d.decode(b"junk"), Err(Error::Protocol(_)))
    }

    #[test]
    fn rejects_bad_size_digits() {
        let mut d = ChunkedDecoder::new();
        assert_matches!(d.decode(b"zz\r\n"), Err(Error::Protocol("malformed chunk size")))
    }

    #[test]
    fn chunked_writer_streams_frames() {
        use futures::executor::block_on;
        use futures::io::Cursor;
        let mut w = super::ChunkedWriter::new(Cursor::new(Vec::new()));
        let inner = block_on(async {
            w.write_chunk(b"Wiki").await.unwrap();
            w.write_chunk(b"pedia").await.unwrap();
            w.write_chunk(b"").await.unwrap();
            w.finish().await.unwrap()
        });
        assert_eq!(inner.into_inner(), WIKIPEDIA.to_vec())
    }

    #[test]
    fn encode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_chunk(b"Wiki", &mut buf);
        encode_chunk(b"pedia", &mut buf);
        encode_last_chunk(&mut buf);
        assert_eq!(&buf[..], WIKIPEDIA);

        let mut d = ChunkedDecoder::new();
        d.decode(&buf).unwrap();
        assert_eq!(&d.take_data()[..], b"Wikipedia")
    }
}
