// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Deflate compression extension mostly conformant with [RFC 7692][rfc7692].
//!
//! [rfc7692]: https://tools.ietf.org/html/rfc7692

use crate::{
    as_u64,
    base::{Header, OpCode},
    connection::Mode,
    extension::{Extension, Param},
    BoxedError
};
use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use log::{debug, trace};
use smallvec::SmallVec;

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Marker appended to message payloads before inflating and removed
/// after deflating (cf. RFC 7692, sections 7.2.1 and 7.2.2).
const TAIL: [u8; 4] = [0, 0, 0xFF, 0xFF];

/// The permessage-deflate extension.
///
/// Window bits of 8 are accepted during negotiation but rounded up to 9,
/// the smallest window zlib supports.
#[derive(Debug)]
pub struct Deflate {
    mode: Mode,
    enabled: bool,
    buffer: BytesMut,
    params: SmallVec<[Param<'static>; 4]>,
    our_max_window_bits: u8,
    their_max_window_bits: u8,
    our_no_context_takeover: bool,
    their_no_context_takeover: bool,
    await_last_fragment: bool,
    deflater: Option<Compress>,
    inflater: Option<Decompress>
}

impl Deflate {
    /// Create a new deflate extension either on client or server side.
    pub fn new(mode: Mode) -> Self {
        let params = match mode {
            Mode::Server => SmallVec::new(),
            Mode::Client => {
                let mut params = SmallVec::new();
                params.push(Param::new(SERVER_NO_CONTEXT_TAKEOVER));
                params.push(Param::new(CLIENT_NO_CONTEXT_TAKEOVER));
                params.push(Param::new(CLIENT_MAX_WINDOW_BITS));
                params
            }
        };
        Deflate {
            mode,
            enabled: false,
            buffer: BytesMut::new(),
            params,
            our_max_window_bits: 15,
            their_max_window_bits: 15,
            our_no_context_takeover: mode.is_client(),
            their_no_context_takeover: mode.is_client(),
            await_last_fragment: false,
            deflater: None,
            inflater: None
        }
    }

    /// Set the server's max. window bits.
    ///
    /// The value must be within 9 ..= 15.
    /// The extension must be in client mode.
    ///
    /// By including this parameter, a client limits the LZ77 sliding window
    /// size that the server will use to compress messages. A server accepts
    /// by including the "server_max_window_bits" extension parameter in the
    /// response with the same or smaller value as the offer.
    pub fn set_max_server_window_bits(&mut self, max: u8) {
        assert!(self.mode == Mode::Client, "setting max. server window bits requires client mode");
        assert!(max > 8 && max <= 15, "max. server window bits have to be within 9 ..= 15");
        self.their_max_window_bits = max;
        let mut p = Param::new(SERVER_MAX_WINDOW_BITS);
        p.set_value(Some(max.to_string()));
        self.params.push(p);
    }

    /// Set the client's max. window bits.
    ///
    /// The value must be within 9 ..= 15.
    /// The extension must be in client mode.
    ///
    /// The parameter informs the server that even if it doesn't include the
    /// "client_max_window_bits" extension parameter in the response with a
    /// value greater than the one in the negotiation offer or if it doesn't
    /// include the extension parameter at all, the client is not going to
    /// use an LZ77 sliding window size greater than one given here.
    /// The server may also respond with a smaller value which allows the
    /// client to reduce its sliding window even more.
    pub fn set_max_client_window_bits(&mut self, max: u8) {
        assert!(self.mode == Mode::Client, "setting max. client window bits requires client mode");
        assert!(max > 8 && max <= 15, "max. client window bits have to be within 9 ..= 15");
        self.our_max_window_bits = max;
        if let Some(p) = self.params.iter_mut().find(|p| p.name() == CLIENT_MAX_WINDOW_BITS) {
            p.set_value(Some(max.to_string()));
        } else {
            let mut p = Param::new(CLIENT_MAX_WINDOW_BITS);
            p.set_value(Some(max.to_string()));
            self.params.push(p);
        }
    }

    fn set_their_max_window_bits(&mut self, p: &Param, expected: Option<u8>) -> Result<(), ()> {
        if let Some(Ok(v)) = p.value().map(|s| s.parse::<u8>()) {
            if !(8 ..= 15).contains(&v) {
                debug!("invalid {}: {} (expected range: 8 ..= 15)", p.name(), v);
                return Err(())
            }
            if let Some(x) = expected {
                if v > x {
                    debug!("invalid {}: {} (expected: {} <= {})", p.name(), v, v, x);
                    return Err(())
                }
            }
            // zlib does not support windows smaller than 9 bits.
            self.their_max_window_bits = std::cmp::max(9, v);
        }
        Ok(())
    }
}

impl Extension for Deflate {
    fn name(&self) -> &str {
        "permessage-deflate"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn configure(&mut self, params: &[Param]) -> Result<(), BoxedError> {
        match self.mode {
            Mode::Server => {
                // Answer the client's offer with a compatible subset.
                self.params.clear();
                self.our_no_context_takeover = false;
                self.their_no_context_takeover = false;
                for p in params {
                    match p.name() {
                        CLIENT_MAX_WINDOW_BITS =>
                            if self.set_their_max_window_bits(p, None).is_err() {
                                return Ok(())
                            }
                        SERVER_MAX_WINDOW_BITS => {
                            if let Some(Ok(v)) = p.value().map(|s| s.parse::<u8>()) {
                                // The RFC allows 8 to 15 bits, but due to zlib limitations we
                                // only support 9 to 15.
                                if !(9 ..= 15).contains(&v) {
                                    debug!("unacceptable server_max_window_bits: {}", v);
                                    return Ok(())
                                }
                                let mut x = Param::new(SERVER_MAX_WINDOW_BITS);
                                x.set_value(Some(v.to_string()));
                                self.params.push(x);
                                self.our_max_window_bits = v;
                            } else {
                                debug!("invalid server_max_window_bits: {:?}", p.value());
                                return Ok(())
                            }
                        }
                        CLIENT_NO_CONTEXT_TAKEOVER => {
                            self.their_no_context_takeover = true;
                            self.params.push(Param::new(CLIENT_NO_CONTEXT_TAKEOVER));
                        }
                        SERVER_NO_CONTEXT_TAKEOVER => {
                            self.our_no_context_takeover = true;
                            self.params.push(Param::new(SERVER_NO_CONTEXT_TAKEOVER));
                        }
                        _ => {
                            debug!("{}: unknown parameter: {}", self.name(), p.name());
                            return Ok(())
                        }
                    }
                }
            }
            Mode::Client => {
                // Verify the acceptance lies within our offer.
                let mut server_no_context_takeover = false;
                for p in params {
                    match p.name() {
                        SERVER_NO_CONTEXT_TAKEOVER => server_no_context_takeover = true,
                        CLIENT_NO_CONTEXT_TAKEOVER => {} // must be supported
                        SERVER_MAX_WINDOW_BITS => {
                            let expected = Some(self.their_max_window_bits);
                            if self.set_their_max_window_bits(p, expected).is_err() {
                                return Ok(())
                            }
                        }
                        CLIENT_MAX_WINDOW_BITS =>
                            if let Some(Ok(v)) = p.value().map(|s| s.parse::<u8>()) {
                                if !(8 ..= 15).contains(&v) {
                                    debug!("unacceptable client_max_window_bits: {}", v);
                                    return Ok(())
                                }
                                use std::cmp::{max, min};
                                // Due to zlib limitations we have to use 9 as a lower bound
                                // here, even if the server allowed us to go down to 8 bits.
                                self.our_max_window_bits = min(self.our_max_window_bits, max(9, v));
                            }
                        _ => {
                            debug!("{}: unknown parameter: {}", self.name(), p.name());
                            return Ok(())
                        }
                    }
                }
                if !server_no_context_takeover {
                    debug!("{}: server did not confirm no context takeover", self.name());
                    return Ok(())
                }
                self.their_no_context_takeover = true;
            }
        }
        self.enabled = true;
        Ok(())
    }

    fn reserved_bits(&self) -> (bool, bool, bool) {
        (true, false, false)
    }

    fn decode(&mut self, header: &mut Header, data: &mut BytesMut) -> Result<(), BoxedError> {
        match header.opcode() {
            OpCode::Binary | OpCode::Text if header.is_rsv1() => {
                if !header.is_fin() {
                    self.await_last_fragment = true;
                    trace!("deflate: not decoding {}; awaiting last fragment", header);
                    return Ok(())
                }
                trace!("deflate: decoding {}", header)
            }
            OpCode::Continue if header.is_fin() && self.await_last_fragment => {
                self.await_last_fragment = false;
                trace!("deflate: decoding {}", header)
            }
            _ => {
                trace!("deflate: not decoding {}", header);
                return Ok(())
            }
        }

        if data.is_empty() {
            header.set_rsv1(false);
            return Ok(())
        }

        data.extend_from_slice(&TAIL);

        let their_max_window_bits = self.their_max_window_bits;
        let inflater = match &mut self.inflater {
            Some(d) if !self.their_no_context_takeover => d,
            slot => slot.insert(Decompress::new_with_window_bits(false, their_max_window_bits))
        };

        let start_in = inflater.total_in();
        let mut out = Vec::with_capacity(2 * data.len());
        while inflater.total_in() - start_in < as_u64(data.len()) {
            let off = (inflater.total_in() - start_in) as usize;
            if out.capacity() == out.len() {
                out.reserve(std::cmp::max(1024, data.len() - off))
            }
            let status = inflater.decompress_vec(&data[off ..], &mut out, FlushDecompress::Sync)?;
            if status == flate2::Status::StreamEnd {
                // A final deflate block ends the stream before the tail
                // is consumed.
                break
            }
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(&out);
        std::mem::swap(&mut self.buffer, data);
        header.set_rsv1(false);
        header.set_payload_len(data.len());

        Ok(())
    }

    fn encode(&mut self, header: &mut Header, data: &mut BytesMut) -> Result<(), BoxedError> {
        if let OpCode::Binary | OpCode::Text = header.opcode() {
            trace!("deflate: encoding {}", header)
        } else {
            trace!("deflate: not encoding {}", header);
            return Ok(())
        }

        if data.is_empty() {
            return Ok(())
        }

        let our_max_window_bits = self.our_max_window_bits;
        let deflater = match &mut self.deflater {
            Some(c) if !self.our_no_context_takeover => c,
            slot => slot.insert(Compress::new_with_window_bits(Compression::fast(), false, our_max_window_bits))
        };

        let start_in = deflater.total_in();
        let mut out = Vec::with_capacity(data.len() + 16);
        while deflater.total_in() - start_in < as_u64(data.len()) {
            let off = (deflater.total_in() - start_in) as usize;
            if out.capacity() == out.len() {
                out.reserve(std::cmp::max(1024, data.len() - off))
            }
            deflater.compress_vec(&data[off ..], &mut out, FlushCompress::Sync)?;
        }
        // Make sure the sync flush marker is fully written out.
        loop {
            let n = deflater.total_out();
            if out.capacity() - out.len() < 16 {
                out.reserve(16)
            }
            deflater.compress_vec(&[], &mut out, FlushCompress::Sync)?;
            if deflater.total_out() == n {
                break
            }
        }

        debug_assert!(out.ends_with(&TAIL));
        out.truncate(out.len() - TAIL.len());

        self.buffer.clear();
        self.buffer.extend_from_slice(&out);
        std::mem::swap(&mut self.buffer, data);
        header.set_rsv1(true);
        header.set_payload_len(data.len());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        base::{Header, OpCode},
        connection::Mode,
        extension::{Extension, Param}
    };
    use bytes::BytesMut;
    use super::Deflate;

    fn configured_pair() -> (Deflate, Deflate) {
        let mut client = Deflate::new(Mode::Client);
        let mut server = Deflate::new(Mode::Server);
        server.configure(client.params()).unwrap();
        let answer: Vec<Param<'static>> =
            server.params().iter().cloned().map(Param::acquire).collect();
        client.configure(&answer).unwrap();
        assert!(client.is_enabled());
        assert!(server.is_enabled());
        (client, server)
    }

    #[test]
    fn negotiation_enables_both_sides() {
        configured_pair();
    }

    #[test]
    fn client_rejects_larger_window_than_offered() {
        let mut client = Deflate::new(Mode::Client);
        client.set_max_server_window_bits(10);
        let mut answer = Vec::new();
        answer.push(Param::new("server_no_context_takeover"));
        let mut p = Param::new("server_max_window_bits");
        p.set_value(Some("12"));
        answer.push(p);
        client.configure(&answer).unwrap();
        assert!(!client.is_enabled())
    }

    #[test]
    fn encode_decode_roundtrip() {
        let (mut client, mut server) = configured_pair();
        let text = "Hello! This text deflates poorly but still round trips. Hello again!";

        let mut header = Header::new(OpCode::Text);
        header.set_payload_len(text.len());
        let mut payload = BytesMut::from(text.as_bytes());

        client.encode(&mut header, &mut payload).unwrap();
        assert!(header.is_rsv1());
        assert_ne!(&payload[..], text.as_bytes());

        server.decode(&mut header, &mut payload).unwrap();
        assert!(!header.is_rsv1());
        assert_eq!(header.payload_len(), text.len());
        assert_eq!(&payload[..], text.as_bytes())
    }

    #[test]
    fn multiple_messages_roundtrip() {
        let (mut client, mut server) = configured_pair();
        for msg in ["first message", "second message", "third message"] {
            let mut header = Header::new(OpCode::Text);
            header.set_payload_len(msg.len());
            let mut payload = BytesMut::from(msg.as_bytes());
            client.encode(&mut header, &mut payload).unwrap();
            server.decode(&mut header, &mut payload).unwrap();
            assert_eq!(&payload[..], msg.as_bytes())
        }
    }

    #[test]
    fn control_frames_pass_through() {
        let (mut client, _) = configured_pair();
        let mut header = Header::new(OpCode::Ping);
        let mut payload = BytesMut::from(&b"liveness"[..]);
        client.encode(&mut header, &mut payload).unwrap();
        assert!(!header.is_rsv1());
        assert_eq!(&payload[..], b"liveness")
    }
}
