//! Byte-exact JSON framing.
//!
//! JSON-RPC over a raw stream has no length prefix; messages are delimited
//! by the JSON grammar itself. The decoder scans for the end of the first
//! complete value using a depth counter and a string/escape state machine,
//! then hands the exact byte range to `serde_json`. Scan state is kept
//! across calls so a frame split over many reads is never rescanned.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value as Json;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Frames above this size indicate a broken peer and abort the connection.
const MAX_FRAME: usize = 64 * 1024 * 1024;

/// Scan position inside the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// Between frames or inside one, outside any string.
    Value,
    /// Inside a string literal.
    Str,
    /// Inside a string literal, directly after a backslash.
    Escape,
}

/// A [`Decoder`]/[`Encoder`] pair for newline-free JSON streams.
#[derive(Debug)]
pub struct JsonCodec {
    state: Scan,
    depth: usize,
    /// Bytes of the buffer already scanned.
    offset: usize,
}

impl JsonCodec {
    /// Creates a codec with empty scan state.
    pub fn new() -> Self {
        Self {
            state: Scan::Value,
            depth: 0,
            offset: 0,
        }
    }

    /// Advances the scan and returns the end offset of a complete value.
    fn find_boundary(&mut self, src: &BytesMut) -> Option<usize> {
        while self.offset < src.len() {
            let byte = src[self.offset];
            self.offset += 1;
            match self.state {
                Scan::Value => match byte {
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth = self.depth.saturating_sub(1);
                        if self.depth == 0 {
                            return Some(self.offset);
                        }
                    }
                    b'"' => self.state = Scan::Str,
                    _ => {}
                },
                Scan::Str => match byte {
                    b'"' => self.state = Scan::Value,
                    b'\\' => self.state = Scan::Escape,
                    _ => {}
                },
                Scan::Escape => self.state = Scan::Str,
            }
        }
        None
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonCodec {
    type Item = Json;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Json>> {
        // Inter-frame whitespace is legal; drop it before scanning.
        if self.depth == 0 && self.state == Scan::Value {
            let skip = src
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            src.advance(skip);
            if src.is_empty() {
                return Ok(None);
            }
            if !matches!(src[0], b'{' | b'[') {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "stream does not start with a JSON object or array",
                ));
            }
            self.offset = 0;
        }

        match self.find_boundary(src) {
            Some(end) => {
                let frame = src.split_to(end);
                self.offset = 0;
                let value = serde_json::from_slice(&frame)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(value))
            }
            None if src.len() > MAX_FRAME => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds maximum size",
            )),
            None => Ok(None),
        }
    }
}

impl Encoder<Json> for JsonCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Json, dst: &mut BytesMut) -> io::Result<()> {
        let text = serde_json::to_vec(&item)?;
        dst.reserve(text.len());
        dst.put_slice(&text);
        Ok(())
    }
}
