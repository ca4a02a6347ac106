//! Incoming datagrams: compression marker, inflate, truncation flag.
//!
//! ```text
//! +------+------+-------------------------------+
//! | 0x00 | 0x00 | deflate stream (zlib or raw)  |   compressed
//! +------+------+-------------------------------+
//! | reply text                                   |   plain
//! +----------------------------------------------+
//! ```
//!
//! Truncation is judged on the raw size. A compressed reply can inflate to
//! far more than the datagram ceiling, so the inflated size says nothing.

use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::TRUNCATION_THRESHOLD;
use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

/// Prefix that marks a compressed payload.
pub const COMPRESSION_MARKER: [u8; 2] = [0, 0];

/// A received datagram after decompression.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Decompressed payload.
    pub payload: Bytes,
    /// Size of the datagram as read from the socket.
    pub raw_len: usize,
    pub compressed: bool,
    pub truncated: bool,
}

impl Datagram {
    /// Builds a datagram from raw socket bytes.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ProtocolError> {
        let truncated = raw.len() >= TRUNCATION_THRESHOLD;
        let compressed = is_compressed(raw);
        let payload = decompress(raw)?;
        Ok(Self {
            payload,
            raw_len: raw.len(),
            compressed,
            truncated,
        })
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn to_reply(&self) -> Result<Reply, ProtocolError> {
        Reply::parse(&self.text(), self.truncated)
    }
}

/// Returns whether `raw` starts with the compression marker.
pub fn is_compressed(raw: &[u8]) -> bool {
    raw.len() >= COMPRESSION_MARKER.len() && raw[..2] == COMPRESSION_MARKER
}

/// Strips the marker and inflates a compressed payload.
///
/// Input without the marker (including anything shorter than two bytes) is
/// returned unchanged. A zlib wrapped stream is tried first, then a raw
/// deflate stream.
pub fn decompress(raw: &[u8]) -> Result<Bytes, ProtocolError> {
    if !is_compressed(raw) {
        return Ok(Bytes::copy_from_slice(raw));
    }

    let body = &raw[COMPRESSION_MARKER.len()..];
    match inflate(body, true) {
        Ok(out) => Ok(Bytes::from(out)),
        Err(zlib_err) => inflate(body, false).map(Bytes::from).map_err(|raw_err| {
            ProtocolError::Decompress(format!("zlib: {}; raw deflate: {}", zlib_err, raw_err))
        }),
    }
}

fn inflate(input: &[u8], zlib_header: bool) -> Result<Vec<u8>, String> {
    if input.is_empty() {
        return Err("empty stream".to_string());
    }

    let mut inflater = Decompress::new(zlib_header);
    let mut out: Vec<u8> = Vec::with_capacity(input.len() * 4);

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(1024));
        }

        let consumed = inflater.total_in() as usize;
        let before_out = out.len();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| e.to_string())?;
        let input_done = inflater.total_in() as usize >= input.len();

        match status {
            Status::StreamEnd => return Ok(out),
            // Some servers never write the final block; running dry with all
            // input consumed is the end of the stream.
            Status::BufError if input_done => return Ok(out),
            Status::Ok if input_done && out.len() < out.capacity() => return Ok(out),
            Status::Ok => {}
            Status::BufError => {
                if out.len() == before_out && out.len() < out.capacity() {
                    return Err("no progress".to_string());
                }
            }
        }
    }
}
