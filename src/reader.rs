//! Incremental reply parsing from a byte stream.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error::ResponseError;
use crate::error::{Error, Result};
use crate::wire_protocol::header::Header;
use crate::wire_protocol::reply::Reply;

/// Compact the input buffer once the read cursor passes this many bytes,
/// to avoid a memmove on every consumed frame.
const COMPACT_THRESHOLD: usize = 1024;

/// Default maximum spare capacity kept alive by an idle reader buffer.
pub const DEFAULT_MAX_IDLE_BUF: usize = 16 * 1024;

/// Accumulates bytes read from the socket and parses them into replies.
///
/// Bytes arrive in arbitrary chunks through `feed`; `next_reply` returns
/// the next complete reply, or `None` until the declared frame length has
/// been buffered. The reader is reusable across any number of frames.
///
/// A parse failure poisons the reader: every later `feed` or `next_reply`
/// reports the original protocol error.
#[derive(Debug)]
pub struct FrameReader {
    /// Buffered input not yet consumed by a completed frame.
    buf: Vec<u8>,
    /// Read cursor into `buf`; always <= `buf.len()`.
    pos: usize,
    /// Length of the frame currently being buffered, 0 when unknown.
    pktlen: usize,
    /// Spare capacity above which an idle buffer is released.
    max_idle_buf: usize,
    /// Description of the latched protocol failure, if any.
    err: Option<String>,
}

impl FrameReader {
    /// Creates a reader with the default idle-buffer limit.
    pub fn new() -> FrameReader {
        FrameReader::with_max_idle_buf(DEFAULT_MAX_IDLE_BUF)
    }

    /// Creates a reader that releases its buffer whenever the buffer is
    /// logically empty and its capacity exceeds `max_idle_buf` bytes.
    /// A limit of zero disables the release.
    pub fn with_max_idle_buf(max_idle_buf: usize) -> FrameReader {
        FrameReader {
            buf: Vec::new(),
            pos: 0,
            pktlen: 0,
            max_idle_buf,
            err: None,
        }
    }

    /// Appends bytes received from the socket to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(ref msg) = self.err {
            return Err(ResponseError(msg.clone()));
        }

        // Release an oversized buffer once every buffered byte has been
        // consumed, rather than carrying a burst-sized allocation forever.
        if self.remaining() == 0 && self.max_idle_buf != 0 && self.buf.capacity() > self.max_idle_buf
        {
            self.buf = Vec::new();
            self.pos = 0;
        }

        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Returns the next completed reply, or `None` when more bytes are
    /// required.
    pub fn next_reply(&mut self) -> Result<Option<Reply>> {
        if let Some(ref msg) = self.err {
            return Err(ResponseError(msg.clone()));
        }

        if self.remaining() < 4 {
            return Ok(None);
        }

        if self.pktlen == 0 {
            let declared = LittleEndian::read_i32(&self.buf[self.pos..self.pos + 4]);
            if declared < Header::LENGTH {
                return Err(self.poison(format!("invalid message length {}", declared)));
            }
            self.pktlen = declared as usize;
        }

        if self.remaining() < self.pktlen {
            return Ok(None);
        }

        let frame = &self.buf[self.pos..self.pos + self.pktlen];
        let reply = match Reply::from_frame(frame) {
            Ok(reply) => reply,
            Err(err) => {
                self.poison(err.to_string());
                return Err(err);
            }
        };

        self.pos += self.pktlen;
        self.pktlen = 0;

        // Discard part of the buffer when we've consumed at least 1k, to
        // avoid unnecessary memmoves on every frame.
        if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        Ok(Some(reply))
    }

    /// The number of buffered bytes not yet consumed by a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.remaining()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    // Drops all buffered input and latches the failure so later calls
    // cannot resynchronize mid-stream.
    fn poison(&mut self, msg: String) -> Error {
        self.buf = Vec::new();
        self.pos = 0;
        self.pktlen = 0;
        self.err = Some(msg.clone());
        ResponseError(msg)
    }
}
