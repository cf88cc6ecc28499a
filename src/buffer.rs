//! Output buffering shared by the blocking and non-blocking paths.

use std::io::{self, Write};

/// Accumulates encoded request frames until they reach the socket.
///
/// Frames are appended at the tail; after a socket write drains a prefix,
/// `consume` drops the written bytes from the head.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buf: Vec<u8>,
}

impl OutputBuffer {
    /// Creates an empty buffer.
    pub fn new() -> OutputBuffer {
        OutputBuffer { buf: Vec::new() }
    }

    /// Appends bytes at the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drops `n` bytes from the head after they have been written out.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
    }

    /// The number of bytes waiting to be written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether every appended byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unwritten bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
