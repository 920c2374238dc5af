//! zlib-stream transport decompression
//!
//! With `compress=zlib-stream` the server deflates the whole connection as
//! one zlib stream and flushes at message boundaries. A message is complete
//! once the buffered bytes end with the sync-flush marker; the inflate
//! context carries over between messages and must be reset per socket.

use flate2::{Decompress, FlushDecompress, Status};

/// Sync-flush marker ending every complete message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const CHUNK: usize = 16 * 1024;

/// Inflater for one socket's zlib stream
#[derive(Debug)]
pub struct ZlibStream {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl ZlibStream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary frame.
    ///
    /// Returns the inflated message once a frame completes it, `None` while
    /// it is still partial.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, flate2::DecompressError> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let input = std::mem::take(&mut self.buffer);
        let mut output = Vec::with_capacity(input.len().saturating_mul(4).max(CHUNK));
        let mut offset = 0;

        loop {
            if output.capacity() - output.len() < CHUNK / 4 {
                output.reserve(CHUNK);
            }

            let before_in = self.decompress.total_in();
            let status =
                self.decompress
                    .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)?;
            let consumed = usize::try_from(self.decompress.total_in() - before_in).unwrap_or(0);
            offset += consumed;

            let output_full = output.len() == output.capacity();
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if offset >= input.len() && !output_full => break,
                Status::BufError if consumed == 0 && !output_full => break,
                _ => {}
            }
        }

        Ok(Some(output))
    }

    /// Bytes waiting for the rest of their message
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}
