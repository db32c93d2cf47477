//! Bounds-checked cursor over an immutable byte buffer.
//!
//! Every read advances the position and fails with [`RelayError::Codec`]
//! instead of reading past the end of the buffer.

use crate::error::{RelayError, RelayResult};

/// Read cursor over a borrowed handshake buffer.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_u8(&mut self) -> RelayResult<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16_be(&mut self) -> RelayResult<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read exactly `n` bytes, borrowing them from the underlying buffer.
    pub fn read_bytes(&mut self, n: usize) -> RelayResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(RelayError::Codec(format!(
                "need {} bytes at offset {}, only {} available",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> RelayResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Advance past `n` bytes without inspecting them.
    pub fn skip(&mut self, n: usize) -> RelayResult<()> {
        self.read_bytes(n).map(|_| ())
    }
}
