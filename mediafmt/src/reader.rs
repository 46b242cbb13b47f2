//! Bounds-checked cursor over a fully loaded byte buffer.
//!
//! All structural parsers walk their file through a `SliceReader`: a borrowed
//! slice plus a byte offset. Every read of N bytes first checks that N bytes
//! remain and fails with [`TruncatedError`] otherwise, so the per-format code
//! never indexes the buffer directly.

use crate::byteorder;
use crate::errors::TruncatedError;

pub type ReadResult<T> = Result<T, TruncatedError>;

#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reader over `data[start..end]` that still reports absolute offsets.
    /// A start at or past the end yields an exhausted reader.
    pub fn with_window(data: &'a [u8], start: usize, end: usize) -> Self {
        let data = &data[..end.min(data.len())];
        Self {
            data,
            pos: start.min(data.len()),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek_to(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    #[inline]
    fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(TruncatedError {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> ReadResult<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        self.take(n)
    }

    /// Borrowed view without advancing the cursor.
    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.data.get(self.pos..self.pos + n)
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        self.take(1).map(|s| s[0])
    }

    pub fn read_tag(&mut self) -> ReadResult<[u8; 4]> {
        let slice = self.take(4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    pub fn read_u16_be(&mut self) -> ReadResult<u16> {
        self.take(2).map(byteorder::u16_be)
    }

    pub fn read_u24_be(&mut self) -> ReadResult<u32> {
        self.take(3).map(byteorder::u24_be)
    }

    pub fn read_u32_be(&mut self) -> ReadResult<u32> {
        self.take(4).map(byteorder::u32_be)
    }

    pub fn read_u64_be(&mut self) -> ReadResult<u64> {
        self.take(8).map(byteorder::u64_be)
    }

    pub fn read_u16_le(&mut self) -> ReadResult<u16> {
        self.take(2).map(byteorder::u16_le)
    }

    pub fn read_u32_le(&mut self) -> ReadResult<u32> {
        self.take(4).map(byteorder::u32_le)
    }

    pub fn read_f64_be(&mut self) -> ReadResult<f64> {
        self.take(8).map(byteorder::f64_be)
    }

    pub fn read_fixed_16_16_be(&mut self) -> ReadResult<f32> {
        self.take(4).map(byteorder::fixed_16_16_be)
    }

    pub fn read_fixed_8_8_be(&mut self) -> ReadResult<f32> {
        self.take(2).map(byteorder::fixed_8_8_be)
    }

    /// Big-endian unsigned integer of 1..=4 bytes (FLV NAL length prefixes).
    pub fn read_uint_be(&mut self, width: usize) -> ReadResult<u32> {
        debug_assert!((1..=4).contains(&width));
        let slice = self.take(width)?;
        Ok(slice.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }
}
