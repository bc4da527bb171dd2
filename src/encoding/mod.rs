//! Byte-level codec primitives shared by the block formats.
//!
//! - [`varint`]: unsigned varints and big-endian fixed-width integers
//! - [`bitpack`]: MSB-first fixed-width bit packing
//! - [`intseq`]: delta + bit-packed monotonic integer sequences
//! - [`delta`]: shared-prefix key encoding state

pub mod bitpack;
pub mod delta;
pub mod intseq;
pub mod varint;

pub use bitpack::{packed_len, BitReader, BitWriter};
pub use delta::{DeltaKeyDecoder, DeltaKeyEncoder};
pub use varint::{write_fixed32, write_varint};

use crate::error::{Error, Result};

/// A positioned reader over a byte slice.
///
/// All the on-disk formats are parsed through this cursor; it fails with
/// [`Error::Corruption`] instead of panicking when a field runs past the end
/// of the data.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position from the start of the data.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Moves the cursor to an absolute position.
    pub fn seek_to(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::corruption(format!(
                "seek to {} past end of {} bytes",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::corruption("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads `len` bytes and returns them as a slice of the underlying data.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::corruption(format!(
                "need {} bytes, {} remaining",
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a big-endian fixed-width u32.
    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Reads an unsigned varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(Error::corruption("varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}
