//! Decodes one flushed block; sequential iteration and in-block seek.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::blocks::encoding as block_encoding;
use crate::blocks::BLOCK_MAGIC;
use crate::encoding::intseq;
use crate::encoding::{packed_len, BitReader, ByteReader, DeltaKeyDecoder};
use crate::entry::{BlockEntry, BlockStats};
use crate::error::{Error, Result};

/// A fully decoded block: owned entry bytes plus the restart-point and
/// hash indexes.
///
/// Each reader instance carries private cursor state and must not be
/// shared across concurrent scans.
pub struct BlockReader {
    stats: BlockStats,
    body: Vec<u8>,
    pos: usize,
    restarts: Vec<u32>,
    hash_buckets: Vec<u32>,
    key_delta: DeltaKeyDecoder,
    /// Entry decoded ahead of the cursor by a seek.
    pending: Option<BlockEntry>,
}

impl BlockReader {
    /// Reads and decodes one block starting at the reader's position.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let start = std::time::Instant::now();

        let magic = reader.read_fixed32()?;
        if magic != BLOCK_MAGIC {
            return Err(Error::corruption(format!(
                "invalid block magic: expected {:#010x} got {:#010x}",
                BLOCK_MAGIC, magic
            )));
        }

        let stats = BlockStats::read_from(reader)?;
        let body = block_encoding::decode(reader)?;

        // restart[0] is implicit and was not stored
        let restarts = intseq::decode_sequence(reader, 1)?;
        let hash_buckets = read_hash_index(reader)?;

        log::debug!(
            "block load: {} rows, {} bytes, {} restarts in {:?}",
            stats.row_count(),
            body.len(),
            restarts.len(),
            start.elapsed()
        );

        let key_delta = DeltaKeyDecoder::new(stats.key_max_length());
        Ok(Self { stats, body, pos: 0, restarts, hash_buckets, key_delta, pending: None })
    }

    /// Stats recorded when this block was flushed.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// The decoded hash-index buckets: 0 empty, 1 collision, otherwise
    /// `2 + restart_index`.
    ///
    /// Loaded for every block but not consulted by [`BlockReader::seek_to`],
    /// which always binary-searches the restart points.
    pub fn hash_buckets(&self) -> &[u32] {
        &self.hash_buckets
    }

    /// Returns true while entries remain.
    pub fn has_more_entries(&self) -> bool {
        self.pending.is_some() || self.pos < self.body.len()
    }

    /// Decodes and returns the next entry.
    pub fn next_entry(&mut self) -> Result<BlockEntry> {
        if let Some(entry) = self.pending.take() {
            return Ok(entry);
        }
        self.decode_entry()
    }

    fn decode_entry(&mut self) -> Result<BlockEntry> {
        let mut reader = ByteReader::new(&self.body);
        reader.seek_to(self.pos)?;

        let seq_id = reader.read_varint()?;
        let timestamp = reader.read_varint()?;
        let flags = reader.read_varint()?;
        let key_shared = reader.read_varint()? as usize;
        let key_unshared = reader.read_varint()? as usize;
        let value_len = reader.read_varint()? as usize;

        if key_shared > self.key_delta.len() {
            return Err(Error::corruption(format!(
                "entry shares {} key bytes but only {} are known",
                key_shared,
                self.key_delta.len()
            )));
        }
        let unshared = reader.read_slice(key_unshared)?;
        let value = Bytes::copy_from_slice(reader.read_slice(value_len)?);
        let key = Bytes::copy_from_slice(self.key_delta.apply(key_shared, unshared));
        self.pos = reader.pos();

        Ok(BlockEntry { key, value, seq_id, timestamp, flags })
    }

    /// Positions the cursor at the first entry with key ≥ `key` (or past
    /// the last entry if every key is smaller) and returns the restart
    /// index the cursor landed in.
    ///
    /// Binary search over the restart points narrows to one restart range,
    /// then a linear decode inside it finds the entry; the ~4KB restart
    /// granularity bounds the scan.
    pub fn seek_to(&mut self, key: &[u8]) -> Result<usize> {
        let start = std::time::Instant::now();

        // lower-bound search: ranges left of the answer scan to None (all
        // keys smaller), the answer range and everything after it scan to
        // Some. Landing on the boundary keeps duplicate keys that span
        // restart ranges in version order.
        let mut low = 0isize;
        let mut high = self.restarts.len() as isize - 1;
        while low <= high {
            let mid = (low + high) / 2;
            match self.scan_restart(mid as usize, key)? {
                Some(_) => high = mid - 1,
                None => low = mid + 1,
            }
        }

        let target = high.max(0) as usize;
        self.scan_restart(target, key)?;
        log::debug!("block seek took {:?}", start.elapsed());
        Ok(target)
    }

    /// Linearly decodes the restart range `index`, stopping at the first
    /// entry with key ≥ `key`. That entry (if any) becomes the pending
    /// cursor value; returns its comparison against `key`, or None when
    /// every entry in the range is smaller.
    fn scan_restart(&mut self, index: usize, key: &[u8]) -> Result<Option<Ordering>> {
        self.pending = None;
        self.pos = self.restarts[index] as usize;
        let end = match self.restarts.get(index + 1) {
            Some(&offset) => offset as usize,
            None => self.body.len(),
        };
        self.key_delta.reset();

        while self.pos < end {
            let entry = self.decode_entry()?;
            let cmp = entry.key.as_ref().cmp(key);
            if cmp != Ordering::Less {
                self.pending = Some(entry);
                return Ok(Some(cmp));
            }
        }
        Ok(None)
    }
}

fn read_hash_index(reader: &mut ByteReader<'_>) -> Result<Vec<u32>> {
    let bucket_count = reader.read_varint()? as usize;
    let zero_count = reader.read_varint()? as usize;
    let max_width = reader.read_varint()? as u32;
    if zero_count > bucket_count {
        return Err(Error::corruption("hash index zero count exceeds bucket count"));
    }
    if max_width > 32 {
        return Err(Error::corruption(format!("hash index bit width {}", max_width)));
    }
    let value_count = bucket_count - zero_count;

    let bitmap_bytes = reader.read_slice(packed_len(bucket_count, 2))?;
    let mut bitmap = BitReader::new(bitmap_bytes, 2);
    let mut buckets = Vec::with_capacity(bucket_count);
    for _ in 0..bucket_count {
        let v = bitmap.read()?;
        buckets.push(if v < 2 { v as u32 } else { u32::MAX });
    }

    let value_bytes = reader.read_slice(packed_len(value_count, max_width))?;
    let mut values = BitReader::new(value_bytes, max_width);
    for bucket in buckets.iter_mut() {
        if *bucket == u32::MAX {
            *bucket = 2 + values.read()? as u32;
        }
    }
    Ok(buckets)
}
