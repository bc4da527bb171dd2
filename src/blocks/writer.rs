//! Serializes one bounded-size block of sorted entries.
//!
//! The writer accumulates prefix-delta encoded entries, opens a restart
//! point every `restart_interval` bytes, and tracks a key-hash index. One
//! writer instance is reused across all the blocks of a file: `flush`
//! resets every piece of state.

use std::io::Write;

use xxhash_rust::xxh64::xxh64;

use crate::blocks::encoding as block_encoding;
use crate::blocks::BLOCK_MAGIC;
use crate::config::Options;
use crate::encoding::intseq;
use crate::encoding::{write_fixed32, write_varint, BitWriter, DeltaKeyEncoder};
use crate::entry::{BlockEntry, BlockStats};
use crate::error::Result;

/// Seed for the in-block key-hash index.
pub(crate) const HASH_INDEX_SEED: u64 = 0x2c1b_3c68_39c4_e1b5;

/// Accumulates sorted entries into one block and flushes it with its
/// restart-point and hash indexes.
///
/// Entries must be added in ascending [`BlockEntry::compare`] order; the
/// writer does not re-validate this, and violating it silently corrupts
/// the block's seek structure.
pub struct BlockWriter {
    buf: Vec<u8>,
    buffer_size: usize,
    restart_interval: usize,
    restart_block_size: usize,
    restarts: Vec<u32>,
    hashes: Vec<(u64, u32)>,
    key_delta: DeltaKeyEncoder,
    stats: BlockStats,
    checksum: crate::config::ChecksumKind,
    compression_level: i32,
}

impl BlockWriter {
    /// Creates a writer sized by `options`.
    pub fn new(options: &Options) -> Self {
        Self {
            buf: Vec::with_capacity(options.block_buffer_size),
            buffer_size: options.block_buffer_size,
            restart_interval: options.restart_interval,
            restart_block_size: usize::MAX,
            restarts: Vec::new(),
            hashes: Vec::new(),
            key_delta: DeltaKeyEncoder::new(options.max_key_length),
            stats: BlockStats::new(),
            checksum: options.checksum,
            compression_level: options.compression_level,
        }
    }

    /// Returns true once at least one entry was added since the last flush.
    pub fn has_data(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Returns true if `entry` fits in the remaining buffer capacity.
    pub fn has_space(&self, entry: &BlockEntry) -> bool {
        entry.estimate_size() < self.buffer_size.saturating_sub(self.buf.len())
    }

    /// The last key added since the last restart point.
    pub fn last_key(&self) -> &[u8] {
        self.key_delta.last_key()
    }

    /// Stats over the entries added since the last flush.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// Encoded entry bytes buffered since the last flush.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Appends one entry.
    pub fn add(&mut self, entry: &BlockEntry) {
        let initial_len = self.buf.len();
        if self.restart_block_size >= self.restart_interval {
            self.restarts.push(initial_len as u32);
            self.key_delta.reset();
            self.restart_block_size = 0;
        }

        let restart_index = (self.restarts.len() - 1) as u32;
        self.hashes.push((xxh64(&entry.key, HASH_INDEX_SEED), restart_index));

        debug_assert!(
            self.key_delta.last_key() <= entry.key.as_ref(),
            "entries must be added in key order"
        );
        let key_shared = self.key_delta.add(&entry.key);
        let key_unshared = entry.key.len() - key_shared;

        write_varint(&mut self.buf, entry.seq_id);
        write_varint(&mut self.buf, entry.timestamp);
        write_varint(&mut self.buf, entry.flags);
        write_varint(&mut self.buf, key_shared as u64);
        write_varint(&mut self.buf, key_unshared as u64);
        write_varint(&mut self.buf, entry.value.len() as u64);
        self.buf.extend_from_slice(&entry.key[key_shared..]);
        self.buf.extend_from_slice(&entry.value);

        self.restart_block_size += self.buf.len() - initial_len;
        self.stats.update(entry);
    }

    /// Flushes the accumulated block to `out` and resets the writer for the
    /// next block. Returns the number of bytes written.
    pub fn flush<W: Write>(&mut self, out: &mut W) -> Result<usize> {
        let start = std::time::Instant::now();
        let mut encoded = Vec::with_capacity(self.buf.len() / 2 + 128);

        write_fixed32(&mut encoded, BLOCK_MAGIC);
        self.stats.write_to(&mut encoded);
        block_encoding::encode(&mut encoded, &self.buf, self.checksum, self.compression_level)?;

        // restart[0] is always the block start and is omitted from the wire
        assert_eq!(self.restarts.first(), Some(&0), "first restart offset must be 0");
        intseq::encode_sequence(&mut encoded, &self.restarts[1..]);

        write_hash_index(&mut encoded, &self.hashes);

        out.write_all(&encoded)?;
        log::debug!(
            "block flush: {} rows, {} -> {} bytes in {:?}",
            self.stats.row_count(),
            self.buf.len(),
            encoded.len(),
            start.elapsed()
        );

        // reset for the next block
        self.buf.clear();
        self.restarts.clear();
        self.hashes.clear();
        self.key_delta.reset();
        self.stats.reset();
        self.restart_block_size = usize::MAX;

        Ok(encoded.len())
    }
}

/// Encodes the key-hash index: a power-of-two bucket array mapping
/// `hash % bucket_count` to a restart index.
///
/// A bucket holds 0 (empty), 1 (two keys mapped to different restart
/// indexes; the lookup is inconclusive and must fall back to binary
/// search), or `2 + restart_index`. The wire form is a 2-bit-per-bucket
/// bitmap (stored values saturate to 3) followed by the stored values
/// packed at the minimal uniform bit width.
fn write_hash_index(out: &mut Vec<u8>, hashes: &[(u64, u32)]) {
    let bucket_count = hashes.len().next_power_of_two();
    let mut buckets = vec![0u32; bucket_count];
    for &(hash, restart_index) in hashes {
        let slot = (hash % bucket_count as u64) as usize;
        let value = 2 + restart_index;
        if buckets[slot] == 0 {
            buckets[slot] = value;
        } else if buckets[slot] != value {
            buckets[slot] = 1;
        }
    }

    let mut zero_count = 0usize;
    let mut max_width = 0u32;
    for &bucket in &buckets {
        if bucket < 2 {
            zero_count += 1;
        } else {
            max_width = max_width.max(32 - (bucket - 2).leading_zeros());
        }
    }

    write_varint(out, bucket_count as u64);
    write_varint(out, zero_count as u64);
    write_varint(out, u64::from(max_width));

    let mut bitmap = BitWriter::new(out, 2);
    for &bucket in &buckets {
        bitmap.add(if bucket < 2 { u64::from(bucket) } else { 3 });
    }
    bitmap.finish();

    let mut values = BitWriter::new(out, max_width);
    for &bucket in &buckets {
        if bucket >= 2 {
            values.add(u64::from(bucket - 2));
        }
    }
    values.finish();
}
