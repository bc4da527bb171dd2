//! Versioned key/value entries and per-block statistics.
//!
//! A [`BlockEntry`] is one versioned record. Entries are totally ordered by
//! key (ascending), then by sequence id (descending, newest first). That
//! order is what block files store, what the merge iterator yields, and what
//! compaction relies on to keep the highest version of each key.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::encoding::{ByteReader, write_varint};
use crate::error::Result;

/// Flag bit marking an entry as a deletion tombstone.
pub const FLAG_DELETED: u64 = 1;

/// One versioned key/value record.
///
/// Entries yielded by readers and iterators are owned copies; they stay
/// valid after the iterator advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// The record key.
    pub key: Bytes,
    /// The record value. Empty for tombstones.
    pub value: Bytes,
    /// Commit/version order of this record.
    pub seq_id: u64,
    /// Record timestamp.
    pub timestamp: u64,
    /// Record flags; bit 0 marks a tombstone.
    pub flags: u64,
}

impl BlockEntry {
    /// Creates a new live entry.
    pub fn new(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        seq_id: u64,
        timestamp: u64,
    ) -> Self {
        Self { key: key.into(), value: value.into(), seq_id, timestamp, flags: 0 }
    }

    /// Creates a deletion tombstone for `key`.
    pub fn tombstone(key: impl Into<Bytes>, seq_id: u64, timestamp: u64) -> Self {
        Self { key: key.into(), value: Bytes::new(), seq_id, timestamp, flags: FLAG_DELETED }
    }

    /// Returns true if this entry is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    /// Rough encoded size, used for buffer capacity checks.
    pub fn estimate_size(&self) -> usize {
        // six varints at up to ten bytes each, plus the payloads
        self.key.len() + self.value.len() + 60
    }

    /// The total order of entries: key ascending, then sequence id
    /// descending so the newest version of a key sorts first.
    pub fn compare(a: &BlockEntry, b: &BlockEntry) -> Ordering {
        a.key.cmp(&b.key).then_with(|| b.seq_id.cmp(&a.seq_id))
    }
}

/// Summary statistics for a block or a whole block file.
///
/// The file-level stats double as the delta base for entry encoding:
/// entries inside a file store `seq_id - seq_id_min` and
/// `timestamp - timestamp_min`, restored on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStats {
    row_count: u64,
    key_max_length: usize,
    value_max_length: usize,
    seq_id_min: u64,
    timestamp_min: u64,
}

impl Default for BlockStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStats {
    /// Creates empty stats.
    pub fn new() -> Self {
        Self {
            row_count: 0,
            key_max_length: 0,
            value_max_length: 0,
            seq_id_min: u64::MAX,
            timestamp_min: u64::MAX,
        }
    }

    /// Number of entries accounted for.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Longest key seen, in bytes.
    pub fn key_max_length(&self) -> usize {
        self.key_max_length
    }

    /// Longest value seen, in bytes.
    pub fn value_max_length(&self) -> usize {
        self.value_max_length
    }

    /// Smallest sequence id seen; 0 if no entries were accounted.
    pub fn seq_id_min(&self) -> u64 {
        if self.row_count == 0 { 0 } else { self.seq_id_min }
    }

    /// Smallest timestamp seen; 0 if no entries were accounted.
    pub fn timestamp_min(&self) -> u64 {
        if self.row_count == 0 { 0 } else { self.timestamp_min }
    }

    /// Accounts one entry.
    pub fn update(&mut self, entry: &BlockEntry) {
        self.row_count += 1;
        self.key_max_length = self.key_max_length.max(entry.key.len());
        self.value_max_length = self.value_max_length.max(entry.value.len());
        self.seq_id_min = self.seq_id_min.min(entry.seq_id);
        self.timestamp_min = self.timestamp_min.min(entry.timestamp);
    }

    /// Merges another stats summary into this one.
    pub fn merge(&mut self, other: &BlockStats) {
        if other.row_count == 0 {
            return;
        }
        self.row_count += other.row_count;
        self.key_max_length = self.key_max_length.max(other.key_max_length);
        self.value_max_length = self.value_max_length.max(other.value_max_length);
        self.seq_id_min = self.seq_id_min.min(other.seq_id_min);
        self.timestamp_min = self.timestamp_min.min(other.timestamp_min);
    }

    /// Clears the stats for reuse.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Appends the wire form: five varints.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_varint(out, self.row_count);
        write_varint(out, self.key_max_length as u64);
        write_varint(out, self.value_max_length as u64);
        write_varint(out, self.seq_id_min());
        write_varint(out, self.timestamp_min());
    }

    /// Reads the wire form written by [`BlockStats::write_to`].
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let row_count = reader.read_varint()?;
        let key_max_length = reader.read_varint()? as usize;
        let value_max_length = reader.read_varint()? as usize;
        let seq_id_min = reader.read_varint()?;
        let timestamp_min = reader.read_varint()?;
        Ok(Self { row_count, key_max_length, value_max_length, seq_id_min, timestamp_min })
    }
}
