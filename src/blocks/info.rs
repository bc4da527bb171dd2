//! Per-block index records inside a block file.

use bytes::Bytes;

/// One data block's index record: its key range and byte offset.
///
/// Blocks within a file are strictly ordered by key range, non-overlapping,
/// and ascending by offset; [`BlockInfo::seek_to`] relies on that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    first_key: Bytes,
    last_key: Bytes,
    offset: u64,
}

impl BlockInfo {
    /// Creates an index record.
    pub fn new(first_key: Bytes, last_key: Bytes, offset: u64) -> Self {
        Self { first_key, last_key, offset }
    }

    /// First key stored in the block.
    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    /// Last key stored in the block.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Byte offset of the block within its file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns true if `key` falls inside this block's key range.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.first_key.as_ref() <= key && key <= self.last_key.as_ref()
    }

    /// Finds the block where a seek for `key` must start: the first block
    /// whose last key is ≥ `key`. Returns None when `key` sorts after every
    /// block; a key that precedes every range resolves to the first block.
    pub fn seek_to(blocks: &[BlockInfo], key: &[u8]) -> Option<usize> {
        let index = blocks.partition_point(|b| b.last_key.as_ref() < key);
        (index < blocks.len()).then_some(index)
    }
}
