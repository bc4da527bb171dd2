//! In-memory write buffer ahead of the on-disk block files.
//!
//! Backed by a lock-free skiplist keyed by (key, reversed sequence id), so
//! iteration naturally yields `BlockEntry::compare` order: key ascending,
//! newest version first. Concurrent writers and readers are safe; iterators
//! are cursor-based and tolerate inserts happening mid-scan.

use std::cmp::Ordering;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use crate::blocks::{BlockEntryIterator, DataBlocksWriter};
use crate::entry::{BlockEntry, BlockStats};
use crate::error::Result;
use crate::manager::BlockManager;

/// Skiplist key: key bytes ascending, then sequence id descending.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MemKey {
    key: Bytes,
    seq_id: u64,
}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| other.seq_id.cmp(&self.seq_id))
    }
}

#[derive(Debug, Clone)]
struct MemValue {
    value: Bytes,
    timestamp: u64,
    flags: u64,
}

/// The in-memory buffer entries are written to before a flush.
pub struct MemStore {
    entries: Arc<SkipMap<MemKey, MemValue>>,
    stats: Mutex<BlockStats>,
    estimate_size: AtomicU64,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(SkipMap::new()),
            stats: Mutex::new(BlockStats::new()),
            estimate_size: AtomicU64::new(0),
        }
    }

    /// Inserts one entry and returns the updated size estimate.
    pub fn add(&self, entry: BlockEntry) -> u64 {
        let size = entry.estimate_size() as u64;
        self.stats.lock().update(&entry);
        self.entries.insert(
            MemKey { key: entry.key, seq_id: entry.seq_id },
            MemValue { value: entry.value, timestamp: entry.timestamp, flags: entry.flags },
        );
        self.estimate_size.fetch_add(size, AtomicOrdering::Relaxed) + size
    }

    /// Inserts a batch of entries.
    pub fn add_all(&self, entries: impl IntoIterator<Item = BlockEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }

    /// Stats over every entry added so far.
    pub fn stats(&self) -> BlockStats {
        self.stats.lock().clone()
    }

    /// Estimated heap footprint of the buffered entries.
    pub fn estimate_size(&self) -> u64 {
        self.estimate_size.load(AtomicOrdering::Relaxed)
    }

    /// Returns true if no entries are buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Writes the buffered entries into a new block file registered with
    /// `manager`. Returns the file path, or None when the store is empty.
    pub fn flush(&self, manager: &BlockManager) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }
        let start = std::time::Instant::now();

        let path = manager.new_block_file()?;
        let mut writer = DataBlocksWriter::new(&path, self.stats(), manager.options())?;
        for item in self.entries.iter() {
            let key = item.key();
            let value = item.value();
            writer.add(&BlockEntry {
                key: key.key.clone(),
                value: value.value.clone(),
                seq_id: key.seq_id,
                timestamp: value.timestamp,
                flags: value.flags,
            })?;
        }
        let blocks = writer.finish()?;
        manager.add_blocks(&path, blocks)?;

        log::info!(
            "memstore flush of {} entries to {} took {:?}",
            self.len(),
            path.display(),
            start.elapsed()
        );
        Ok(Some(path))
    }

    /// Iterator over every buffered entry.
    pub fn iter(&self) -> MemStoreIter {
        MemStoreIter { entries: Arc::clone(&self.entries), cursor: Bound::Unbounded }
    }

    /// Iterator over entries with key ≥ `key`.
    pub fn iter_from(&self, key: &[u8]) -> MemStoreIter {
        // seq u64::MAX sorts first among versions of `key`, so the bound is
        // inclusive of every version
        let from = MemKey { key: Bytes::copy_from_slice(key), seq_id: u64::MAX };
        MemStoreIter { entries: Arc::clone(&self.entries), cursor: Bound::Included(from) }
    }
}

/// Cursor-based iterator over a memstore.
///
/// Holds no skiplist reference between steps; each advance re-enters the
/// map after the last yielded position, so flushes and inserts during a
/// scan are safe (entries inserted behind the cursor are simply missed).
pub struct MemStoreIter {
    entries: Arc<SkipMap<MemKey, MemValue>>,
    cursor: Bound<MemKey>,
}

impl MemStoreIter {
    fn peek(&self) -> Option<BlockEntry> {
        let bounds: (Bound<&MemKey>, Bound<&MemKey>) = (self.cursor.as_ref(), Bound::Unbounded);
        let range = self.entries.range(bounds);
        range.map(|item| {
            let key = item.key();
            let value = item.value();
            BlockEntry {
                key: key.key.clone(),
                value: value.value.clone(),
                seq_id: key.seq_id,
                timestamp: value.timestamp,
                flags: value.flags,
            }
        })
        .next()
    }
}

impl BlockEntryIterator for MemStoreIter {
    fn has_more_entries(&mut self) -> Result<bool> {
        Ok(self.peek().is_some())
    }

    fn next_entry(&mut self) -> Result<BlockEntry> {
        let entry = self
            .peek()
            .ok_or_else(|| crate::Error::invalid_state("next_entry on exhausted memstore"))?;
        self.cursor =
            Bound::Excluded(MemKey { key: entry.key.clone(), seq_id: entry.seq_id });
        Ok(entry)
    }
}
