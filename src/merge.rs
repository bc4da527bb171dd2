//! K-way merge over block entry iterators with version-aware visibility.
//!
//! Any number of sources (block files, memstores) merge into one stream
//! ordered by [`BlockEntry::compare`]: key ascending, newest version first.
//! Visibility options filter what the stream surfaces; with
//! `remove_deleted` a tombstone also suppresses every older version of its
//! key, so a deleted key disappears entirely instead of resurrecting an
//! old value.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::blocks::BlockEntryIterator;
use crate::entry::BlockEntry;
use crate::error::Result;

/// Visibility rules applied while merging.
///
/// `max_versions` is not enforced here: the consumer counts surfaced
/// versions per key (see `BlockManager::scan_from`), because only the
/// consumer knows when it stops early.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    remove_deleted: bool,
    min_seq_id: u64,
    min_timestamp: u64,
    max_versions: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeOptions {
    /// All entries visible, unlimited versions.
    pub fn new() -> Self {
        Self { remove_deleted: false, min_seq_id: 0, min_timestamp: 0, max_versions: usize::MAX }
    }

    /// Drop tombstones and the older versions they shadow.
    pub fn remove_deleted(mut self, remove: bool) -> Self {
        self.remove_deleted = remove;
        self
    }

    /// Drop entries with a sequence id below `seq_id`.
    pub fn min_seq_id(mut self, seq_id: u64) -> Self {
        self.min_seq_id = seq_id;
        self
    }

    /// Drop entries with a timestamp below `timestamp`.
    pub fn min_timestamp(mut self, timestamp: u64) -> Self {
        self.min_timestamp = timestamp;
        self
    }

    /// Cap the number of versions surfaced per key (consumer-enforced).
    pub fn max_versions(mut self, versions: usize) -> Self {
        self.max_versions = versions;
        self
    }

    /// Returns true if a version cap was configured.
    pub fn has_max_versions(&self) -> bool {
        self.max_versions != usize::MAX
    }

    /// The configured version cap.
    pub fn get_max_versions(&self) -> usize {
        self.max_versions
    }

    /// Returns true if tombstones are being removed.
    pub fn removes_deleted(&self) -> bool {
        self.remove_deleted
    }

    /// Per-entry floor checks; tombstone handling happens at merge level.
    fn passes_floors(&self, entry: &BlockEntry) -> bool {
        entry.seq_id >= self.min_seq_id && entry.timestamp >= self.min_timestamp
    }
}

/// A source plus its current entry, ordered for the min-heap.
struct MergeCursor {
    entry: BlockEntry,
    source_index: usize,
    source: Box<dyn BlockEntryIterator>,
}

impl PartialEq for MergeCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCursor {}

impl PartialOrd for MergeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the BinaryHeap max becomes the smallest entry; ties
        // break on the source index for a deterministic stream
        BlockEntry::compare(&other.entry, &self.entry)
            .then_with(|| other.source_index.cmp(&self.source_index))
    }
}

/// Merges N sources into one ordered, visibility-filtered stream.
pub struct BlockEntryMergeIterator {
    heap: BinaryHeap<MergeCursor>,
    options: MergeOptions,
    /// Key whose older versions are currently shadowed by a tombstone.
    shadowed: Option<Bytes>,
}

impl BlockEntryMergeIterator {
    /// Wraps each source in a cursor holding its first visible entry and
    /// positions the merged stream at its first visible entry.
    pub fn new(
        options: MergeOptions,
        sources: Vec<Box<dyn BlockEntryIterator>>,
    ) -> Result<Self> {
        let start = std::time::Instant::now();
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source_index, mut source) in sources.into_iter().enumerate() {
            if let Some(entry) = fetch_next(source.as_mut(), &options)? {
                heap.push(MergeCursor { entry, source_index, source });
            }
        }
        log::debug!("merge prepare of {} sources took {:?}", heap.len(), start.elapsed());

        let mut iter = Self { heap, options, shadowed: None };
        iter.settle()?;
        Ok(iter)
    }

    /// Returns true while the merged stream has entries left.
    pub fn has_more(&self) -> bool {
        !self.heap.is_empty()
    }

    /// The current entry, without advancing.
    pub fn read_entry(&self) -> Option<&BlockEntry> {
        self.heap.peek().map(|cursor| &cursor.entry)
    }

    /// Moves to the next visible entry.
    pub fn advance(&mut self) -> Result<()> {
        self.pop_and_refill()?;
        self.settle()
    }

    fn pop_and_refill(&mut self) -> Result<()> {
        if let Some(mut cursor) = self.heap.pop() {
            if let Some(entry) = fetch_next(cursor.source.as_mut(), &self.options)? {
                cursor.entry = entry;
                self.heap.push(cursor);
            }
        }
        Ok(())
    }

    /// Skips tombstones and the older versions they shadow. The stream is
    /// ordered newest-first per key, so the first occurrence of a key
    /// decides: a live entry passes, a tombstone hides the key until the
    /// next one.
    fn settle(&mut self) -> Result<()> {
        if !self.options.remove_deleted {
            return Ok(());
        }
        while let Some(cursor) = self.heap.peek() {
            if cursor.entry.is_deleted() {
                self.shadowed = Some(cursor.entry.key.clone());
            } else if self.shadowed.as_ref().map(|k| k.as_ref()) != Some(cursor.entry.key.as_ref())
            {
                return Ok(());
            }
            self.pop_and_refill()?;
        }
        Ok(())
    }
}

fn fetch_next(
    source: &mut dyn BlockEntryIterator,
    options: &MergeOptions,
) -> Result<Option<BlockEntry>> {
    while source.has_more_entries()? {
        let entry = source.next_entry()?;
        if options.passes_floors(&entry) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory source for merge tests.
    struct VecSource {
        entries: Vec<BlockEntry>,
        pos: usize,
    }

    impl VecSource {
        fn boxed(entries: Vec<BlockEntry>) -> Box<dyn BlockEntryIterator> {
            Box::new(Self { entries, pos: 0 })
        }
    }

    impl BlockEntryIterator for VecSource {
        fn has_more_entries(&mut self) -> Result<bool> {
            Ok(self.pos < self.entries.len())
        }

        fn next_entry(&mut self) -> Result<BlockEntry> {
            let entry = self.entries[self.pos].clone();
            self.pos += 1;
            Ok(entry)
        }
    }

    fn entry(key: &str, value: &str, seq_id: u64) -> BlockEntry {
        BlockEntry::new(Bytes::from(key.to_string()), Bytes::from(value.to_string()), seq_id, seq_id)
    }

    fn tombstone(key: &str, seq_id: u64) -> BlockEntry {
        BlockEntry::tombstone(Bytes::from(key.to_string()), seq_id, seq_id)
    }

    fn collect(mut iter: BlockEntryMergeIterator) -> Vec<BlockEntry> {
        let mut out = Vec::new();
        while iter.has_more() {
            out.push(iter.read_entry().unwrap().clone());
            iter.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_merge_disjoint_sources() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new(),
            vec![
                VecSource::boxed(vec![entry("a", "1", 1), entry("c", "3", 1), entry("e", "5", 1)]),
                VecSource::boxed(vec![entry("b", "2", 1), entry("d", "4", 1), entry("f", "6", 1)]),
            ],
        )
        .unwrap();

        let keys: Vec<Bytes> = collect(iter).into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_merge_orders_versions_newest_first() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new(),
            vec![
                VecSource::boxed(vec![entry("k", "old", 1)]),
                VecSource::boxed(vec![entry("k", "new", 9)]),
                VecSource::boxed(vec![entry("k", "mid", 5)]),
            ],
        )
        .unwrap();

        let merged = collect(iter);
        let seqs: Vec<u64> = merged.iter().map(|e| e.seq_id).collect();
        assert_eq!(seqs, vec![9, 5, 1]);
    }

    #[test]
    fn test_merge_globally_sorted() {
        let sources = vec![
            VecSource::boxed(vec![entry("a", "1", 3), entry("a", "0", 1), entry("m", "2", 2)]),
            VecSource::boxed(vec![entry("a", "x", 2), entry("z", "9", 7)]),
            VecSource::boxed(vec![]),
        ];
        let merged = collect(BlockEntryMergeIterator::new(MergeOptions::new(), sources).unwrap());

        for pair in merged.windows(2) {
            assert_ne!(BlockEntry::compare(&pair[0], &pair[1]), Ordering::Greater);
        }
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_remove_deleted_drops_tombstone_and_older() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new().remove_deleted(true),
            vec![
                VecSource::boxed(vec![entry("a", "v1", 1), entry("b", "v1", 1)]),
                VecSource::boxed(vec![tombstone("a", 2)]),
            ],
        )
        .unwrap();

        let merged = collect(iter);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].key, Bytes::from_static(b"b"));
    }

    #[test]
    fn test_tombstones_surfaced_when_not_removed() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new(),
            vec![
                VecSource::boxed(vec![entry("a", "v1", 1)]),
                VecSource::boxed(vec![tombstone("a", 2)]),
            ],
        )
        .unwrap();

        let merged = collect(iter);
        assert_eq!(merged.len(), 2);
        assert!(merged[0].is_deleted());
        assert_eq!(merged[0].seq_id, 2);
        assert!(!merged[1].is_deleted());
    }

    #[test]
    fn test_write_after_delete_visible() {
        // a newer live version after a tombstone stays visible
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new().remove_deleted(true),
            vec![
                VecSource::boxed(vec![entry("a", "resurrected", 5)]),
                VecSource::boxed(vec![tombstone("a", 3)]),
                VecSource::boxed(vec![entry("a", "original", 1)]),
            ],
        )
        .unwrap();

        let merged = collect(iter);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].value, Bytes::from_static(b"resurrected"));
    }

    #[test]
    fn test_min_seq_id_floor() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new().min_seq_id(5),
            vec![VecSource::boxed(vec![
                entry("a", "new", 9),
                entry("a", "old", 2),
                entry("b", "old", 4),
            ])],
        )
        .unwrap();

        let merged = collect(iter);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].seq_id, 9);
    }

    #[test]
    fn test_min_timestamp_floor() {
        let iter = BlockEntryMergeIterator::new(
            MergeOptions::new().min_timestamp(100),
            vec![VecSource::boxed(vec![
                BlockEntry::new(Bytes::from_static(b"a"), Bytes::from_static(b"x"), 1, 250),
                BlockEntry::new(Bytes::from_static(b"b"), Bytes::from_static(b"y"), 1, 50),
            ])],
        )
        .unwrap();

        let merged = collect(iter);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].key, Bytes::from_static(b"a"));
    }

    #[test]
    fn test_empty_merge() {
        let iter =
            BlockEntryMergeIterator::new(MergeOptions::new(), vec![VecSource::boxed(vec![])])
                .unwrap();
        assert!(!iter.has_more());
        assert!(iter.read_entry().is_none());
    }
}
