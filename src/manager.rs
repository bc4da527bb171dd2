//! The store-level façade: owns block files and memstores, exposes scans,
//! point probes and compaction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::blocks::{
    BlockEntryIterator, BlockInfo, DataBlocksReader, DataBlocksWriter, FILE_EXTENSION,
};
use crate::config::Options;
use crate::entry::{BlockEntry, BlockStats};
use crate::error::{Error, Result};
use crate::memstore::MemStore;
use crate::merge::{BlockEntryMergeIterator, MergeOptions};

/// One immutable on-disk block file: its path, the sequence id parsed from
/// the filename, and the cached footer index.
pub struct DataBlocks {
    path: PathBuf,
    seq_id: u64,
    blocks: Arc<Vec<BlockInfo>>,
}

impl DataBlocks {
    fn new(path: PathBuf, blocks: Vec<BlockInfo>) -> Result<Self> {
        let seq_id = parse_file_seq_id(&path)?;
        Ok(Self { path, seq_id, blocks: Arc::new(blocks) })
    }

    /// The file's sequence id (monotonic across the store).
    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    /// Path of the block file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached per-block index.
    pub fn blocks(&self) -> &Arc<Vec<BlockInfo>> {
        &self.blocks
    }

    /// Opens a reader over this file, reusing the cached index.
    pub fn open(&self) -> Result<DataBlocksReader> {
        DataBlocksReader::open(&self.path, Some(Arc::clone(&self.blocks)))
    }
}

/// Filenames encode the file sequence id as 20 zero-padded decimal digits.
fn parse_file_seq_id(path: &Path) -> Result<u64> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
        .ok_or_else(|| {
            Error::invalid_argument(format!("invalid block file name: {}", path.display()))
        })
}

/// Owns the set of block files and memstores for one store and exposes
/// scan, compaction and point lookup over them.
///
/// Both lists live behind reader/writer locks and are snapshotted as
/// `Arc`s on every scan, so an in-flight scan keeps a consistent (possibly
/// stale) view while a flush or compaction swaps the list underneath it.
pub struct BlockManager {
    blocks_dir: PathBuf,
    options: Options,
    blocks: RwLock<Arc<Vec<Arc<DataBlocks>>>>,
    mem_stores: RwLock<Vec<Arc<MemStore>>>,
    entry_seq_id: AtomicU64,
}

impl BlockManager {
    /// Creates a manager over `blocks_dir`. Call
    /// [`BlockManager::load_block_index`] to recover existing files.
    pub fn new<P: AsRef<Path>>(blocks_dir: P, options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            blocks_dir: blocks_dir.as_ref().to_path_buf(),
            options,
            blocks: RwLock::new(Arc::new(Vec::new())),
            mem_stores: RwLock::new(Vec::new()),
            entry_seq_id: AtomicU64::new(0),
        })
    }

    /// The directory holding this store's block files.
    pub fn blocks_dir(&self) -> &Path {
        &self.blocks_dir
    }

    /// The store options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Rebuilds the in-memory file list from disk by reading every file's
    /// footer, and reseeds the sequence counter from the newest file. This
    /// is the crash-recovery path; it trusts on-disk footers completely.
    pub fn load_block_index(&self) -> Result<()> {
        let start = std::time::Instant::now();

        let mut loaded: Vec<Arc<DataBlocks>> = Vec::new();
        if self.blocks_dir.is_dir() {
            for dir_entry in std::fs::read_dir(&self.blocks_dir)? {
                let path = dir_entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                    continue;
                }
                let reader = DataBlocksReader::open(&path, None)?;
                let index = reader.blocks().as_ref().clone();
                loaded.push(Arc::new(DataBlocks::new(path, index)?));
            }
        }

        loaded.sort_by_key(|blocks| blocks.seq_id());
        let newest_seq_id = loaded.last().map(|blocks| blocks.seq_id()).unwrap_or(0);

        log::debug!(
            "loaded {} block files from {} in {:?}",
            loaded.len(),
            self.blocks_dir.display(),
            start.elapsed()
        );

        *self.blocks.write() = Arc::new(loaded);
        self.entry_seq_id.store(newest_seq_id, AtomicOrdering::SeqCst);
        Ok(())
    }

    /// Registers a freshly written block file.
    pub fn add_blocks(&self, path: &Path, blocks: Vec<BlockInfo>) -> Result<()> {
        let data_blocks = DataBlocks::new(path.to_path_buf(), blocks)?;
        let mut guard = self.blocks.write();
        let mut next = guard.as_ref().clone();
        next.push(Arc::new(data_blocks));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Registers a live memstore so scans include it.
    pub fn add_mem_store(&self, mem_store: Arc<MemStore>) -> Arc<MemStore> {
        self.mem_stores.write().push(Arc::clone(&mem_store));
        mem_store
    }

    /// Unregisters a memstore, typically after its flush.
    pub fn remove_mem_store(&self, mem_store: &Arc<MemStore>) {
        self.mem_stores.write().retain(|m| !Arc::ptr_eq(m, mem_store));
    }

    /// Claims the next entry sequence id.
    pub fn new_entry_seq_id(&self) -> u64 {
        self.entry_seq_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Claims a new block file path inside the store directory.
    pub fn new_block_file(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.blocks_dir)?;
        Ok(self
            .blocks_dir
            .join(format!("{:020}.{}", self.new_entry_seq_id(), FILE_EXTENSION)))
    }

    /// Opens a merged scan over every on-disk file and live memstore,
    /// positioned at `key` when given or at the first entry otherwise.
    pub fn scan(&self, options: MergeOptions, key: Option<&[u8]>) -> Result<BlockEntryScanner> {
        let disk = Arc::clone(&self.blocks.read());
        let mems = self.mem_stores.read().clone();
        self.scan_sources(options, key, &disk, &mems)
    }

    fn scan_sources(
        &self,
        options: MergeOptions,
        key: Option<&[u8]>,
        disk: &[Arc<DataBlocks>],
        mems: &[Arc<MemStore>],
    ) -> Result<BlockEntryScanner> {
        let mut stats = BlockStats::new();
        let mut sources: Vec<Box<dyn BlockEntryIterator>> =
            Vec::with_capacity(disk.len() + mems.len());

        for data_blocks in disk {
            let mut reader = data_blocks.open()?;
            match key {
                Some(key) => {
                    reader.seek_to(key)?;
                }
                None => reader.seek_to_first()?,
            }
            stats.merge(reader.stats());
            sources.push(Box::new(reader));
        }
        for mem_store in mems {
            stats.merge(&mem_store.stats());
            sources.push(Box::new(match key {
                Some(key) => mem_store.iter_from(key),
                None => mem_store.iter(),
            }));
        }

        Ok(BlockEntryScanner { iter: BlockEntryMergeIterator::new(options, sources)?, stats })
    }

    /// Scans every visible row, feeding each to `consumer` until it returns
    /// false. Returns the number of rows surfaced.
    pub fn full_scan(
        &self,
        options: MergeOptions,
        consumer: impl FnMut(&BlockEntry) -> bool,
    ) -> Result<u64> {
        self.scan_from(options, None, consumer)
    }

    /// Scans visible rows starting at `key`, capping per-key versions at
    /// `options.max_versions` and stopping early when `consumer` returns
    /// false. Returns the number of rows surfaced.
    pub fn scan_from(
        &self,
        options: MergeOptions,
        key: Option<&[u8]>,
        mut consumer: impl FnMut(&BlockEntry) -> bool,
    ) -> Result<u64> {
        let start = std::time::Instant::now();
        let mut row_count = 0u64;

        let mut scanner = self.scan(options, key)?;
        let mut prev_key: Option<bytes::Bytes> = None;
        let mut versions_left: i64 = 0;
        while scanner.has_more() {
            let entry = scanner.read_entry().expect("scanner not valid");
            let same_key = prev_key.as_ref().map(|k| k.as_ref()) == Some(entry.key.as_ref());
            if options.has_max_versions() && same_key {
                versions_left -= 1;
                if versions_left >= 0 {
                    row_count += 1;
                    if !consumer(entry) {
                        break;
                    }
                }
            } else if !same_key {
                row_count += 1;
                let stop = !consumer(entry);
                prev_key = Some(entry.key.clone());
                versions_left = options.get_max_versions() as i64 - 1;
                if stop {
                    break;
                }
            } else {
                row_count += 1;
                if !consumer(entry) {
                    break;
                }
            }
            scanner.advance()?;
        }

        log::debug!("scan of {} rows took {:?}", row_count, start.elapsed());
        Ok(row_count)
    }

    /// Rewrites every live entry into fresh block files, dropping obsolete
    /// versions and deleted keys, then atomically swaps the file list.
    /// No-ops when fewer than two on-disk files exist.
    ///
    /// Superseded files stay on disk as garbage for external cleanup; a
    /// scan started before the swap keeps reading them safely.
    pub fn compact(&self) -> Result<()> {
        let compacted: Arc<Vec<Arc<DataBlocks>>> = Arc::clone(&self.blocks.read());
        if compacted.len() < 2 {
            return Ok(());
        }
        let start = std::time::Instant::now();

        let options = MergeOptions::new().remove_deleted(true).max_versions(1);
        let mut scanner = self.scan_sources(options, None, &compacted, &[])?;
        let scan_stats = scanner.stats().clone();

        let mut outputs: Vec<Arc<DataBlocks>> = Vec::new();
        let mut prev_key: Option<bytes::Bytes> = None;
        while scanner.has_more() {
            let path = self.new_block_file()?;
            let mut writer = DataBlocksWriter::new(&path, scan_stats.clone(), &self.options)?;
            while scanner.has_more() {
                let entry = scanner.read_entry().expect("scanner not valid").clone();
                scanner.advance()?;
                if prev_key.as_ref() == Some(&entry.key) {
                    continue; // single version per key
                }
                prev_key = Some(entry.key.clone());
                writer.add(&entry)?;
                if writer.estimate_size() > self.options.max_file_size {
                    break;
                }
            }
            let blocks = writer.finish()?;
            if blocks.is_empty() {
                std::fs::remove_file(&path)?;
            } else {
                outputs.push(Arc::new(DataBlocks::new(path, blocks)?));
            }
        }

        // swap: drop the compacted inputs, keep files flushed meanwhile
        let compacted_ids: HashSet<u64> = compacted.iter().map(|b| b.seq_id()).collect();
        {
            let mut guard = self.blocks.write();
            let mut next: Vec<Arc<DataBlocks>> = guard
                .iter()
                .filter(|b| !compacted_ids.contains(&b.seq_id()))
                .cloned()
                .collect();
            next.extend(outputs);
            next.sort_by_key(|b| b.seq_id());
            *guard = Arc::new(next);
        }

        log::info!(
            "compacted {} files into {} in {:?}",
            compacted.len(),
            self.blocks.read().len(),
            start.elapsed()
        );
        Ok(())
    }

    /// Returns true if a visible (non-deleted) entry exists whose key
    /// starts with `key`.
    ///
    /// No Bloom filter backs this yet, so a miss still costs a full seek.
    pub fn has_key(&self, key: &[u8]) -> Result<bool> {
        let mut found = false;
        self.scan_from(MergeOptions::new().remove_deleted(true), Some(key), |entry| {
            found = entry.key.len() >= key.len() && &entry.key[..key.len()] == key;
            false
        })?;
        Ok(found)
    }
}

/// A merged scan over one snapshot of the store's sources.
pub struct BlockEntryScanner {
    iter: BlockEntryMergeIterator,
    stats: BlockStats,
}

impl BlockEntryScanner {
    /// Merged stats of every source in the scan.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// Returns true while the scan has entries left.
    pub fn has_more(&self) -> bool {
        self.iter.has_more()
    }

    /// The current entry, without advancing.
    pub fn read_entry(&self) -> Option<&BlockEntry> {
        self.iter.read_entry()
    }

    /// Moves to the next visible entry.
    pub fn advance(&mut self) -> Result<()> {
        self.iter.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn entry(key: &str, value: &str, seq_id: u64) -> BlockEntry {
        BlockEntry::new(Bytes::from(key.to_string()), Bytes::from(value.to_string()), seq_id, seq_id)
    }

    fn manager(dir: &TempDir) -> BlockManager {
        BlockManager::new(dir.path().join("blocks"), Options::default()).unwrap()
    }

    fn flush_entries(manager: &BlockManager, entries: Vec<BlockEntry>) {
        let store = MemStore::new();
        store.add_all(entries);
        store.flush(manager).unwrap().unwrap();
    }

    fn visible_rows(manager: &BlockManager, options: MergeOptions) -> Vec<BlockEntry> {
        let mut rows = Vec::new();
        manager
            .full_scan(options, |entry| {
                rows.push(entry.clone());
                true
            })
            .unwrap();
        rows
    }

    #[test]
    fn test_scan_merges_files_and_memstore() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        flush_entries(&manager, vec![entry("a", "1", 1), entry("c", "3", 2)]);
        flush_entries(&manager, vec![entry("b", "2", 3)]);

        let live = manager.add_mem_store(Arc::new(MemStore::new()));
        live.add(entry("d", "4", 4));

        let rows = visible_rows(&manager, MergeOptions::new());
        let keys: Vec<Bytes> = rows.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_load_block_index_recovers() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let blocks_dir = dir.path().join("blocks");
        {
            let manager = BlockManager::new(&blocks_dir, Options::default()).unwrap();
            flush_entries(&manager, vec![entry("a", "1", 1)]);
            flush_entries(&manager, vec![entry("b", "2", 2)]);
        }

        // a fresh manager recovers files and the sequence counter from disk
        let manager = BlockManager::new(&blocks_dir, Options::default()).unwrap();
        manager.load_block_index().unwrap();
        assert_eq!(manager.blocks.read().len(), 2);
        assert!(manager.new_entry_seq_id() > 2);

        let rows = visible_rows(&manager, MergeOptions::new());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_scan_from_key() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(
            &manager,
            (0..100).map(|i| entry(&format!("key{:04}", i), "v", i + 1)).collect(),
        );

        let mut seen = Vec::new();
        manager
            .scan_from(MergeOptions::new(), Some(b"key0090"), |e| {
                seen.push(e.key.clone());
                true
            })
            .unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], Bytes::from_static(b"key0090"));
    }

    #[test]
    fn test_scan_from_caps_versions() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(
            &manager,
            vec![
                entry("k", "v4", 40),
                entry("k", "v3", 30),
                entry("k", "v2", 20),
                entry("k", "v1", 10),
                entry("z", "z1", 5),
            ],
        );

        let rows = visible_rows(&manager, MergeOptions::new().max_versions(2));
        let versions: Vec<(Bytes, u64)> = rows.iter().map(|e| (e.key.clone(), e.seq_id)).collect();
        assert_eq!(
            versions,
            vec![
                (Bytes::from_static(b"k"), 40),
                (Bytes::from_static(b"k"), 30),
                (Bytes::from_static(b"z"), 5),
            ]
        );
    }

    #[test]
    fn test_scan_predicate_stops_early() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(
            &manager,
            (0..50).map(|i| entry(&format!("key{:04}", i), "v", i + 1)).collect(),
        );

        let mut seen = 0;
        let rows = manager
            .full_scan(MergeOptions::new(), |_| {
                seen += 1;
                seen < 5
            })
            .unwrap();
        assert_eq!(seen, 5);
        assert_eq!(rows, 5);
    }

    #[test]
    fn test_has_key() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(&manager, vec![entry("alpha", "1", 1), entry("beta", "2", 2)]);

        assert!(manager.has_key(b"alpha").unwrap());
        assert!(manager.has_key(b"alp").unwrap()); // prefix probe
        assert!(!manager.has_key(b"alphaz").unwrap());
        assert!(!manager.has_key(b"gamma").unwrap());

        // a deleted key stops being visible
        let live = manager.add_mem_store(Arc::new(MemStore::new()));
        live.add(BlockEntry::tombstone(Bytes::from_static(b"beta"), 9, 9));
        assert!(!manager.has_key(b"beta").unwrap());
    }

    #[test]
    fn test_compact_noop_below_two_files() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(&manager, vec![entry("a", "1", 1)]);

        manager.compact().unwrap();
        assert_eq!(manager.blocks.read().len(), 1);
    }

    #[test]
    fn test_compact_merges_and_drops_obsolete() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        flush_entries(&manager, vec![entry("a", "old", 1), entry("b", "b1", 2)]);
        flush_entries(
            &manager,
            vec![
                entry("a", "new", 5),
                BlockEntry::tombstone(Bytes::from_static(b"b"), 6, 6),
                entry("c", "c1", 7),
            ],
        );

        manager.compact().unwrap();
        assert_eq!(manager.blocks.read().len(), 1);

        let rows = visible_rows(&manager, MergeOptions::new());
        let kv: Vec<(Bytes, Bytes)> = rows.into_iter().map(|e| (e.key, e.value)).collect();
        assert_eq!(
            kv,
            vec![
                (Bytes::from_static(b"a"), Bytes::from_static(b"new")),
                (Bytes::from_static(b"c"), Bytes::from_static(b"c1")),
            ]
        );
    }

    #[test]
    fn test_compact_idempotent() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        flush_entries(&manager, vec![entry("a", "1", 1), entry("b", "2", 2)]);
        flush_entries(&manager, vec![entry("b", "2b", 3), entry("c", "3", 4)]);
        flush_entries(&manager, vec![BlockEntry::tombstone(Bytes::from_static(b"a"), 5, 5)]);

        manager.compact().unwrap();
        let first = visible_rows(&manager, MergeOptions::new());

        manager.compact().unwrap();
        let second = visible_rows(&manager, MergeOptions::new());

        assert_eq!(first, second);
        let kv: Vec<(Bytes, Bytes)> = first.into_iter().map(|e| (e.key, e.value)).collect();
        assert_eq!(
            kv,
            vec![
                (Bytes::from_static(b"b"), Bytes::from_static(b"2b")),
                (Bytes::from_static(b"c"), Bytes::from_static(b"3")),
            ]
        );
    }

    #[test]
    fn test_tombstone_visibility_example() {
        // one block holding ("a",v1,seq1), ("a",v2,seq2,deleted), ("b",v1,seq1)
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(
            &manager,
            vec![
                entry("a", "v1", 1),
                BlockEntry::tombstone(Bytes::from_static(b"a"), 2, 2),
                entry("b", "v1", 1),
            ],
        );

        // removeDeleted=true, maxVersions=1 -> exactly ("b", v1)
        let rows =
            visible_rows(&manager, MergeOptions::new().remove_deleted(true).max_versions(1));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, Bytes::from_static(b"b"));
        assert_eq!(rows[0].value, Bytes::from_static(b"v1"));

        // removeDeleted=false -> ("a", deleted@seq2) then ("b", v1)
        let rows = visible_rows(&manager, MergeOptions::new().max_versions(1));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, Bytes::from_static(b"a"));
        assert!(rows[0].is_deleted());
        assert_eq!(rows[0].seq_id, 2);
        assert_eq!(rows[1].key, Bytes::from_static(b"b"));
    }

    #[test]
    fn test_min_seq_id_snapshot_read() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(&manager, vec![entry("a", "early", 1), entry("b", "late", 10)]);

        let rows = visible_rows(&manager, MergeOptions::new().min_seq_id(5));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, Bytes::from_static(b"b"));
    }

    #[test]
    fn test_scan_snapshot_survives_compaction_swap() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        flush_entries(&manager, vec![entry("a", "1", 1)]);
        flush_entries(&manager, vec![entry("b", "2", 2)]);

        // open a scan, then compact underneath it
        let mut scanner = manager.scan(MergeOptions::new(), None).unwrap();
        manager.compact().unwrap();

        let mut keys = Vec::new();
        while scanner.has_more() {
            keys.push(scanner.read_entry().unwrap().key.clone());
            scanner.advance().unwrap();
        }
        assert_eq!(keys, vec!["a", "b"]);
    }
}
