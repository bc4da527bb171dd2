//! # BlockDb - A Log-Structured Block Storage Engine
//!
//! BlockDb writes immutable, compressed, checksummed data blocks to files,
//! indexes them for point lookup and range scan, and merges any number of
//! sources (an in-memory buffer plus many on-disk block files) into a
//! single ordered, version-aware stream.
//!
//! ## Architecture
//!
//! The engine consists of several key components:
//!
//! - **BlockWriter / BlockReader**: one bounded-size block of sorted
//!   entries with prefix-delta keys, restart points and a key-hash index
//! - **BlockEncoding**: the zstd + digest envelope around every block body
//! - **DataBlocksWriter / DataBlocksReader**: a block file with a
//!   memory-mapped footer index for block-level seek
//! - **BlockEntryMergeIterator**: k-way merge with MVCC-style visibility
//! - **MemStore**: the in-memory write buffer ahead of a flush
//! - **BlockManager**: the store façade; scans, point probes, compaction
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blockdb::{BlockEntry, BlockManager, MemStore, MergeOptions, Options};
//!
//! # fn main() -> Result<(), blockdb::Error> {
//! let manager = BlockManager::new("./data", Options::default())?;
//! manager.load_block_index()?;
//!
//! // Buffer some writes and flush them into a block file
//! let store = manager.add_mem_store(Arc::new(MemStore::new()));
//! let seq = manager.new_entry_seq_id();
//! store.add(BlockEntry::new(&b"key1"[..], &b"value1"[..], seq, 1));
//! let _ = store.flush(&manager)?;
//!
//! // Scan the visible rows
//! manager.full_scan(MergeOptions::new().remove_deleted(true), |entry| {
//!     println!("{:?} => {:?}", entry.key, entry.value);
//!     true
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod blocks;
pub mod config;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod manager;
pub mod memstore;
pub mod merge;

// Re-exports
pub use blocks::{
    BlockEntryIterator, BlockInfo, BlockReader, BlockWriter, DataBlocksReader, DataBlocksWriter,
};
pub use config::{ChecksumKind, Options};
pub use entry::{BlockEntry, BlockStats, FLAG_DELETED};
pub use error::{Error, Result};
pub use manager::{BlockEntryScanner, BlockManager};
pub use memstore::MemStore;
pub use merge::{BlockEntryMergeIterator, MergeOptions};
