//! The on-disk block format: writers, readers and the file-level index.
//!
//! ## Block Format
//!
//! One block, as flushed by [`BlockWriter`]:
//!
//! ```text
//! [Magic: u32 = 0xD474B10C]
//! [BlockStats]
//! [Envelope: varint compressed_len, varint plain_len, u8 checksum id,
//!            digest bytes, compressed entry bytes]
//! [Restart offsets: int-sequence, element 0 omitted]
//! [Hash index: varint bucket_count, varint zero_count, varint max_width,
//!              2-bit bitmap, packed values]
//! ```
//!
//! Each entry inside the decompressed body:
//!
//! ```text
//! [seq_id: varint] [timestamp: varint] [flags: varint]
//! [key_shared: varint] [key_unshared: varint] [value_len: varint]
//! [unshared key bytes] [value bytes]
//! ```
//!
//! ## File Format
//!
//! One block file, as produced by [`DataBlocksWriter`]:
//!
//! ```text
//! [Signature: 'D' 'A' 'T' 0x01]
//! [File-level BlockStats]
//! [Block 1] [Block 2] ... [Block N]
//! [Footer: envelope of {varint block_count, per block:
//!          varint offset, varint first_key_len, varint last_key_len,
//!          first_key bytes, last_key bytes}]
//! [Footer length: u32]
//! ```

pub mod encoding;
pub mod file_reader;
pub mod file_writer;
pub mod info;
pub mod reader;
pub mod writer;

pub use file_reader::DataBlocksReader;
pub use file_writer::DataBlocksWriter;
pub use info::BlockInfo;
pub use reader::BlockReader;
pub use writer::BlockWriter;

use crate::entry::BlockEntry;
use crate::error::Result;

/// Magic word opening every data block.
pub const BLOCK_MAGIC: u32 = 0xD474B10C;

/// Signature opening every block file.
pub const FILE_SIGNATURE: [u8; 3] = *b"DAT";

/// Current block file format version.
pub const FILE_VERSION: u8 = 1;

/// Extension of block files inside a store directory.
pub const FILE_EXTENSION: &str = "blk";

/// A stream of [`BlockEntry`] values in `BlockEntry::compare` order.
///
/// Implemented by block file readers and memstore iterators; the merge
/// iterator consumes any mix of them.
pub trait BlockEntryIterator {
    /// Returns true while the stream has entries left.
    fn has_more_entries(&mut self) -> Result<bool>;

    /// Decodes and returns the next entry. Must only be called after
    /// `has_more_entries` returned true.
    fn next_entry(&mut self) -> Result<BlockEntry>;
}
