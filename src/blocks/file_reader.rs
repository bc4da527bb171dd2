//! Reads a block file: memory-mapped open, block-level seek, and
//! sequential iteration across all blocks.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::blocks::encoding as block_encoding;
use crate::blocks::info::BlockInfo;
use crate::blocks::reader::BlockReader;
use crate::blocks::{BlockEntryIterator, FILE_SIGNATURE, FILE_VERSION};
use crate::encoding::ByteReader;
use crate::entry::{BlockEntry, BlockStats};
use crate::error::{Error, Result};

/// Read handle over one immutable block file.
///
/// The file is memory-mapped read-only; many readers may map the same file,
/// but each instance carries private cursor state and must not be shared
/// across concurrent scans.
pub struct DataBlocksReader {
    path: PathBuf,
    mmap: Mmap,
    stats: BlockStats,
    blocks: Arc<Vec<BlockInfo>>,
    current: Option<BlockReader>,
    next_block: usize,
}

impl DataBlocksReader {
    /// Opens `path`, validating the signature and loading the file-level
    /// stats. The footer index is parsed from the file unless a cached copy
    /// is supplied.
    pub fn open<P: AsRef<Path>>(
        path: P,
        known_index: Option<Arc<Vec<BlockInfo>>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < (FILE_SIGNATURE.len() + 1) as u64 {
            return Err(Error::corruption(format!("{}: file too small", path.display())));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        let mut reader = ByteReader::new(&mmap);
        let signature = reader.read_slice(3)?;
        let version = reader.read_u8()?;
        if signature != FILE_SIGNATURE || version != FILE_VERSION {
            return Err(Error::corruption(format!(
                "{}: invalid file signature {:?} version {}",
                path.display(),
                signature,
                version
            )));
        }
        let stats = BlockStats::read_from(&mut reader)?;

        let blocks = match known_index {
            Some(blocks) => blocks,
            None => Arc::new(read_block_index(&mmap)?),
        };

        Ok(Self { path, mmap, stats, blocks, current: None, next_block: 0 })
    }

    /// File-level stats; also the delta base for entry adjustment.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// The per-block index loaded from the footer.
    pub fn blocks(&self) -> &Arc<Vec<BlockInfo>> {
        &self.blocks
    }

    /// Path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_block(&mut self, index: usize) -> Result<&mut BlockReader> {
        let mut reader = ByteReader::new(&self.mmap);
        reader.seek_to(self.blocks[index].offset() as usize)?;
        self.current = Some(BlockReader::read(&mut reader)?);
        self.next_block = index + 1;
        Ok(self.current.as_mut().unwrap())
    }

    /// Positions the cursor at the first entry with key ≥ `key`. Returns
    /// true when a block whose key range contains `key` was found; false
    /// when `key` precedes every range (cursor at the first entry) or
    /// follows every range (cursor exhausted).
    pub fn seek_to(&mut self, key: &[u8]) -> Result<bool> {
        let start = std::time::Instant::now();
        let result = match BlockInfo::seek_to(&self.blocks, key) {
            Some(index) => {
                let containing = self.blocks[index].contains(key);
                self.open_block(index)?;
                self.current.as_mut().unwrap().seek_to(key)?;
                Ok(containing)
            }
            None => {
                self.current = None;
                self.next_block = self.blocks.len();
                Ok(false)
            }
        };
        log::debug!("file seek on {} took {:?}", self.path.display(), start.elapsed());
        result
    }

    /// Positions the cursor at the first entry of the file.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.current = None;
        self.next_block = 0;
        if !self.blocks.is_empty() {
            self.open_block(0)?;
        }
        Ok(())
    }

    fn adjust_entry(&self, mut entry: BlockEntry) -> BlockEntry {
        entry.seq_id += self.stats.seq_id_min();
        entry.timestamp += self.stats.timestamp_min();
        entry
    }
}

impl BlockEntryIterator for DataBlocksReader {
    fn has_more_entries(&mut self) -> Result<bool> {
        loop {
            if let Some(current) = &self.current {
                if current.has_more_entries() {
                    return Ok(true);
                }
            }
            if self.next_block >= self.blocks.len() {
                return Ok(false);
            }
            let next = self.next_block;
            self.open_block(next)?;
        }
    }

    fn next_entry(&mut self) -> Result<BlockEntry> {
        let entry = self
            .current
            .as_mut()
            .ok_or_else(|| Error::invalid_state("next_entry before positioning"))?
            .next_entry()?;
        Ok(self.adjust_entry(entry))
    }
}

/// Parses the footer index: the fixed32 trailer holds the byte length of
/// the footer envelope that precedes it.
fn read_block_index(mmap: &[u8]) -> Result<Vec<BlockInfo>> {
    let start = std::time::Instant::now();
    if mmap.len() < 4 {
        return Err(Error::corruption("file too small for a footer"));
    }

    let mut reader = ByteReader::new(mmap);
    reader.seek_to(mmap.len() - 4)?;
    let footer_len = reader.read_fixed32()? as usize;
    let footer_start = mmap
        .len()
        .checked_sub(footer_len + 4)
        .ok_or_else(|| Error::corruption("footer length exceeds file size"))?;
    reader.seek_to(footer_start)?;

    let footer = block_encoding::decode(&mut reader)?;
    let mut footer_reader = ByteReader::new(&footer);
    let count = footer_reader.read_varint()? as usize;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = footer_reader.read_varint()?;
        let first_key_len = footer_reader.read_varint()? as usize;
        let last_key_len = footer_reader.read_varint()? as usize;
        let first_key = bytes::Bytes::copy_from_slice(footer_reader.read_slice(first_key_len)?);
        let last_key = bytes::Bytes::copy_from_slice(footer_reader.read_slice(last_key_len)?);
        blocks.push(BlockInfo::new(first_key, last_key, offset));
    }

    log::debug!("loaded index of {} blocks in {:?}", blocks.len(), start.elapsed());
    Ok(blocks)
}
