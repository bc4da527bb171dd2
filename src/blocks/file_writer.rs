//! Writes a block file: many flushed blocks plus the footer index.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::blocks::encoding as block_encoding;
use crate::blocks::info::BlockInfo;
use crate::blocks::writer::BlockWriter;
use crate::blocks::{FILE_SIGNATURE, FILE_VERSION};
use crate::config::Options;
use crate::entry::{BlockEntry, BlockStats};
use crate::error::Result;

/// Streams sorted entries into a block file.
///
/// The file-level stats passed at construction are the delta base: every
/// entry is stored with `seq_id` and `timestamp` relative to the stats
/// minima, and the reader adds them back. Entries must therefore not carry
/// a `seq_id` or `timestamp` below the stats minima, and must arrive in
/// ascending [`BlockEntry::compare`] order.
pub struct DataBlocksWriter {
    writer: BufWriter<File>,
    block: BlockWriter,
    file_stats: BlockStats,
    blocks: Vec<BlockInfo>,
    offset: u64,
    first_key: Option<Bytes>,
    last_key: Bytes,
    options: Options,
}

impl DataBlocksWriter {
    /// Creates the file and writes the signature and file-level stats.
    pub fn new<P: AsRef<Path>>(path: P, file_stats: BlockStats, options: &Options) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(64);
        header.extend_from_slice(&FILE_SIGNATURE);
        header.push(FILE_VERSION);
        file_stats.write_to(&mut header);
        writer.write_all(&header)?;

        Ok(Self {
            writer,
            block: BlockWriter::new(options),
            file_stats,
            blocks: Vec::new(),
            offset: header.len() as u64,
            first_key: None,
            last_key: Bytes::new(),
            options: options.clone(),
        })
    }

    /// Appends one entry, rolling over to a new block when the current one
    /// is full.
    pub fn add(&mut self, entry: &BlockEntry) -> Result<()> {
        let seq_id_min = self.file_stats.seq_id_min();
        let timestamp_min = self.file_stats.timestamp_min();
        debug_assert!(entry.seq_id >= seq_id_min && entry.timestamp >= timestamp_min);

        let adjusted = BlockEntry {
            key: entry.key.clone(),
            value: entry.value.clone(),
            seq_id: entry.seq_id - seq_id_min,
            timestamp: entry.timestamp - timestamp_min,
            flags: entry.flags,
        };

        if self.block.has_data() && !self.block.has_space(&adjusted) {
            self.flush_block()?;
        }
        if self.first_key.is_none() {
            self.first_key = Some(entry.key.clone());
        }
        self.block.add(&adjusted);
        self.last_key = entry.key.clone();
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if !self.block.has_data() {
            return Ok(());
        }
        let first_key = self.first_key.take().expect("open block without a first key");
        let info = BlockInfo::new(first_key, self.last_key.clone(), self.offset);
        let written = self.block.flush(&mut self.writer)?;
        self.offset += written as u64;
        self.blocks.push(info);
        Ok(())
    }

    /// Bytes written so far plus the bytes buffered in the open block.
    pub fn estimate_size(&self) -> u64 {
        self.offset + self.block.buffered_bytes() as u64
    }

    /// Flushes the trailing block, writes the footer index and the fixed
    /// footer-length trailer, and returns the per-block index.
    pub fn finish(mut self) -> Result<Vec<BlockInfo>> {
        self.flush_block()?;

        let mut footer = Vec::with_capacity(64 + self.blocks.len() * 32);
        crate::encoding::write_varint(&mut footer, self.blocks.len() as u64);
        for info in &self.blocks {
            crate::encoding::write_varint(&mut footer, info.offset());
            crate::encoding::write_varint(&mut footer, info.first_key().len() as u64);
            crate::encoding::write_varint(&mut footer, info.last_key().len() as u64);
            footer.extend_from_slice(info.first_key());
            footer.extend_from_slice(info.last_key());
        }

        let mut envelope = Vec::with_capacity(footer.len() / 2 + 128);
        let envelope_len = block_encoding::encode(
            &mut envelope,
            &footer,
            self.options.checksum,
            self.options.compression_level,
        )?;
        self.writer.write_all(&envelope)?;
        self.writer.write_all(&(envelope_len as u32).to_be_bytes())?;
        self.writer.flush()?;

        Ok(self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::file_reader::DataBlocksReader;
    use crate::blocks::BlockEntryIterator;
    use tempfile::TempDir;

    fn entry(key: &str, value: &str, seq_id: u64) -> BlockEntry {
        BlockEntry::new(
            Bytes::from(key.to_string()),
            Bytes::from(value.to_string()),
            seq_id,
            10_000 + seq_id,
        )
    }

    fn stats_for(entries: &[BlockEntry]) -> BlockStats {
        let mut stats = BlockStats::new();
        for e in entries {
            stats.update(e);
        }
        stats
    }

    #[test]
    fn test_single_block_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000000000000000001.blk");

        let entries: Vec<BlockEntry> =
            (0..10).map(|i| entry(&format!("key{:04}", i), "value", i + 100)).collect();
        let mut writer =
            DataBlocksWriter::new(&path, stats_for(&entries), &Options::default()).unwrap();
        for e in &entries {
            writer.add(e).unwrap();
        }
        let blocks = writer.finish().unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].first_key(), b"key0000");
        assert_eq!(blocks[0].last_key(), b"key0009");

        let mut reader = DataBlocksReader::open(&path, None).unwrap();
        reader.seek_to_first().unwrap();
        let mut decoded = Vec::new();
        while reader.has_more_entries().unwrap() {
            decoded.push(reader.next_entry().unwrap());
        }
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_multi_block_rollover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000000000000000002.blk");

        // tiny buffer so the writer rolls over many times
        let options = Options::new().block_buffer_size(4096).restart_interval(512);
        let entries: Vec<BlockEntry> = (0..2000)
            .map(|i| entry(&format!("key{:08}", i), &format!("value{:08}", i), i + 1))
            .collect();
        let mut writer = DataBlocksWriter::new(&path, stats_for(&entries), &options).unwrap();
        for e in &entries {
            writer.add(e).unwrap();
        }
        let blocks = writer.finish().unwrap();
        assert!(blocks.len() > 1, "expected multiple blocks, got {}", blocks.len());

        // ranges are ordered, non-overlapping, ascending by offset
        for pair in blocks.windows(2) {
            assert!(pair[0].last_key() < pair[1].first_key());
            assert!(pair[0].offset() < pair[1].offset());
        }

        let mut reader = DataBlocksReader::open(&path, None).unwrap();
        reader.seek_to_first().unwrap();
        let mut decoded = Vec::new();
        while reader.has_more_entries().unwrap() {
            decoded.push(reader.next_entry().unwrap());
        }
        assert_eq!(decoded.len(), entries.len());
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_seq_and_timestamp_restored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000000000000000003.blk");

        // large absolute values exercise the delta against the file minima
        let entries =
            vec![entry("a", "1", 9_000_000_123), entry("b", "2", 9_000_000_456)];
        let mut writer =
            DataBlocksWriter::new(&path, stats_for(&entries), &Options::default()).unwrap();
        for e in &entries {
            writer.add(e).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = DataBlocksReader::open(&path, None).unwrap();
        reader.seek_to_first().unwrap();
        assert_eq!(reader.next_entry().unwrap().seq_id, 9_000_000_123);
        assert_eq!(reader.next_entry().unwrap().seq_id, 9_000_000_456);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000000000000000004.blk");

        let writer =
            DataBlocksWriter::new(&path, BlockStats::new(), &Options::default()).unwrap();
        let blocks = writer.finish().unwrap();
        assert!(blocks.is_empty());

        let mut reader = DataBlocksReader::open(&path, None).unwrap();
        assert!(!reader.has_more_entries().unwrap());
        assert!(!reader.seek_to(b"anything").unwrap());
    }
}
