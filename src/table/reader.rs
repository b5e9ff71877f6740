// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::Block;
use super::header::TableHeader;
use super::index::BlockIndex;
use super::TableReader;
use crate::file::read_exact_at;
use crate::{CompressionType, KvPair, UserKey, UserValue};
use std::fs::File;
use std::path::Path;

/// Reader over a non-seekable (compact-block) write-once table.
///
/// Blocks are fetched with positional reads and decoded whole; the reader
/// keeps exactly one decoded block around. The cursor walks rows in key
/// order; `seek_to_key` binary-searches the block index, then the block.
pub struct Reader {
    file: File,
    compression: CompressionType,
    seekable_blocks: bool,

    index: BlockIndex,

    /// Currently decoded block, if any
    block: Block,
    decoded_idx: Option<usize>,

    /// Cursor
    block_idx: usize,
    row_idx: usize,
}

impl Reader {
    /// Opens a write-once table for block-decoded reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed, or has an
    /// unsupported version.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path)?;
        let header = super::read_header(&file)?;
        Self::from_parts(file, header)
    }

    pub(crate) fn from_parts(file: File, header: TableHeader) -> crate::Result<Self> {
        header.validate()?;

        let file_size = file.metadata()?.len();

        if header.index_offset < TableHeader::serialized_len() as u64
            || header.index_offset > file_size
        {
            return Err(crate::Error::InvalidInput(format!(
                "index offset {} outside of table of {file_size} bytes",
                header.index_offset,
            )));
        }

        let index_payload = read_exact_at(
            &file,
            header.index_offset,
            (file_size - header.index_offset) as usize,
        )?;
        let index_payload = header.compression.decompress(&index_payload)?;
        let index = BlockIndex::unmarshal(&index_payload)?;

        Ok(Self {
            file,
            compression: header.compression,
            seekable_blocks: header.is_seekable(),
            index,
            block: Block::default(),
            decoded_idx: None,
            block_idx: 0,
            row_idx: 0,
        })
    }

    fn load_block(&mut self, idx: usize) -> crate::Result<()> {
        if self.decoded_idx == Some(idx) {
            return Ok(());
        }

        let payload = read_exact_at(
            &self.file,
            self.index.block_offset(idx),
            self.index.block_size(idx) as usize,
        )?;

        // Seekable tables store their block data raw
        let payload = if self.seekable_blocks {
            payload
        } else {
            self.compression.decompress(&payload)?
        };

        self.block = Block::unmarshal(
            &payload,
            self.index.row_count(idx) as usize,
            self.seekable_blocks,
        )?;
        self.decoded_idx = Some(idx);

        Ok(())
    }
}

impl TableReader for Reader {
    fn seek_to_first(&mut self) {
        self.block_idx = 0;
        self.row_idx = 0;
    }

    fn seek_to_key(&mut self, key: &[u8]) -> crate::Result<bool> {
        let block_idx = self.index.find_block(key);

        if block_idx >= self.index.len() {
            self.block_idx = self.index.len();
            self.row_idx = 0;
            return Ok(false);
        }

        self.load_block(block_idx)?;

        let row_idx = self.block.find_row(key);
        self.block_idx = block_idx;
        self.row_idx = row_idx;

        if row_idx >= self.block.len() {
            // Key sorts after every row of the candidate block
            self.block_idx += 1;
            self.row_idx = 0;
            return Ok(false);
        }

        Ok(self.block.key(row_idx) == key)
    }

    fn read_row(&mut self) -> crate::Result<Option<KvPair>> {
        if self.block_idx >= self.index.len() {
            return Ok(None);
        }

        self.load_block(self.block_idx)?;

        let key = UserKey::from(self.block.key(self.row_idx));
        let value = UserValue::from(self.block.value(self.row_idx));

        self.row_idx += 1;
        if self.row_idx >= self.index.row_count(self.block_idx) as usize {
            self.block_idx += 1;
            self.row_idx = 0;
        }

        Ok(Some((key, value)))
    }

    fn skip(&mut self, n: usize) -> crate::Result<bool> {
        let mut remaining = n;

        while remaining > 0 {
            if self.block_idx >= self.index.len() {
                return Ok(false);
            }

            // Whole blocks are skipped without decoding them
            let available = self.index.row_count(self.block_idx) as usize - self.row_idx;

            if remaining < available {
                self.row_idx += remaining;
                remaining = 0;
            } else {
                self.block_idx += 1;
                self.row_idx = 0;
                remaining -= available;
            }
        }

        Ok(true)
    }

    fn is_sorted(&self) -> bool {
        true
    }
}
