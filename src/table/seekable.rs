// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::header::TableHeader;
use super::index::BlockIndex;
use super::TableReader;
use crate::file::read_exact_at;
use crate::{KvPair, UserKey, UserValue};
use memmap2::Mmap;
use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;
use varint_rs::VarintReader;

/// Reader over a seekable write-once table.
///
/// The data region (everything before the block index) is memory-mapped,
/// and the cursor is a plain byte offset into it, so rows can be
/// addressed by the byte offsets that posting lists store. Block data of
/// seekable tables is never compressed; the index still may be.
pub struct SeekableReader {
    /// Keeps the mapping alive
    #[allow(dead_code)]
    file: File,

    map: Mmap,

    index: BlockIndex,
    index_offset: u64,

    /// Absolute file offset of the cursor
    pos: u64,
}

impl SeekableReader {
    /// Opens a seekable write-once table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed, has an unsupported
    /// version, or was not built with seekable blocks.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path)?;
        let header = super::read_header(&file)?;
        Self::from_parts(file, header)
    }

    pub(crate) fn from_parts(file: File, header: TableHeader) -> crate::Result<Self> {
        header.validate()?;

        if !header.is_seekable() {
            return Err(crate::Error::InvalidInput(
                "the write-once table is not seekable".into(),
            ));
        }

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

        // The mapping covers the data region only; the index is already
        // decoded above
        #[allow(unsafe_code)]
        let map = unsafe {
            memmap2::MmapOptions::new()
                .len(header.index_offset as usize)
                .map(&file)?
        };

        Ok(Self {
            file,
            map,
            index,
            index_offset: header.index_offset,
            pos: TableHeader::serialized_len() as u64,
        })
    }

    /// Cursor position in bytes, counted from the end of the header.
    ///
    /// This is the offset space that posting lists reference.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.pos - TableHeader::serialized_len() as u64
    }

    /// Moves the cursor to a byte offset; must land on a row boundary for
    /// subsequent reads to make sense.
    ///
    /// # Errors
    ///
    /// Returns an error if the target lies outside the data region.
    pub fn seek(&mut self, pos: SeekFrom) -> crate::Result<()> {
        let header_len = TableHeader::serialized_len() as u64;

        let target = match pos {
            SeekFrom::Start(offset) => header_len.checked_add(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.index_offset.checked_add_signed(delta),
        };

        let Some(target) = target else {
            return Err(crate::Error::InvalidInput("seek target overflows".into()));
        };

        if target < header_len {
            return Err(crate::Error::InvalidInput(
                "attempt to seek before start of table".into(),
            ));
        }
        if target > self.index_offset {
            return Err(crate::Error::InvalidInput(
                "attempt to seek past end of table".into(),
            ));
        }

        self.pos = target;

        Ok(())
    }

    /// Parses the row at `pos`, returning borrowed key/value and the
    /// offset one past the row.
    fn row_at(&self, pos: u64) -> crate::Result<(&[u8], &[u8], u64)> {
        let data = self
            .map
            .get(pos as usize..self.index_offset as usize)
            .ok_or_else(|| crate::Error::InvalidInput("row offset out of range".into()))?;

        let mut reader = data;
        let key_size = reader.read_u32_varint()? as usize;
        let value_size = reader.read_u32_varint()? as usize;
        let varint_bytes = data.len() - reader.len();

        let key = reader
            .get(..key_size)
            .ok_or(crate::Error::Decode(crate::DecodeError::Truncated("Row")))?;
        let value = reader
            .get(key_size..key_size + value_size)
            .ok_or(crate::Error::Decode(crate::DecodeError::Truncated("Row")))?;

        let next = pos + (varint_bytes + key_size + value_size) as u64;

        Ok((key, value, next))
    }
}

impl TableReader for SeekableReader {
    fn seek_to_first(&mut self) {
        self.pos = TableHeader::serialized_len() as u64;
    }

    fn seek_to_key(&mut self, key: &[u8]) -> crate::Result<bool> {
        let block_idx = self.index.find_block(key);

        if block_idx < self.index.len() {
            // Linear scan through the candidate block (and past it, if the
            // index was conservative)
            let mut pos = self.index.block_offset(block_idx);

            while pos < self.index_offset {
                let (ordering, next) = {
                    let (row_key, _, next) = self.row_at(pos)?;
                    (row_key.cmp(key), next)
                };

                if ordering != std::cmp::Ordering::Less {
                    self.pos = pos;
                    return Ok(ordering == std::cmp::Ordering::Equal);
                }

                pos = next;
            }
        }

        self.pos = self.index_offset;

        Ok(false)
    }

    fn read_row(&mut self) -> crate::Result<Option<KvPair>> {
        if self.pos >= self.index_offset {
            return Ok(None);
        }

        let (key, value, next) = self.row_at(self.pos)?;
        let row = (UserKey::from(key), UserValue::from(value));

        self.pos = next;

        Ok(Some(row))
    }

    fn skip(&mut self, n: usize) -> crate::Result<bool> {
        for _ in 0..n {
            if self.read_row()?.is_none() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn is_sorted(&self) -> bool {
        true
    }
}
