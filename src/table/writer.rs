// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::Block;
use super::header::TableHeader;
use super::index::BlockIndex;
use crate::coding::Encode;
use crate::file::fsync_directory;
use crate::{CompressionType, UserKey};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Serialized estimate above which the current block is flushed before
/// the next insert.
const BLOCK_SIZE_MAX: usize = 32 * 1024;

/// A row larger than this starts its own block, unless the current block
/// is still below `BLOCK_SIZE_MIN`.
const ENTRY_SIZE_LIMIT: usize = BLOCK_SIZE_MAX - 4;

const BLOCK_SIZE_MIN: usize = 12 * 1024;

/// Write-once table build options.
#[derive(Copy, Clone, Debug)]
pub struct WriterOptions {
    /// Block and index compression. Block data of *seekable* tables is
    /// always stored raw, because postings address rows by byte offset;
    /// the index is still compressed.
    pub compression: CompressionType,

    /// zstd compression level; `0` selects the default level 3.
    pub compression_level: i32,

    /// Produce seekable blocks (summary tables) instead of compact ones
    /// (index tables).
    pub seekable: bool,

    /// Whether to fsync file and directory before publishing.
    pub fsync: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            compression_level: 0,
            seekable: false,
            fsync: true,
        }
    }
}

/// Buffers sorted rows into blocks and writes a write-once table.
///
/// The table is written under a temporary sibling name and atomically
/// renamed into place on [`Writer::sync`]; a dropped, unsynced writer
/// leaves nothing behind under the target path.
pub struct Writer {
    path: PathBuf,

    /// Temp file holding the partially written table; deleted on drop
    /// unless published
    file: Option<NamedTempFile>,

    opts: WriterOptions,
    compression_level: i32,

    block: Block,
    index: BlockIndex,

    last_key: Option<UserKey>,
    row_count: u64,
}

impl Writer {
    /// Starts building a table at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, opts: WriterOptions) -> crate::Result<Self> {
        let path = path.as_ref();

        let folder = path.parent().ok_or_else(|| {
            crate::Error::InvalidInput(format!("table path has no parent: {}", path.display()))
        })?;
        let folder = if folder.as_os_str().is_empty() {
            Path::new(".")
        } else {
            folder
        };

        let mut file = NamedTempFile::new_in(folder)?;

        let compression_level = match opts.compression_level {
            0 if opts.compression != CompressionType::None => 3,
            level => level,
        };

        // Placeholder header; rewritten with the real index offset on sync
        let header = TableHeader::new(opts.seekable, opts.compression, 0);
        file.write_all(&header.encode_into_vec())?;

        log::trace!("creating write-once table at {}", path.display());

        Ok(Self {
            path: path.into(),
            file: Some(file),
            opts,
            compression_level,
            block: Block::default(),
            index: BlockIndex::default(),
            last_key: None,
            row_count: 0,
        })
    }

    /// Number of rows inserted so far.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Inserts a row; keys must arrive in strictly ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::KeyOutOfOrder`] if `key` does not sort
    /// strictly after the previously inserted key.
    pub fn insert_row<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        key: K,
        value: V,
    ) -> crate::Result<()> {
        let key = key.as_ref();
        let value = value.as_ref();

        if let Some(last_key) = &self.last_key {
            if key <= last_key.as_ref() {
                return Err(crate::Error::KeyOutOfOrder {
                    prev: last_key.clone(),
                    next: UserKey::from(key),
                });
            }
        }

        let row_size = key.len() + value.len();
        let block_size = self.block.serialized_size();

        if block_size > BLOCK_SIZE_MAX
            || (block_size > BLOCK_SIZE_MIN && row_size > ENTRY_SIZE_LIMIT)
        {
            self.flush_block()?;
        }

        self.block.add(key, value);
        self.last_key = Some(UserKey::from(key));
        self.row_count += 1;

        Ok(())
    }

    /// Writes out all buffered data and atomically publishes the table.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; no file appears under the target
    /// path in that case.
    pub fn sync(mut self) -> crate::Result<()> {
        self.flush_block()?;

        let index_payload = self.index.marshal()?;
        let index_payload = self
            .opts
            .compression
            .compress(&index_payload, self.compression_level)?;

        let index_offset = self.index.index_offset();

        let mut file = self.file.take().ok_or(crate::Error::Unsupported(
            "writer was already synced",
        ))?;

        file.write_all(&index_payload)?;

        // Rewrite the header with the now-known index offset
        let header = TableHeader::new(self.opts.seekable, self.opts.compression, index_offset);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode_into_vec())?;
        file.flush()?;

        if self.opts.fsync {
            file.as_file().sync_all()?;
        }

        let folder = self.path.parent().map(Path::to_path_buf);

        file.persist(&self.path).map_err(|e| crate::Error::Io(e.error))?;

        if self.opts.fsync {
            if let Some(folder) = folder {
                fsync_directory(&folder)?;
            }
        }

        log::debug!(
            "published table {} ({} blocks, {} rows)",
            self.path.display(),
            self.index.len(),
            self.row_count,
        );

        Ok(())
    }

    fn flush_block(&mut self) -> crate::Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        let mut payload = vec![];
        self.block.marshal(self.opts.seekable, &mut payload)?;

        // Seekable block data stays raw so byte offsets keep addressing rows
        let payload = if self.opts.seekable {
            payload
        } else {
            self.opts
                .compression
                .compress(&payload, self.compression_level)?
        };

        let file = self.file.as_mut().ok_or(crate::Error::Unsupported(
            "writer was already synced",
        ))?;
        file.write_all(&payload)?;

        log::trace!(
            "flushed block #{} ({} rows, {} bytes)",
            self.index.len(),
            self.block.len(),
            payload.len(),
        );

        self.index.add(&self.block, payload.len() as u64);
        self.block.clear();

        Ok(())
    }
}
