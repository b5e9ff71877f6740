// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::writer::{Writer, WriterOptions};
use crate::file::read_exact_at;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const KEY_PREFIX_LEN: usize = 24;

/// In-memory record of one spilled row.
struct SpillEntry {
    offset: u64,
    key_size: u32,
    value_size: u32,
    prefix: [u8; KEY_PREFIX_LEN],
}

impl SpillEntry {
    fn prefix(&self) -> &[u8] {
        let len = (self.key_size as usize).min(KEY_PREFIX_LEN);

        #[allow(clippy::indexing_slicing)]
        &self.prefix[..len]
    }
}

/// Accepts rows in arbitrary order and builds a sorted write-once table.
///
/// Rows are spilled to an unnamed temporary file next to the target path;
/// only a fixed-size entry per row (offset, sizes and a 24-byte key
/// prefix) is kept in memory. Sorting compares the prefixes first and
/// reads full keys from the spill file only on prefix ties, using a stable
/// merge sort so equal inputs keep their insertion order.
pub struct SortingWriter {
    inner: Writer,

    spill: BufWriter<File>,
    entries: Vec<SpillEntry>,

    offset: u64,
    max_key_size: u32,
}

impl SortingWriter {
    /// Starts building a table at `path` from unsorted input.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp files cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, opts: WriterOptions) -> crate::Result<Self> {
        let path = path.as_ref();
        let inner = Writer::create(path, opts)?;

        let folder = path.parent().filter(|p| !p.as_os_str().is_empty());
        let spill = match folder {
            Some(folder) => tempfile::tempfile_in(folder)?,
            None => tempfile::tempfile()?,
        };

        Ok(Self {
            inner,
            spill: BufWriter::new(spill),
            entries: Vec::new(),
            offset: 0,
            max_key_size: 0,
        })
    }

    /// Buffers a row; any key order is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if spilling to disk fails.
    pub fn insert_row<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        key: K,
        value: V,
    ) -> crate::Result<()> {
        let key = key.as_ref();
        let value = value.as_ref();

        let mut prefix = [0u8; KEY_PREFIX_LEN];
        let prefix_len = key.len().min(KEY_PREFIX_LEN);

        #[allow(clippy::indexing_slicing)]
        prefix[..prefix_len].copy_from_slice(&key[..prefix_len]);

        self.entries.push(SpillEntry {
            offset: self.offset,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
            prefix,
        });

        self.spill.write_all(key)?;
        self.spill.write_all(value)?;

        self.offset += (key.len() + value.len()) as u64;
        self.max_key_size = self.max_key_size.max(key.len() as u32);

        Ok(())
    }

    /// Sorts the spilled rows and writes out the table.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, or [`crate::Error::KeyOutOfOrder`]
    /// if the input contained duplicate keys.
    pub fn sync(mut self) -> crate::Result<()> {
        self.spill.flush()?;
        let spill = self.spill.into_inner().map_err(|e| crate::Error::Io(e.into_error()))?;

        log::debug!("sorting {} spilled rows", self.entries.len());

        // Stable merge sort; full keys are only fetched on prefix ties
        let mut sort_error = None;
        self.entries.sort_by(|lhs, rhs| {
            match lhs.prefix().cmp(rhs.prefix()) {
                Ordering::Equal if lhs.key_size as usize > KEY_PREFIX_LEN
                    || rhs.key_size as usize > KEY_PREFIX_LEN =>
                {
                    let lhs_key = read_exact_at(&spill, lhs.offset, lhs.key_size as usize);
                    let rhs_key = read_exact_at(&spill, rhs.offset, rhs.key_size as usize);

                    match (lhs_key, rhs_key) {
                        (Ok(lhs_key), Ok(rhs_key)) => lhs_key.cmp(&rhs_key),
                        (Err(e), _) | (_, Err(e)) => {
                            if sort_error.is_none() {
                                sort_error = Some(e);
                            }
                            Ordering::Equal
                        }
                    }
                }
                ordering => ordering,
            }
        });

        if let Some(e) = sort_error {
            return Err(crate::Error::Io(e));
        }

        let mut inner = self.inner;

        for entry in &self.entries {
            let row = read_exact_at(
                &spill,
                entry.offset,
                entry.key_size as usize + entry.value_size as usize,
            )?;

            #[allow(clippy::indexing_slicing)]
            let (key, value) = row.split_at(entry.key_size as usize);
            inner.insert_row(key, value)?;
        }

        inner.sync()
    }
}
