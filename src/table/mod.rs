// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Write-once tables: immutable, key-ordered, block-structured files.
//!
//! A table is built once through a [`Writer`] (or [`SortingWriter`] for
//! unsorted input), atomically published on sync, and then only ever
//! opened read-only. Non-seekable tables ([`Reader`]) decode whole blocks
//! and are the form index tables take; seekable tables
//! ([`SeekableReader`]) address individual rows by byte offset and back
//! the summary tables that posting offsets point into.

mod block;
mod header;
mod index;
mod reader;
mod seekable;
mod sorting_writer;
mod writer;

pub use reader::Reader;
pub use seekable::SeekableReader;
pub use sorting_writer::SortingWriter;
pub use writer::{Writer, WriterOptions};

use crate::coding::Decode;
use crate::file::{read_exact_at, LEVELDB_FOOTER_MAGIC, TABLE_MAGIC};
use crate::KvPair;
use byteorder::{ReadBytesExt, LE};
use enum_dispatch::enum_dispatch;
use std::fs::File;
use std::path::Path;

use header::TableHeader;

/// Reads and decodes the table header; version checks are left to
/// [`TableHeader::validate`].
pub(crate) fn read_header(file: &File) -> crate::Result<TableHeader> {
    let header_bytes = read_exact_at(file, 0, TableHeader::serialized_len())?;
    Ok(TableHeader::decode_from(&mut &header_bytes[..])?)
}

/// Cursor-style access to a key-ordered table.
#[enum_dispatch]
pub trait TableReader {
    /// Moves the cursor back to the first row.
    fn seek_to_first(&mut self);

    /// Positions the cursor at `key`.
    ///
    /// Returns `true` iff the key exists; otherwise the cursor lands on
    /// the smallest key greater than `key` (or the end), so prefix scans
    /// can continue from here.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read or decoded.
    fn seek_to_key(&mut self, key: &[u8]) -> crate::Result<bool>;

    /// Returns the row under the cursor and advances, or `None` at the
    /// end of the table.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read or decoded.
    fn read_row(&mut self) -> crate::Result<Option<KvPair>>;

    /// Advances the cursor by `n` rows; returns `false` if the end was
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read or decoded.
    fn skip(&mut self, n: usize) -> crate::Result<bool>;

    /// Whether rows are yielded in key order. Always `true` for
    /// write-once tables.
    fn is_sorted(&self) -> bool;
}

/// A reader over any recognized table format.
#[enum_dispatch(TableReader)]
pub enum AnyReader {
    /// Non-seekable write-once table
    Plain(Reader),

    /// Seekable write-once table
    Seekable(SeekableReader),
}

/// Known table backends.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    /// The write-once format of this crate
    WriteOnce,

    /// LevelDB-format SSTables; recognized but not linked in
    LevelDb,
}

fn detect_backend(file: &File) -> crate::Result<Backend> {
    let magic_bytes = read_exact_at(file, 0, 8)?;
    let magic = (&mut &magic_bytes[..]).read_u64::<LE>()?;

    if magic == TABLE_MAGIC {
        return Ok(Backend::WriteOnce);
    }

    let file_size = file.metadata()?.len();
    if file_size >= 8 {
        let footer_bytes = read_exact_at(file, file_size - 8, 8)?;
        let footer = (&mut &footer_bytes[..]).read_u64::<LE>()?;

        if footer == LEVELDB_FOOTER_MAGIC {
            return Ok(Backend::LevelDb);
        }
    }

    Err(crate::Error::InvalidInput(
        "unrecognized table format".into(),
    ))
}

/// Opens a table, sniffing the backend from its magic bytes and picking
/// the matching reader variant.
///
/// # Errors
///
/// Returns an error if the format is unrecognized, the backend is not
/// linked in, or the table is malformed.
pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<AnyReader> {
    open_as(None, path)
}

/// Like [`open`], but with an explicitly requested backend.
///
/// # Errors
///
/// See [`open`].
pub fn open_as<P: AsRef<Path>>(backend: Option<Backend>, path: P) -> crate::Result<AnyReader> {
    let file = File::open(path)?;

    let backend = match backend {
        Some(backend) => backend,
        None => detect_backend(&file)?,
    };

    match backend {
        Backend::LevelDb => Err(crate::Error::Unsupported("leveldb table backend")),
        Backend::WriteOnce => {
            let header = read_header(&file)?;

            Ok(if header.is_seekable() {
                AnyReader::Seekable(SeekableReader::from_parts(file, header)?)
            } else {
                AnyReader::Plain(Reader::from_parts(file, header)?)
            })
        }
    }
}

/// Opens a table that must support byte-offset addressing.
///
/// # Errors
///
/// Returns an error if the table was not built with seekable blocks.
pub fn open_seekable<P: AsRef<Path>>(path: P) -> crate::Result<SeekableReader> {
    let file = File::open(path)?;

    match detect_backend(&file)? {
        Backend::LevelDb => Err(crate::Error::Unsupported("leveldb table backend")),
        Backend::WriteOnce => {
            let header = read_header(&file)?;
            SeekableReader::from_parts(file, header)
        }
    }
}
