// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A write-once table store and inverted-index query engine for very large
//! entity catalogs.
//!
//! ##### About
//!
//! This crate stores a catalog of entities as a set of *write-once tables*:
//! immutable, key-ordered, block-structured files that are built in one pass
//! and never mutated. Two kinds of tables make up a catalog:
//!
//! - *Summary tables* map entity keys to JSON-shaped summary documents.
//!   Many summary tables partition a global byte-offset space.
//! - *Index tables* map keywords to *posting lists*: sorted
//!   `(offset, score)` sequences pointing back into the summary space,
//!   stored in one of several specialized encodings.
//!
//! On top of that sit a k-way merge for rebuilding shards and a query
//! engine that combines posting lists with boolean and range operators,
//! resolves the surviving offsets against the summary tables and assembles
//! JSON output.
//!
//! # Example usage
//!
//! ```
//! use quarry::table::{Reader, TableReader, Writer, WriterOptions};
//! #
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path().join("table");
//!
//! // Build a table; keys must be inserted in strictly ascending order
//! let mut writer = Writer::create(&path, WriterOptions::default())?;
//! writer.insert_row("a", "xxx")?;
//! writer.insert_row("b", "yyy")?;
//! writer.sync()?;
//!
//! // Tables become visible atomically on sync
//! let mut reader = Reader::open(&path)?;
//! assert!(reader.seek_to_key(b"b")?);
//! #
//! # Ok::<(), quarry::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        }
    };
}

pub mod cas;

mod coding;

mod compression;

mod error;

#[doc(hidden)]
pub mod file;

mod hash;

mod json;

#[doc(hidden)]
pub mod merge;

pub mod postings;

pub mod query;

mod schema;

mod slice;

pub mod table;

/// KV-tuple, typically returned by [`table::TableReader::read_row`]
pub type KvPair = (UserKey, UserValue);

#[doc(hidden)]
pub use {
    hash::hash64,
    json::{double_to_string, float_to_string, ToJson},
    merge::Merger,
};

pub use {
    coding::{Decode, DecodeError, Encode, EncodeError},
    compression::CompressionType,
    error::{Error, Result},
    postings::{PostingEntry, ScoreBands},
    schema::Schema,
    slice::Slice,
};

/// A key in a table, in unsigned-byte lexicographic order
pub type UserKey = Slice;

/// A value in a table; opaque bytes
pub type UserValue = Slice;
