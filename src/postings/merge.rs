// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Merging posting lists across table shards.

use super::{decode, write_postings, PostingEntry};
use crate::hash::hash64;
use crate::merge::Merger;
use crate::table::{TableReader, Writer};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// How posting entries that collide on the same offset are combined.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MergeMode {
    /// Colliding entries must carry the same score; one copy is kept.
    Union,

    /// The first writer wins, except that an entry carrying percentile
    /// bands yields to a later band-less entry.
    PickOne,

    /// Scores of colliding entries are added.
    Sum,
}

/// Merges per-source posting vectors for one key into a single strictly
/// offset-ordered vector.
///
/// Sources are drained by ascending `(offset, source index)`, so earlier
/// sources win ties deterministically.
///
/// # Errors
///
/// Returns an error when [`MergeMode::Union`] hits conflicting scores, or
/// [`MergeMode::Sum`] hits percentile bands.
#[allow(clippy::indexing_slicing)]
pub fn merge_postings(
    lists: &[Vec<PostingEntry>],
    mode: MergeMode,
) -> crate::Result<Vec<PostingEntry>> {
    let mut heap = BinaryHeap::with_capacity(lists.len());
    let mut positions = vec![0usize; lists.len()];

    for (idx, list) in lists.iter().enumerate() {
        if let Some(first) = list.first() {
            heap.push(Reverse((first.offset, idx)));
        }
    }

    let mut merged: Vec<PostingEntry> =
        Vec::with_capacity(lists.iter().map(Vec::len).sum());

    while let Some(Reverse((_, idx))) = heap.pop() {
        let value = lists[idx][positions[idx]];
        positions[idx] += 1;

        if let Some(next) = lists[idx].get(positions[idx]) {
            heap.push(Reverse((next.offset, idx)));
        }

        match merged.last_mut() {
            Some(last) if last.offset == value.offset => match mode {
                MergeMode::Union => {
                    if last.score != value.score {
                        return Err(crate::Error::InvalidInput(format!(
                            "conflicting scores for offset {} in union merge",
                            value.offset,
                        )));
                    }
                }

                MergeMode::PickOne => {
                    if last.bands.is_some() && value.bands.is_none() {
                        last.score = value.score;
                        last.bands = None;
                    }
                }

                MergeMode::Sum => {
                    if value.bands.is_some() {
                        return Err(crate::Error::InvalidInput(
                            "cannot sum-merge entries with percentile bands".into(),
                        ));
                    }

                    last.score += value.score;
                }
            },

            _ => merged.push(value),
        }
    }

    Ok(merged)
}

/// Key handling during a table merge.
#[derive(Clone, Debug, Default)]
pub struct TableMergeOptions {
    /// Offset collision handling; defaults to [`MergeMode::PickOne`].
    pub mode: Option<MergeMode>,

    /// Prefix every input key must carry; it is removed.
    pub strip_key_prefix: Option<Vec<u8>>,

    /// Prefix prepended to every output key.
    pub add_key_prefix: Option<Vec<u8>>,

    /// Keep only keys with `hash64(key) % count == index`.
    pub shard: Option<(u64, u64)>,
}

/// Merges the posting lists of several sorted index tables into `writer`.
///
/// Rows sharing a key across tables are combined into one posting list
/// per output key. The writer is left unsynced so callers can keep
/// appending; publish with [`Writer::sync`].
///
/// # Errors
///
/// Returns an error on I/O failure, undecodable posting lists, or merge
/// conflicts.
pub fn merge_posting_tables<R: TableReader + 'static>(
    sources: Vec<R>,
    writer: &mut Writer,
    opts: &TableMergeOptions,
) -> crate::Result<()> {
    let mode = opts.mode.unwrap_or(MergeMode::PickOne);

    for group in Merger::from_readers(sources).grouped() {
        let (key, raw_lists) = group?;
        let mut key = key.to_vec();

        if let Some((count, index)) = opts.shard {
            if hash64(&key) % count != index {
                continue;
            }
        }

        if let Some(prefix) = &opts.strip_key_prefix {
            if !key.starts_with(prefix) {
                return Err(crate::Error::InvalidInput(format!(
                    "key without expected prefix: {:?}",
                    String::from_utf8_lossy(&key),
                )));
            }

            key.drain(..prefix.len());
        }

        if let Some(prefix) = &opts.add_key_prefix {
            let mut prefixed = prefix.clone();
            prefixed.extend_from_slice(&key);
            key = prefixed;
        }

        let lists = raw_lists
            .iter()
            .map(|raw| decode(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let merged = merge_postings(&lists, mode)?;

        log::trace!(
            "merged {} lists into {} entries for key {:?}",
            lists.len(),
            merged.len(),
            String::from_utf8_lossy(&key),
        );

        write_postings(writer, &key, &merged)?;
    }

    Ok(())
}
