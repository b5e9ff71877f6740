// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Posting lists: sorted `(offset, score)` sequences and their wire codec.
//!
//! A posting list is serialized as a 1-byte encoding tag followed by a
//! self-describing payload. The encoder picks the cheapest encoding for
//! the shape of the input (empty, single entry, percentile bands, integer
//! scores, arbitrary floats); the decoder handles every tag.

mod decode;
mod encode;
mod flexi;
pub mod merge;

pub use decode::{count, decode, max_offset};
pub use encode::{encode, encoded_size_hint};
pub use merge::{merge_posting_tables, merge_postings, MergeMode, TableMergeOptions};

use crate::coding::DecodeError;

/// Percentile bands attached to a score; all-or-none per entry.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ScoreBands {
    /// 5th percentile
    pub pct5: f32,

    /// 25th percentile
    pub pct25: f32,

    /// 75th percentile
    pub pct75: f32,

    /// 95th percentile
    pub pct95: f32,
}

/// One element of a posting list: a document offset with a score.
///
/// Offsets within a list are strictly increasing; they address rows in
/// the global summary-table offset space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PostingEntry {
    /// Byte offset into the global summary space
    pub offset: u64,

    /// Score associated with the document
    pub score: f32,

    /// Optional percentile bands
    pub bands: Option<ScoreBands>,
}

impl PostingEntry {
    /// Creates an entry without percentile bands.
    #[must_use]
    pub fn new(offset: u64, score: f32) -> Self {
        Self {
            offset,
            score,
            bands: None,
        }
    }

    /// Creates an entry with percentile bands.
    #[must_use]
    pub fn with_bands(offset: u64, score: f32, bands: ScoreBands) -> Self {
        Self {
            offset,
            score,
            bands: Some(bands),
        }
    }
}

/// Wire encodings for posting lists.
///
/// Tags 2–5 belonged to retired encodings and are rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum EncodingTag {
    /// Delta offsets, then score plus four percentile bands per entry
    WithPrediction = 0,

    /// Interleaved delta offset + raw f32 score; decoded only
    Plain = 1,

    /// GCD-quantized delta offsets, RLE-compressed fixed-width integer
    /// scores
    Flexi = 6,

    /// Delta-varint offsets, raw f32 scores
    DeltaVarintFloat = 7,

    /// Delta-varint offsets, zigzag-varint integer scores
    DeltaVarintVarint = 8,

    /// Single entry, f32 score
    SingleFloat = 9,

    SinglePositive1 = 10,
    SingleNegative1 = 11,
    SinglePositive2 = 12,
    SingleNegative2 = 13,
    SinglePositive3 = 14,
    SingleNegative3 = 15,

    /// No entries at all
    Empty = 16,
}

impl TryFrom<u8> for EncodingTag {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Self::WithPrediction),
            1 => Ok(Self::Plain),
            6 => Ok(Self::Flexi),
            7 => Ok(Self::DeltaVarintFloat),
            8 => Ok(Self::DeltaVarintVarint),
            9 => Ok(Self::SingleFloat),
            10 => Ok(Self::SinglePositive1),
            11 => Ok(Self::SingleNegative1),
            12 => Ok(Self::SinglePositive2),
            13 => Ok(Self::SingleNegative2),
            14 => Ok(Self::SinglePositive3),
            15 => Ok(Self::SingleNegative3),
            16 => Ok(Self::Empty),
            tag => Err(DecodeError::InvalidTag(("PostingList", tag))),
        }
    }
}

/// Encodes `values` and inserts the posting list under `key`.
///
/// # Errors
///
/// Returns an error if the insert fails (e.g. key out of order).
pub fn write_postings(
    writer: &mut crate::table::Writer,
    key: &[u8],
    values: &[PostingEntry],
) -> crate::Result<()> {
    let buffer = encode(values);
    debug_assert!(buffer.len() <= encoded_size_hint(values));

    // In debug builds, verify the list survives a decode before it is
    // committed to disk
    #[cfg(debug_assertions)]
    {
        #[allow(clippy::expect_used)]
        let decoded = decode(&buffer).expect("posting list should decode");

        debug_assert_eq!(values.len(), decoded.len());

        for (expected, got) in values.iter().zip(&decoded) {
            debug_assert_eq!(expected.offset, got.offset);
            debug_assert!(
                expected.score.to_bits() == got.score.to_bits()
                    || (expected.score.is_nan() && got.score.is_nan()),
            );
        }
    }

    writer.insert_row(key, &buffer)
}
