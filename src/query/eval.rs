// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::lookup::{self, ExtraMetadata};
use super::{Query, RuntimeConfig, ScoreOperand};
use crate::table::TableReader;
use crate::{PostingEntry, Schema};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seed for `RandomSample`, fixed so query output is reproducible.
const SAMPLE_SEED: u64 = 1234;

/// Sorted union; on offset collision exactly one entry survives, taken
/// from the left side.
#[allow(clippy::comparison_chain)]
pub(crate) fn union_offsets(lhs: &[PostingEntry], rhs: &[PostingEntry]) -> Vec<PostingEntry> {
    let mut result = Vec::with_capacity(lhs.len() + rhs.len());

    let mut l = lhs.iter().peekable();
    let mut r = rhs.iter().peekable();

    while let (Some(&lv), Some(&rv)) = (l.peek(), r.peek()) {
        if lv.offset < rv.offset {
            result.push(*lv);
            l.next();
        } else if rv.offset < lv.offset {
            result.push(*rv);
            r.next();
        } else {
            result.push(*lv);
            l.next();
            r.next();
        }
    }

    result.extend(l.copied());
    result.extend(r.copied());

    result
}

/// Sorted intersection, in place. When the left side has duplicates of a
/// matching offset, all of them are kept; each right entry is consumed
/// once.
#[allow(clippy::comparison_chain, clippy::indexing_slicing)]
fn intersect_offsets(lhs: &mut Vec<PostingEntry>, rhs: &[PostingEntry]) {
    let mut out = 0;
    let mut l = 0;
    let mut r = 0;

    #[allow(clippy::indexing_slicing)]
    while l < lhs.len() && r < rhs.len() {
        if lhs[l].offset == rhs[r].offset {
            let offset = lhs[l].offset;

            while l < lhs.len() && lhs[l].offset == offset {
                lhs[out] = lhs[l];
                out += 1;
                l += 1;
            }

            r += 1;
        } else if lhs[l].offset < rhs[r].offset {
            l += 1;
        } else {
            r += 1;
        }
    }

    lhs.truncate(out);
}

/// Removes from `lhs` every offset contained in `rhs`, including
/// left-side duplicates.
#[allow(clippy::comparison_chain, clippy::indexing_slicing)]
pub(crate) fn subtract_offsets(lhs: &mut Vec<PostingEntry>, rhs: &[PostingEntry]) {
    let mut out = 0;
    let mut l = 0;
    let mut r = 0;

    #[allow(clippy::indexing_slicing)]
    while l < lhs.len() && r < rhs.len() {
        if lhs[l].offset == rhs[r].offset {
            let offset = rhs[r].offset;

            while l < lhs.len() && lhs[l].offset == offset {
                l += 1;
            }

            r += 1;
        } else if lhs[l].offset < rhs[r].offset {
            lhs[out] = lhs[l];
            out += 1;
            l += 1;
        } else {
            r += 1;
        }
    }

    #[allow(clippy::indexing_slicing)]
    while l < lhs.len() {
        lhs[out] = lhs[l];
        out += 1;
        l += 1;
    }

    lhs.truncate(out);
}

/// Joins on offset, keeping left entries whose score passes `filter`
/// against the matching right score. Left entries without a match are
/// dropped.
#[allow(clippy::comparison_chain, clippy::indexing_slicing)]
fn join_filter<F: Fn(f32, f32) -> bool>(
    lhs: &mut Vec<PostingEntry>,
    rhs: &[PostingEntry],
    filter: F,
) {
    let mut out = 0;
    let mut l = 0;
    let mut r = 0;

    #[allow(clippy::indexing_slicing)]
    while l < lhs.len() && r < rhs.len() {
        if lhs[l].offset < rhs[r].offset {
            l += 1;
        } else if rhs[r].offset < lhs[l].offset {
            r += 1;
        } else {
            if filter(lhs[l].score, rhs[r].score) {
                lhs[out] = lhs[l];
                out += 1;
            }

            l += 1;
            r += 1;
        }
    }

    lhs.truncate(out);
}

/// Replaces each left score with the right side's score at the same
/// offset; unmatched left entries score `-∞` so they sort last.
fn order_by(lhs: &mut [PostingEntry], rhs: &[PostingEntry]) {
    let mut r = 0;

    #[allow(clippy::indexing_slicing)]
    for entry in lhs.iter_mut() {
        while r < rhs.len() && rhs[r].offset < entry.offset {
            r += 1;
        }

        if r < rhs.len() && rhs[r].offset == entry.offset {
            entry.score = rhs[r].score;
            r += 1;
        } else {
            entry.score = f32::NEG_INFINITY;
        }
    }
}

/// Selection sampling with a fixed seed; the survivors are re-sorted by
/// offset.
#[allow(clippy::indexing_slicing)]
fn random_sample(offsets: &mut Vec<PostingEntry>, count: usize) {
    if offsets.len() <= count {
        return;
    }

    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);

    for i in count..offsets.len() {
        let j = rng.gen_range(0..=i);
        if j < count {
            offsets.swap(i, j);
        }
    }

    offsets.truncate(count);
    offsets.sort_by_key(|v| v.offset);
}

/// Collapses adjacent duplicate offsets, keeping the maximum or minimum
/// score.
pub(crate) fn remove_duplicates(data: &mut Vec<PostingEntry>, use_max: bool) {
    let mut out = 0;

    #[allow(clippy::indexing_slicing)]
    for i in 1..data.len() {
        if data[i].offset == data[out].offset {
            if use_max == (data[i].score > data[out].score) {
                data[out].score = data[i].score;
            }
        } else {
            out += 1;
            data[out] = data[i];
        }
    }

    data.truncate(if data.is_empty() { 0 } else { out + 1 });
}

fn scalar_filter<F: Fn(f64, f64) -> bool>(offsets: &mut Vec<PostingEntry>, value: f64, pred: F) {
    // NaN scores fail every comparison
    offsets.retain(|v| pred(f64::from(v.score), value));
}

fn eval(
    query: &Query,
    schema: &mut Schema,
    config: &mut RuntimeConfig,
    make_headers: bool,
    extra: &mut ExtraMetadata,
) -> crate::Result<Vec<PostingEntry>> {
    match query {
        Query::Key(identifier) => {
            let mut offsets = vec![];

            for (base, table) in &mut schema.summary_tables {
                if table.seek_to_key(identifier.as_bytes())? {
                    offsets.push(PostingEntry::new(*base + table.offset(), 0.0));
                    break;
                }
            }

            Ok(offsets)
        }

        Query::Leaf(identifier) => lookup::lookup_index_key(
            schema.index_tables()?,
            identifier,
            make_headers,
            extra,
            &mut config.cas_client,
        ),

        Query::Or(lhs, rhs) => {
            let lhs = eval(lhs, schema, config, make_headers, extra)?;
            let rhs = eval(rhs, schema, config, make_headers, extra)?;

            Ok(if lhs.is_empty() {
                rhs
            } else {
                union_offsets(&lhs, &rhs)
            })
        }

        Query::And(lhs, rhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            if !lhs.is_empty() {
                let rhs = eval(rhs, schema, config, make_headers, extra)?;
                intersect_offsets(&mut lhs, &rhs);
            }

            Ok(lhs)
        }

        Query::Subtract(lhs, rhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            if !lhs.is_empty() {
                let rhs = eval(rhs, schema, config, make_headers, extra)?;
                subtract_offsets(&mut lhs, &rhs);
            }

            Ok(lhs)
        }

        Query::Eq(lhs, value) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            scalar_filter(&mut lhs, *value, |score, value| score == value);
            Ok(lhs)
        }

        Query::Gt(lhs, operand) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            match operand {
                ScoreOperand::Scalar(value) => {
                    scalar_filter(&mut lhs, *value, |score, value| score > value);
                }
                ScoreOperand::Query(rhs) => {
                    let rhs = eval(rhs, schema, config, make_headers, extra)?;
                    join_filter(&mut lhs, &rhs, |l, r| l > r);
                }
            }

            Ok(lhs)
        }

        Query::Ge(lhs, value) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            scalar_filter(&mut lhs, *value, |score, value| score >= value);
            Ok(lhs)
        }

        Query::Lt(lhs, operand) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            match operand {
                ScoreOperand::Scalar(value) => {
                    scalar_filter(&mut lhs, *value, |score, value| score < value);
                }
                ScoreOperand::Query(rhs) => {
                    let rhs = eval(rhs, schema, config, make_headers, extra)?;
                    join_filter(&mut lhs, &rhs, |l, r| l < r);
                }
            }

            Ok(lhs)
        }

        Query::Le(lhs, value) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            scalar_filter(&mut lhs, *value, |score, value| score <= value);
            Ok(lhs)
        }

        Query::InRange(lhs, low, high) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            let (low, high) = if low <= high {
                (*low, *high)
            } else {
                (*high, *low)
            };

            lhs.retain(|v| {
                let score = f64::from(v.score);
                score >= low && score <= high
            });

            Ok(lhs)
        }

        Query::OrderBy(lhs, rhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            let rhs = eval(rhs, schema, config, make_headers, extra)?;

            order_by(&mut lhs, &rhs);

            Ok(lhs)
        }

        Query::RandomSample(lhs, count) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            random_sample(&mut lhs, *count);
            Ok(lhs)
        }

        Query::Max(lhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            remove_duplicates(&mut lhs, true);
            Ok(lhs)
        }

        Query::Min(lhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;
            remove_duplicates(&mut lhs, false);
            Ok(lhs)
        }

        Query::Negate(lhs) => {
            let mut lhs = eval(lhs, schema, config, make_headers, extra)?;

            for entry in &mut lhs {
                entry.score = -entry.score;
            }

            Ok(lhs)
        }
    }
}

/// Evaluates a query tree and collapses duplicate offsets.
///
/// # Errors
///
/// Returns an error if a table cannot be read or a posting list is
/// malformed.
pub fn process_query(
    query: &Query,
    schema: &mut Schema,
    config: &mut RuntimeConfig,
) -> crate::Result<Vec<PostingEntry>> {
    let mut extra = ExtraMetadata::default();
    process_query_with_metadata(query, schema, config, false, &mut extra)
}

pub(crate) fn process_query_with_metadata(
    query: &Query,
    schema: &mut Schema,
    config: &mut RuntimeConfig,
    make_headers: bool,
    extra: &mut ExtraMetadata,
) -> crate::Result<Vec<PostingEntry>> {
    let mut offsets = eval(query, schema, config, make_headers, extra)?;
    remove_duplicates(&mut offsets, !config.use_min);
    Ok(offsets)
}
