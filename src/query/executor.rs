// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::eval::process_query_with_metadata;
use super::lookup::{lookup_plain, ExtraMetadata};
use super::{QueryStatement, RuntimeConfig};
use crate::json::{double_to_string, ToJson};
use crate::table::TableReader;
use crate::{PostingEntry, Schema, UserKey, UserValue};
use std::io::{SeekFrom, Write};

/// Replaces `offsets` with the threshold-keyed entries of matching
/// offsets whose grouping score lies within the outer bounds.
#[allow(clippy::comparison_chain)]
fn apply_thresholds(
    offsets: &mut Vec<PostingEntry>,
    threshold_values: &[PostingEntry],
    bounds: &[f64],
) {
    let (Some(&low), Some(&high)) = (bounds.first(), bounds.last()) else {
        offsets.clear();
        return;
    };

    let mut output = vec![];

    let mut t = 0;
    let mut o = 0;

    #[allow(clippy::indexing_slicing)]
    while t < threshold_values.len() && o < offsets.len() {
        let tv = threshold_values[t];

        if tv.offset == offsets[o].offset {
            let score = f64::from(tv.score);

            if score >= low && score <= high {
                output.push(PostingEntry::new(tv.offset, tv.score));
            }

            t += 1;
        } else if tv.offset < offsets[o].offset {
            t += 1;
        } else {
            o += 1;
        }
    }

    *offsets = output;
}

/// Index `i` such that `score` falls into `[bounds[i-1], bounds[i]]`;
/// interior boundary values belong to the upper bucket.
#[allow(clippy::indexing_slicing)]
fn threshold_bucket(bounds: &[f64], score: f64) -> usize {
    let mut i = 1 + bounds[1..].partition_point(|&b| b < score);

    if i + 1 < bounds.len() && bounds[i] == score {
        i += 1;
    }

    i.min(bounds.len() - 1)
}

/// Renders a score of days-since-epoch as a date, UTC.
fn time_to_date_string(days: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let secs = (days * 86400.0) as i64;

    chrono::DateTime::from_timestamp(secs, 0).map_or_else(
        || double_to_string(days),
        |datetime| datetime.format("%B %-d, %Y").to_string(),
    )
}

/// Sorts the first `k` entries descending by score; the rest is left in
/// unspecified order.
fn partial_sort_by_score(data: &mut [PostingEntry], k: usize) {
    let k = k.min(data.len());
    if k == 0 {
        return;
    }

    if k < data.len() {
        data.select_nth_unstable_by(k - 1, |a, b| b.score.total_cmp(&a.score));
    }

    #[allow(clippy::indexing_slicing)]
    data[..k].sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
}

/// Resolves a global offset to the summary row it addresses.
fn resolve_summary(schema: &mut Schema, offset: u64) -> crate::Result<(UserKey, UserValue)> {
    let tables = &mut schema.summary_tables;

    let owner = tables.partition_point(|(base, _)| *base <= offset);

    let Some((base, table)) = owner.checked_sub(1).and_then(|idx| tables.get_mut(idx)) else {
        return Err(crate::Error::InvalidInput(format!(
            "offset {offset} precedes every summary table",
        )));
    };

    table.seek(SeekFrom::Start(offset - *base))?;

    table.read_row()?.ok_or_else(|| {
        crate::Error::InvalidInput(format!("offset {offset} beyond end of summary table"))
    })
}

/// Appends a stored JSON body, stripping the outer braces if present.
fn append_body(result: &mut String, data: &[u8]) {
    let body = match data {
        [b'{', inner @ .., b'}'] => inner,
        data => data,
    };

    result.push_str(&String::from_utf8_lossy(body));
}

/// Executes a query statement, writing one JSON document (or one key per
/// line in keys-only mode) to `out`.
///
/// # Errors
///
/// Propagates evaluation and I/O errors to the caller; nothing is
/// swallowed. See [`execute_interactive`] for the error-as-JSON surface.
pub fn execute<W: Write>(
    schema: &mut Schema,
    config: &mut RuntimeConfig,
    stmt: &QueryStatement,
    out: &mut W,
) -> crate::Result<()> {
    schema.load()?;

    if schema.summary_tables.is_empty() {
        return Err(crate::Error::InvalidInput(
            "schema has no summary tables".into(),
        ));
    }

    let make_headers = stmt.thresholds.is_some();

    let mut extra = ExtraMetadata::default();
    let mut offsets =
        process_query_with_metadata(&stmt.query, schema, config, make_headers, &mut extra)?;

    let mut bounds = vec![];
    let mut reverse_thresholds = false;

    // Date ranges instead of number ranges for event-list keys
    let mut use_date_headers = false;

    if let Some(thresholds) = &stmt.thresholds {
        if thresholds.values.len() < 2 {
            return Err(crate::Error::InvalidInput(
                "threshold clause needs at least two values".into(),
            ));
        }

        bounds = thresholds.values.clone();
        bounds.sort_unstable_by(f64::total_cmp);

        let mut key = thresholds.key.as_str();
        if let Some(rest) = key.strip_prefix('~') {
            key = rest;
            reverse_thresholds = true;
        }

        use_date_headers = config.is_timestamped(key);

        let threshold_values = lookup_plain(schema.index_tables()?, key)?;
        apply_thresholds(&mut offsets, &threshold_values, &bounds);
    }

    if stmt.offset >= offsets.len() {
        writeln!(out, "[]")?;
        out.flush()?;
        return Ok(());
    }

    let limit = stmt
        .limit
        .unwrap_or(usize::MAX)
        .min(offsets.len() - stmt.offset);
    let end = stmt.offset + limit;

    partial_sort_by_score(&mut offsets, end);

    #[allow(clippy::indexing_slicing)]
    let chosen = &offsets[stmt.offset..end];

    if stmt.keys_only {
        for entry in chosen {
            let (row_key, _) = resolve_summary(schema, entry.offset)?;
            out.write_all(&row_key)?;
            out.write_all(b"\n")?;
        }

        out.flush()?;
        return Ok(());
    }

    // Resolve rows in physical offset order, to minimize the total seek
    // distance on rotational storage; results are emitted in score order
    let mut by_offset: Vec<(PostingEntry, usize)> = chosen
        .iter()
        .copied()
        .enumerate()
        .map(|(display_idx, entry)| (entry, display_idx))
        .collect();
    by_offset.sort_by_key(|(entry, _)| entry.offset);

    let mut results = vec![String::new(); by_offset.len()];

    for (entry, display_idx) in by_offset {
        let (row_key, data) = resolve_summary(schema, entry.offset)?;

        let mut result = String::new();
        result.push_str("\"_key\":");
        row_key.as_ref().to_json(&mut result);

        result.push(',');
        append_body(&mut result, &data);

        for table in &mut schema.summary_override_tables {
            if !table.seek_to_key(&row_key)? {
                break;
            }

            let Some((_, extra_json)) = table.read_row()? else {
                break;
            };

            result.push(',');
            append_body(&mut result, &extra_json);
        }

        if let Some((header, header_key)) = extra.get(&entry.offset) {
            result.push_str(",\"_header\":");
            header.as_str().to_json(&mut result);
            result.push_str(",\"_header_key\":");
            header_key.as_str().to_json(&mut result);
        }

        if make_headers {
            #[allow(clippy::indexing_slicing)]
            let (header, bucket) = {
                let bucket = threshold_bucket(&bounds, f64::from(entry.score));
                let min_value = bounds[bucket - 1];
                let max_value = bounds[bucket];

                let header = if !use_date_headers {
                    format!(
                        "{}–{}",
                        double_to_string(min_value),
                        double_to_string(max_value),
                    )
                } else if min_value + 1.0 != max_value {
                    format!(
                        "{}–{}",
                        time_to_date_string(min_value),
                        time_to_date_string(max_value),
                    )
                } else {
                    time_to_date_string(min_value)
                };

                (header, bucket)
            };

            result.push_str(",\"_header\":");
            header.as_str().to_json(&mut result);

            // A sort-friendly "AAAAA".."ZZZZZ" key, so clients can order
            // groups without parsing the headers
            let key = if reverse_thresholds {
                bounds.len() - bucket
            } else {
                bucket
            };

            result.push_str(",\"_header_key\":\"");
            let mut j = 26usize.pow(4);
            while j > 0 {
                #[allow(clippy::cast_possible_truncation)]
                result.push(char::from(b'A' + ((key / j) % 26) as u8));
                j /= 26;
            }
            result.push('"');
        }

        #[allow(clippy::indexing_slicing)]
        {
            results[display_idx] = result;
        }
    }

    write!(out, "{{\"result-count\":{},\"result\":[{{", offsets.len())?;

    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            out.write_all(b"},\n{")?;
        }

        out.write_all(result.as_bytes())?;
    }

    writeln!(out, "}}]}}")?;
    out.flush()?;

    Ok(())
}

/// Executes a statement like [`execute`], but renders any failure as a
/// single `{"error": "…"}` JSON object instead of propagating it.
///
/// # Errors
///
/// Only fails if the error object itself cannot be written.
pub fn execute_interactive<W: Write>(
    schema: &mut Schema,
    config: &mut RuntimeConfig,
    stmt: &QueryStatement,
    out: &mut W,
) -> std::io::Result<()> {
    if let Err(e) = execute(schema, config, stmt, out) {
        log::warn!("query failed: {e:?}");

        let mut body = String::from("{\"error\":");
        e.to_string().as_str().to_json(&mut body);
        body.push('}');

        writeln!(out, "{body}")?;
        out.flush()?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bucket_assignment() {
        let bounds = [0.0, 10.0, 20.0];

        assert_eq!(1, threshold_bucket(&bounds, 0.0));
        assert_eq!(1, threshold_bucket(&bounds, 5.0));
        assert_eq!(2, threshold_bucket(&bounds, 10.0));
        assert_eq!(2, threshold_bucket(&bounds, 15.0));
        assert_eq!(2, threshold_bucket(&bounds, 20.0));
    }

    #[test]
    fn partial_sort_orders_head() {
        let mut data = vec![
            PostingEntry::new(1, 1.0),
            PostingEntry::new(2, 5.0),
            PostingEntry::new(3, 3.0),
            PostingEntry::new(4, 4.0),
            PostingEntry::new(5, 2.0),
        ];

        partial_sort_by_score(&mut data, 3);

        assert_eq!(5.0, data[0].score);
        assert_eq!(4.0, data[1].score);
        assert_eq!(3.0, data[2].score);
    }

    #[test]
    fn threshold_filter_replaces_scores() {
        let mut offsets = vec![PostingEntry::new(1, 9.0), PostingEntry::new(3, 9.0)];

        apply_thresholds(
            &mut offsets,
            &[
                PostingEntry::new(1, 5.0),
                PostingEntry::new(2, 6.0),
                PostingEntry::new(3, 99.0),
            ],
            &[0.0, 10.0],
        );

        // Offset 3 is out of range, offset 2 was not in the result set
        assert_eq!(vec![PostingEntry::new(1, 5.0)], offsets);
    }

    #[test]
    fn date_rendering() {
        // 2020-01-01 is day 18262
        assert_eq!("January 1, 2020", time_to_date_string(18_262.0));
    }

    #[test]
    fn body_brace_stripping() {
        let mut out = String::new();
        append_body(&mut out, b"{\"a\":1}");
        assert_eq!("\"a\":1", out);

        let mut out = String::new();
        append_body(&mut out, b"\"a\":1");
        assert_eq!("\"a\":1", out);
    }
}
