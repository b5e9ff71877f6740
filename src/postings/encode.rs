// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::flexi::{rle_compress, rle_compressed_len};
use super::{EncodingTag, PostingEntry, ScoreBands};
use crate::coding::varint_len;
use byteorder::{WriteBytesExt, LE};
use varint_rs::VarintWriter;

/// Upper bound for the encoded size of `values`, regardless of which
/// encoding ends up being chosen.
#[must_use]
pub fn encoded_size_hint(values: &[PostingEntry]) -> usize {
    // Worst constant across encodings (FLEXI header) plus the worst
    // per-entry cost (full-width offset varint + bands or RLE expansion)
    48 + 40 * values.len()
}

/// Interprets a score as an integer if that conversion is lossless.
///
/// `-0.0` is deliberately excluded so its sign bit survives the float
/// encodings.
fn integral_score(score: f32) -> Option<i64> {
    if !score.is_finite() || score.trunc() != score {
        return None;
    }

    if score == 0.0 && score.is_sign_negative() {
        return None;
    }

    if !(-9.0e18..=9.0e18).contains(&score) {
        return None;
    }

    #[allow(clippy::cast_possible_truncation)]
    Some(score as i64)
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Serializes a posting list, choosing the cheapest encoding for its
/// shape. Offsets must be strictly increasing.
#[must_use]
#[allow(clippy::expect_used, clippy::indexing_slicing)]
pub fn encode(values: &[PostingEntry]) -> Vec<u8> {
    debug_assert!(
        values.windows(2).all(|w| w[0].offset < w[1].offset),
        "posting offsets must be strictly increasing",
    );

    try_encode(values).expect("writing to a vec cannot fail")
}

#[allow(clippy::indexing_slicing)]
fn try_encode(values: &[PostingEntry]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + 8 * values.len());

    if values.is_empty() {
        out.push(EncodingTag::Empty as u8);
        return Ok(out);
    }

    if values.iter().any(|v| v.bands.is_some()) {
        encode_with_prediction(values, &mut out)?;
        return Ok(out);
    }

    if let [single] = values {
        encode_single(single, &mut out)?;
        return Ok(out);
    }

    let scores: Option<Vec<i64>> = values.iter().map(|v| integral_score(v.score)).collect();

    if let Some(scores) = scores {
        encode_integers(values, &scores, &mut out)?;
        return Ok(out);
    }

    encode_delta_float(values, &mut out)?;
    Ok(out)
}

fn write_delta_offsets(values: &[PostingEntry], out: &mut Vec<u8>) -> std::io::Result<()> {
    let mut prev = None;

    for value in values {
        match prev {
            None => out.write_u64_varint(value.offset)?,
            Some(prev) => out.write_u64_varint(value.offset - prev)?,
        }
        prev = Some(value.offset);
    }

    Ok(())
}

fn encode_with_prediction(values: &[PostingEntry], out: &mut Vec<u8>) -> std::io::Result<()> {
    out.push(EncodingTag::WithPrediction as u8);
    out.write_u64_varint(values.len() as u64)?;

    write_delta_offsets(values, out)?;

    for value in values {
        let bands = value.bands.unwrap_or(ScoreBands {
            pct5: f32::NAN,
            pct25: f32::NAN,
            pct75: f32::NAN,
            pct95: f32::NAN,
        });

        out.write_f32::<LE>(value.score)?;
        out.write_f32::<LE>(bands.pct5)?;
        out.write_f32::<LE>(bands.pct25)?;
        out.write_f32::<LE>(bands.pct75)?;
        out.write_f32::<LE>(bands.pct95)?;
    }

    Ok(())
}

fn encode_single(value: &PostingEntry, out: &mut Vec<u8>) -> std::io::Result<()> {
    if let Some(score) = integral_score(value.score) {
        let width = match score {
            -128..=127 => Some(1u32),
            -32_768..=32_767 => Some(2),
            -8_388_608..=8_388_607 => Some(3),
            _ => None,
        };

        if let Some(width) = width {
            let tag = match (width, score >= 0) {
                (1, true) => EncodingTag::SinglePositive1,
                (1, false) => EncodingTag::SingleNegative1,
                (2, true) => EncodingTag::SinglePositive2,
                (2, false) => EncodingTag::SingleNegative2,
                (3, true) => EncodingTag::SinglePositive3,
                _ => EncodingTag::SingleNegative3,
            };

            out.push(tag as u8);
            out.write_u64_varint(value.offset)?;

            let magnitude = score.unsigned_abs();
            for i in 0..width {
                out.push((magnitude >> (8 * i)) as u8);
            }

            return Ok(());
        }
    }

    out.push(EncodingTag::SingleFloat as u8);
    out.write_u64_varint(value.offset)?;
    out.write_f32::<LE>(value.score)?;

    Ok(())
}

/// Parameters of a FLEXI encoding for a given input.
struct FlexiPlan {
    delta_gcd: u64,
    score_min: i64,
    score_width: u8,
    score_stream: Vec<u8>,
}

#[allow(clippy::indexing_slicing)]
fn plan_flexi(values: &[PostingEntry], scores: &[i64]) -> Option<(usize, FlexiPlan)> {
    #[allow(clippy::expect_used)]
    let score_min = *scores.iter().min().expect("values is non-empty");
    #[allow(clippy::expect_used)]
    let score_max = *scores.iter().max().expect("values is non-empty");

    let range = score_max.checked_sub(score_min)? as u64;

    let score_width: u8 = if range == 0 {
        0
    } else if range < 1 << 8 {
        1
    } else if range < 1 << 16 {
        2
    } else if range < 1 << 24 {
        3
    } else {
        return None;
    };

    let mut delta_gcd = 0u64;
    for w in values.windows(2) {
        delta_gcd = gcd(delta_gcd, w[1].offset - w[0].offset);
    }
    let delta_gcd = delta_gcd.max(1);

    let mut score_stream = Vec::with_capacity(scores.len() * usize::from(score_width));
    for &score in scores {
        let unsigned = (score - score_min) as u64;
        for i in 0..score_width {
            score_stream.push((unsigned >> (8 * i)) as u8);
        }
    }

    let mut size = 1 + varint_len(values.len() as u64)
        + varint_len(delta_gcd)
        + varint_len(values[0].offset)
        + 1
        + varint_len(zigzag(score_min));

    for w in values.windows(2) {
        size += varint_len((w[1].offset - w[0].offset) / delta_gcd);
    }

    size += rle_compressed_len(&score_stream);

    Some((
        size,
        FlexiPlan {
            delta_gcd,
            score_min,
            score_width,
            score_stream,
        },
    ))
}

#[allow(clippy::indexing_slicing)]
fn delta_varint_varint_size(values: &[PostingEntry], scores: &[i64]) -> usize {
    let mut size = 1 + varint_len(values.len() as u64) + varint_len(values[0].offset);

    for w in values.windows(2) {
        size += varint_len(w[1].offset - w[0].offset);
    }

    for &score in scores {
        size += varint_len(zigzag(score));
    }

    size
}

#[allow(clippy::indexing_slicing)]
fn encode_integers(
    values: &[PostingEntry],
    scores: &[i64],
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    let varint_size = delta_varint_varint_size(values, scores);

    if let Some((flexi_size, plan)) = plan_flexi(values, scores) {
        if flexi_size <= varint_size {
            out.push(EncodingTag::Flexi as u8);
            out.write_u64_varint(values.len() as u64)?;
            out.write_u64_varint(plan.delta_gcd)?;
            out.write_u64_varint(values[0].offset)?;

            for w in values.windows(2) {
                out.write_u64_varint((w[1].offset - w[0].offset) / plan.delta_gcd)?;
            }

            out.push(plan.score_width);
            out.write_i64_varint(plan.score_min)?;

            if plan.score_width > 0 {
                rle_compress(&plan.score_stream, out);
            }

            return Ok(());
        }
    }

    out.push(EncodingTag::DeltaVarintVarint as u8);
    out.write_u64_varint(values.len() as u64)?;
    write_delta_offsets(values, out)?;

    for &score in scores {
        out.write_i64_varint(score)?;
    }

    Ok(())
}

fn encode_delta_float(values: &[PostingEntry], out: &mut Vec<u8>) -> std::io::Result<()> {
    out.push(EncodingTag::DeltaVarintFloat as u8);
    out.write_u64_varint(values.len() as u64)?;

    write_delta_offsets(values, out)?;

    for value in values {
        out.write_f32::<LE>(value.score)?;
    }

    Ok(())
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
