// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::flexi::rle_decompress;
use super::{EncodingTag, PostingEntry, ScoreBands};
use crate::coding::DecodeError;
use byteorder::{ReadBytesExt, LE};
use varint_rs::VarintReader;

fn split_tag(data: &[u8]) -> Result<(EncodingTag, &[u8]), DecodeError> {
    let (&tag, payload) = data
        .split_first()
        .ok_or(DecodeError::Truncated("PostingList"))?;

    Ok((EncodingTag::try_from(tag)?, payload))
}

fn read_offsets(reader: &mut &[u8], count: usize) -> Result<Vec<u64>, DecodeError> {
    let mut offsets = Vec::with_capacity(count);
    let mut offset = 0u64;

    for i in 0..count {
        let delta = reader.read_u64_varint()?;
        offset = if i == 0 { delta } else { offset + delta };
        offsets.push(offset);
    }

    Ok(offsets)
}

fn single_magnitude(reader: &mut &[u8], width: usize) -> Result<u32, DecodeError> {
    let mut magnitude = 0u32;

    for i in 0..width {
        let byte = reader.read_u8()?;
        magnitude |= u32::from(byte) << (8 * i);
    }

    Ok(magnitude)
}

/// Deserializes a posting list.
///
/// # Errors
///
/// Returns an error on unknown tags or truncated payloads.
#[allow(clippy::cast_precision_loss)]
pub fn decode(data: &[u8]) -> Result<Vec<PostingEntry>, DecodeError> {
    let (tag, payload) = split_tag(data)?;
    let mut reader = payload;

    match tag {
        EncodingTag::Empty => Ok(vec![]),

        EncodingTag::SingleFloat => {
            let offset = reader.read_u64_varint()?;
            let score = reader.read_f32::<LE>()?;
            Ok(vec![PostingEntry::new(offset, score)])
        }

        EncodingTag::SinglePositive1
        | EncodingTag::SingleNegative1
        | EncodingTag::SinglePositive2
        | EncodingTag::SingleNegative2
        | EncodingTag::SinglePositive3
        | EncodingTag::SingleNegative3 => {
            let (width, negative) = match tag {
                EncodingTag::SinglePositive1 => (1, false),
                EncodingTag::SingleNegative1 => (1, true),
                EncodingTag::SinglePositive2 => (2, false),
                EncodingTag::SingleNegative2 => (2, true),
                EncodingTag::SinglePositive3 => (3, false),
                _ => (3, true),
            };

            let offset = reader.read_u64_varint()?;
            let magnitude = single_magnitude(&mut reader, width)?;

            let score = if negative {
                -(magnitude as f32)
            } else {
                magnitude as f32
            };

            Ok(vec![PostingEntry::new(offset, score)])
        }

        EncodingTag::WithPrediction => {
            let count = reader.read_u64_varint()? as usize;
            let offsets = read_offsets(&mut reader, count)?;

            let mut values = Vec::with_capacity(count);
            for offset in offsets {
                let score = reader.read_f32::<LE>()?;
                let pct5 = reader.read_f32::<LE>()?;
                let pct25 = reader.read_f32::<LE>()?;
                let pct75 = reader.read_f32::<LE>()?;
                let pct95 = reader.read_f32::<LE>()?;

                let bands = if pct5.is_nan() {
                    None
                } else {
                    Some(ScoreBands {
                        pct5,
                        pct25,
                        pct75,
                        pct95,
                    })
                };

                values.push(PostingEntry {
                    offset,
                    score,
                    bands,
                });
            }

            Ok(values)
        }

        EncodingTag::Plain => {
            let count = reader.read_u64_varint()? as usize;

            let mut values = Vec::with_capacity(count);
            let mut offset = 0u64;

            for i in 0..count {
                let delta = reader.read_u64_varint()?;
                offset = if i == 0 { delta } else { offset + delta };

                let score = reader.read_f32::<LE>()?;
                values.push(PostingEntry::new(offset, score));
            }

            Ok(values)
        }

        EncodingTag::Flexi => {
            let count = reader.read_u64_varint()? as usize;
            let delta_gcd = reader.read_u64_varint()?.max(1);

            let mut offsets = Vec::with_capacity(count);
            let mut offset = 0u64;

            for i in 0..count {
                let delta = reader.read_u64_varint()?;
                offset = if i == 0 {
                    delta
                } else {
                    offset + delta * delta_gcd
                };
                offsets.push(offset);
            }

            let score_width = usize::from(reader.read_u8()?);
            let score_min = reader.read_i64_varint()?;

            let mut values = Vec::with_capacity(count);

            if score_width == 0 {
                for offset in offsets {
                    values.push(PostingEntry::new(offset, score_min as f32));
                }
            } else {
                let (stream, _) = rle_decompress(reader, count * score_width)?;

                for (i, offset) in offsets.into_iter().enumerate() {
                    let mut unsigned = 0u64;

                    #[allow(clippy::indexing_slicing)]
                    for b in 0..score_width {
                        unsigned |= u64::from(stream[i * score_width + b]) << (8 * b);
                    }

                    let score = (score_min + unsigned as i64) as f32;
                    values.push(PostingEntry::new(offset, score));
                }
            }

            Ok(values)
        }

        EncodingTag::DeltaVarintFloat => {
            let count = reader.read_u64_varint()? as usize;
            let offsets = read_offsets(&mut reader, count)?;

            let mut values = Vec::with_capacity(count);
            for offset in offsets {
                let score = reader.read_f32::<LE>()?;
                values.push(PostingEntry::new(offset, score));
            }

            Ok(values)
        }

        EncodingTag::DeltaVarintVarint => {
            let count = reader.read_u64_varint()? as usize;
            let offsets = read_offsets(&mut reader, count)?;

            let mut values = Vec::with_capacity(count);
            for offset in offsets {
                let score = reader.read_i64_varint()? as f32;
                values.push(PostingEntry::new(offset, score));
            }

            Ok(values)
        }
    }
}

/// Returns the greatest offset of an encoded posting list without
/// decoding any scores, or `None` for an empty list.
///
/// Used to prune range scans cheaply.
///
/// # Errors
///
/// Returns an error on unknown tags or truncated payloads.
pub fn max_offset(data: &[u8]) -> Result<Option<u64>, DecodeError> {
    let (tag, payload) = split_tag(data)?;
    let mut reader = payload;

    match tag {
        EncodingTag::Empty => Ok(None),

        EncodingTag::SingleFloat
        | EncodingTag::SinglePositive1
        | EncodingTag::SingleNegative1
        | EncodingTag::SinglePositive2
        | EncodingTag::SingleNegative2
        | EncodingTag::SinglePositive3
        | EncodingTag::SingleNegative3 => Ok(Some(reader.read_u64_varint()?)),

        EncodingTag::WithPrediction | EncodingTag::DeltaVarintFloat
        | EncodingTag::DeltaVarintVarint => {
            let count = reader.read_u64_varint()? as usize;

            let mut offset = 0u64;
            for i in 0..count {
                let delta = reader.read_u64_varint()?;
                offset = if i == 0 { delta } else { offset + delta };
            }

            Ok((count > 0).then_some(offset))
        }

        EncodingTag::Plain => {
            let count = reader.read_u64_varint()? as usize;

            let mut offset = 0u64;
            for i in 0..count {
                let delta = reader.read_u64_varint()?;
                offset = if i == 0 { delta } else { offset + delta };

                let _score = reader.read_f32::<LE>()?;
            }

            Ok((count > 0).then_some(offset))
        }

        EncodingTag::Flexi => {
            let count = reader.read_u64_varint()? as usize;
            let delta_gcd = reader.read_u64_varint()?.max(1);

            let mut offset = 0u64;
            for i in 0..count {
                let delta = reader.read_u64_varint()?;
                offset = if i == 0 { delta } else { offset + delta * delta_gcd };
            }

            Ok((count > 0).then_some(offset))
        }
    }
}

/// Returns the number of entries of an encoded posting list without
/// decoding it.
///
/// # Errors
///
/// Returns an error on unknown tags or truncated payloads.
pub fn count(data: &[u8]) -> Result<usize, DecodeError> {
    let (tag, payload) = split_tag(data)?;
    let mut reader = payload;

    match tag {
        EncodingTag::Empty => Ok(0),

        EncodingTag::SingleFloat
        | EncodingTag::SinglePositive1
        | EncodingTag::SingleNegative1
        | EncodingTag::SinglePositive2
        | EncodingTag::SingleNegative2
        | EncodingTag::SinglePositive3
        | EncodingTag::SingleNegative3 => Ok(1),

        EncodingTag::WithPrediction
        | EncodingTag::Plain
        | EncodingTag::Flexi
        | EncodingTag::DeltaVarintFloat
        | EncodingTag::DeltaVarintVarint => Ok(reader.read_u64_varint()? as usize),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::indexing_slicing, clippy::cast_precision_loss)]
mod tests {
    use super::super::{encode, encoded_size_hint, EncodingTag, PostingEntry, ScoreBands};
    use super::*;
    use test_log::test;

    fn roundtrip(values: &[PostingEntry]) -> Vec<u8> {
        let encoded = encode(values);
        assert!(encoded.len() <= encoded_size_hint(values));

        let decoded = decode(&encoded).expect("decodes");
        assert_eq!(values, &decoded[..]);

        assert_eq!(
            values.last().map(|v| v.offset),
            max_offset(&encoded).expect("reads max offset"),
        );
        assert_eq!(values.len(), count(&encoded).expect("reads count"));

        encoded
    }

    #[test]
    fn postings_empty() {
        let encoded = roundtrip(&[]);
        assert_eq!(vec![EncodingTag::Empty as u8], encoded);
    }

    #[test]
    fn postings_single_small_integers() {
        let encoded = roundtrip(&[PostingEntry::new(7, 0.0)]);
        assert_eq!(EncodingTag::SinglePositive1 as u8, encoded[0]);
        assert_eq!(3, encoded.len());

        let encoded = roundtrip(&[PostingEntry::new(7, -1.0)]);
        assert_eq!(EncodingTag::SingleNegative1 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(7, 300.0)]);
        assert_eq!(EncodingTag::SinglePositive2 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(7, -30_000.0)]);
        assert_eq!(EncodingTag::SingleNegative2 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(7, 1_000_000.0)]);
        assert_eq!(EncodingTag::SinglePositive3 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(7, -8_388_608.0)]);
        assert_eq!(EncodingTag::SingleNegative3 as u8, encoded[0]);
    }

    #[test]
    fn postings_single_boundaries() {
        // The byte-width bands are signed, so 128 needs two bytes
        let encoded = roundtrip(&[PostingEntry::new(1, 127.0)]);
        assert_eq!(EncodingTag::SinglePositive1 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(1, 128.0)]);
        assert_eq!(EncodingTag::SinglePositive2 as u8, encoded[0]);

        let encoded = roundtrip(&[PostingEntry::new(1, -128.0)]);
        assert_eq!(EncodingTag::SingleNegative1 as u8, encoded[0]);
    }

    #[test]
    fn postings_single_float() {
        let encoded = roundtrip(&[PostingEntry::new(12_345, 0.5)]);
        assert_eq!(EncodingTag::SingleFloat as u8, encoded[0]);

        roundtrip(&[PostingEntry::new(1, 1.000_000_1)]);
        roundtrip(&[PostingEntry::new(1, 16_777_216.0)]);
    }

    #[test]
    fn postings_negative_zero_keeps_sign() {
        let encoded = encode(&[PostingEntry::new(3, -0.0)]);
        assert_eq!(EncodingTag::SingleFloat as u8, encoded[0]);

        let decoded = decode(&encoded).expect("decodes");
        assert!(decoded[0].score.is_sign_negative());
    }

    #[test]
    fn postings_with_bands() {
        let bands = ScoreBands {
            pct5: 0.1,
            pct25: 0.2,
            pct75: 0.8,
            pct95: 0.9,
        };

        let encoded = roundtrip(&[
            PostingEntry::with_bands(10, 0.5, bands),
            PostingEntry::with_bands(20, 0.6, bands),
        ]);
        assert_eq!(EncodingTag::WithPrediction as u8, encoded[0]);
    }

    #[test]
    fn postings_mixed_bands() {
        let bands = ScoreBands {
            pct5: 1.0,
            pct25: 2.0,
            pct75: 3.0,
            pct95: 4.0,
        };

        // Band-less entries survive next to banded ones
        roundtrip(&[
            PostingEntry::new(10, 0.5),
            PostingEntry::with_bands(20, 0.6, bands),
        ]);
    }

    #[test]
    fn postings_all_zero_scores() {
        let values: Vec<_> = (0..1024)
            .map(|i| PostingEntry::new(i * 16 + 7, 0.0))
            .collect();

        let encoded = roundtrip(&values);
        assert_eq!(EncodingTag::Flexi as u8, encoded[0]);

        // 1024 zero-width scores compress to nearly nothing
        assert!(encoded.len() < values.len() * 2);
    }

    #[test]
    fn postings_small_integer_scores() {
        let values: Vec<_> = (0..256)
            .map(|i| PostingEntry::new(i + 1, (i & 0xf) as f32))
            .collect();

        roundtrip(&values);
    }

    #[test]
    fn postings_wide_integer_scores() {
        let values: Vec<_> = (0..64)
            .map(|i| PostingEntry::new(i + 1, (i * 1_000_000) as f32))
            .collect();

        roundtrip(&values);
    }

    #[test]
    fn postings_float_scores() {
        let values: Vec<_> = (0..100)
            .map(|i| PostingEntry::new(i * 3 + 1, i as f32 * 0.25 + 0.125))
            .collect();

        let encoded = roundtrip(&values);
        assert_eq!(EncodingTag::DeltaVarintFloat as u8, encoded[0]);
    }

    #[test]
    fn postings_plain_decodes() {
        // Legacy encoding: never produced, still understood
        let mut data = vec![EncodingTag::Plain as u8];

        use varint_rs::VarintWriter;
        data.write_u64_varint(2).expect("writes");
        data.write_u64_varint(5).expect("writes");
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.write_u64_varint(3).expect("writes");
        data.extend_from_slice(&2.5f32.to_le_bytes());

        let decoded = decode(&data).expect("decodes");
        assert_eq!(
            vec![PostingEntry::new(5, 1.5), PostingEntry::new(8, 2.5)],
            decoded,
        );

        assert_eq!(Some(8), max_offset(&data).expect("reads max offset"));
        assert_eq!(2, count(&data).expect("reads count"));
    }

    #[test]
    fn postings_unknown_tag() {
        assert!(matches!(
            decode(&[3, 0, 0]),
            Err(DecodeError::InvalidTag(("PostingList", 3))),
        ));
    }

    #[test]
    fn postings_truncated() {
        let values: Vec<_> = (0..10).map(|i| PostingEntry::new(i + 1, 0.5)).collect();
        let mut encoded = encode(&values);
        encoded.truncate(encoded.len() - 2);

        assert!(decode(&encoded).is_err());
    }
}
