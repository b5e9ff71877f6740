// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The FLEXI posting encoding: offset deltas quantized by their GCD, and
//! integer scores stored as `(score − min)` in the minimal byte width,
//! run-length compressed.
//!
//! The RLE scheme is byte-oriented: bytes below `0xC0` in runs of one or
//! two pass through literally; everything else becomes a
//! `0xC0 | (run − 1)` marker followed by the value, with runs capped at
//! 64 bytes.

use crate::coding::DecodeError;

const RLE_MARKER: u8 = 0xC0;
const RLE_MAX_RUN: usize = 0x40;

/// Appends the RLE form of `input` to `out`.
pub fn rle_compress(input: &[u8], out: &mut Vec<u8>) {
    let mut value = 0u8;
    let mut run = 0usize;

    let flush = |value: u8, run: usize, out: &mut Vec<u8>| {
        if run == 0 {
            return;
        }

        if run <= 2 && value < RLE_MARKER {
            for _ in 0..run {
                out.push(value);
            }
        } else {
            out.push(RLE_MARKER | (run - 1) as u8);
            out.push(value);
        }
    };

    for &byte in input {
        if byte != value && run > 0 {
            flush(value, run, out);
            run = 0;
        }

        value = byte;
        run += 1;

        if run == RLE_MAX_RUN {
            out.push(RLE_MARKER | (RLE_MAX_RUN - 1) as u8);
            out.push(value);
            run = 0;
        }
    }

    flush(value, run, out);
}

/// Exact size of the RLE form of `input`.
pub fn rle_compressed_len(input: &[u8]) -> usize {
    let mut out_len = 0usize;
    let mut value = 0u8;
    let mut run = 0usize;

    let flush_len = |value: u8, run: usize| -> usize {
        match run {
            0 => 0,
            run if run <= 2 && value < RLE_MARKER => run,
            _ => 2,
        }
    };

    for &byte in input {
        if byte != value && run > 0 {
            out_len += flush_len(value, run);
            run = 0;
        }

        value = byte;
        run += 1;

        if run == RLE_MAX_RUN {
            out_len += 2;
            run = 0;
        }
    }

    out_len + flush_len(value, run)
}

/// Expands `expected_len` bytes of RLE data from the front of `input`;
/// returns the decompressed bytes and how many input bytes were consumed.
pub fn rle_decompress(input: &[u8], expected_len: usize) -> Result<(Vec<u8>, usize), DecodeError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut pos = 0usize;

    while out.len() < expected_len {
        let &marker = input
            .get(pos)
            .ok_or(DecodeError::Truncated("RleStream"))?;

        if marker & RLE_MARKER == RLE_MARKER {
            let run = usize::from(marker & 0x3f) + 1;
            let &value = input
                .get(pos + 1)
                .ok_or(DecodeError::Truncated("RleStream"))?;

            for _ in 0..run {
                out.push(value);
            }

            pos += 2;
        } else {
            out.push(marker);
            pos += 1;
        }
    }

    if out.len() != expected_len {
        return Err(DecodeError::InvalidHeader("RleStream"));
    }

    Ok((out, pos))
}
