// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression algorithm to use
///
/// The numeric tag is part of the on-disk table header.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum CompressionType {
    /// No compression
    #[default]
    None,

    /// Zstandard compression
    ///
    /// Blocks and the block index are stored as zstd frames.
    Zstd,
}

impl CompressionType {
    pub(crate) fn from_u8(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Zstd),
            tag => Err(DecodeError::InvalidTag(("CompressionType", tag))),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zstd => 1,
        }
    }

    /// Compresses a marshaled block or index payload.
    pub(crate) fn compress(self, data: &[u8], level: i32) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Zstd => zstd::encode_all(data, level).map_err(crate::Error::Io),
        }
    }

    /// Decompresses a block or index payload.
    pub(crate) fn decompress(self, data: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Zstd => zstd::decode_all(data).map_err(|_| crate::Error::Decompress(self)),
        }
    }
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.to_u8())?;
        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Self::from_u8(tag)
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",
                Self::Zstd => "zstd",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn compression_serialize_none() {
        let serialized = CompressionType::None.encode_into_vec();
        assert_eq!(1, serialized.len());
    }

    #[test]
    fn compression_invalid_tag() {
        assert!(matches!(
            CompressionType::from_u8(2),
            Err(DecodeError::InvalidTag(("CompressionType", 2))),
        ));
    }

    #[test]
    fn compression_roundtrip_zstd() -> crate::Result<()> {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbb".repeat(100);

        let compressed = CompressionType::Zstd.compress(&data, 3)?;
        assert!(compressed.len() < data.len());

        let decompressed = CompressionType::Zstd.decompress(&compressed)?;
        assert_eq!(data, decompressed);

        Ok(())
    }

    #[test]
    fn compression_decompress_garbage() {
        assert!(matches!(
            CompressionType::Zstd.decompress(b"definitely not a zstd frame"),
            Err(crate::Error::Decompress(CompressionType::Zstd)),
        ));
    }
}
