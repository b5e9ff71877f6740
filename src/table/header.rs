// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::file::TABLE_MAGIC;
use crate::CompressionType;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

pub const MAJOR_VERSION: u8 = 4;
pub const MINOR_VERSION: u8 = 0;

const FLAG_SEEKABLE: u8 = 0x01;
const FLAG_EXTENDED: u8 = 0x02;

/// Fixed-size header at the start of every write-once table.
///
/// The header is written once with `index_offset == 0` when the build
/// starts, and rewritten with the true index offset on sync. A published
/// table therefore always carries a non-zero index offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
    pub compression: CompressionType,

    /// Absolute file offset of the block index payload
    pub index_offset: u64,
}

impl TableHeader {
    #[must_use]
    pub const fn serialized_len() -> usize {
        // Magic
        std::mem::size_of::<u64>()
            // Major + minor version
            + 2 * std::mem::size_of::<u8>()
            // Flags
            + std::mem::size_of::<u8>()
            // Compression
            + std::mem::size_of::<u8>()
            // Reserved
            + std::mem::size_of::<u32>()
            // Index offset
            + std::mem::size_of::<u64>()
    }

    pub fn new(seekable: bool, compression: CompressionType, index_offset: u64) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            flags: if seekable { FLAG_SEEKABLE } else { 0 },
            compression,
            index_offset,
        }
    }

    #[must_use]
    pub fn is_seekable(&self) -> bool {
        (self.flags & FLAG_SEEKABLE) != 0
    }

    #[must_use]
    pub fn is_extended(&self) -> bool {
        (self.flags & FLAG_EXTENDED) != 0
    }

    /// Checks version and flags beyond pure deserialization.
    pub fn validate(&self) -> crate::Result<()> {
        if self.major_version != MAJOR_VERSION {
            return Err(crate::Error::InvalidVersion((
                self.major_version,
                self.minor_version,
            )));
        }

        if self.is_extended() {
            return Err(crate::Error::Unsupported("extended write-once tables"));
        }

        Ok(())
    }
}

impl Encode for TableHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // The magic value doubles as an endianness marker
        writer.write_u64::<LE>(TABLE_MAGIC)?;

        writer.write_u8(self.major_version)?;
        writer.write_u8(self.minor_version)?;
        writer.write_u8(self.flags)?;
        writer.write_u8(self.compression.to_u8())?;

        // Reserved
        writer.write_u32::<LE>(0)?;

        writer.write_u64::<LE>(self.index_offset)?;

        Ok(())
    }
}

impl Decode for TableHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic = reader.read_u64::<LE>()?;

        if magic != TABLE_MAGIC {
            return Err(DecodeError::InvalidHeader("Table"));
        }

        let major_version = reader.read_u8()?;
        let minor_version = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let compression = CompressionType::from_u8(reader.read_u8()?)?;

        let _reserved = reader.read_u32::<LE>()?;

        let index_offset = reader.read_u64::<LE>()?;

        Ok(Self {
            major_version,
            minor_version,
            flags,
            compression,
            index_offset,
        })
    }
}
