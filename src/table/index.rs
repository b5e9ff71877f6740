// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::Block;
use super::header::TableHeader;
use crate::coding::DecodeError;
use crate::UserKey;
use varint_rs::{VarintReader, VarintWriter};

/// The block index stored after the last block of a write-once table.
///
/// Serialized as `varint block_count`, then one varint array each for the
/// stored block sizes, the per-block row counts and the last-key sizes,
/// followed by the concatenated last keys. Compressed like a block when
/// the table uses compression.
#[derive(Debug, Default)]
pub struct BlockIndex {
    /// Stored (possibly compressed) block sizes
    block_sizes: Vec<u64>,

    /// Rows per block
    row_counts: Vec<u32>,

    /// Greatest key of each block
    last_keys: Vec<UserKey>,

    /// File offset of each block; prefix sums over `block_sizes`
    block_offsets: Vec<u64>,
}

impl BlockIndex {
    #[must_use]
    pub fn len(&self) -> usize {
        self.block_sizes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block_sizes.is_empty()
    }

    /// File offset one past the final block; where the index payload goes.
    #[must_use]
    pub fn index_offset(&self) -> u64 {
        self.block_offsets.last().copied().map_or_else(
            || TableHeader::serialized_len() as u64,
            |last| {
                #[allow(clippy::indexing_slicing)]
                let size = self.block_sizes[self.block_sizes.len() - 1];
                last + size
            },
        )
    }

    /// # Panics
    ///
    /// Panics if the block number is out of bounds.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn block_offset(&self, idx: usize) -> u64 {
        self.block_offsets[idx]
    }

    /// # Panics
    ///
    /// Panics if the block number is out of bounds.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn block_size(&self, idx: usize) -> u64 {
        self.block_sizes[idx]
    }

    /// # Panics
    ///
    /// Panics if the block number is out of bounds.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn row_count(&self, idx: usize) -> u32 {
        self.row_counts[idx]
    }

    /// Index of the first block whose last key is `>= key`, or `len()`.
    #[must_use]
    pub fn find_block(&self, key: &[u8]) -> usize {
        self.last_keys
            .partition_point(|last_key| last_key.as_ref() < key)
    }

    /// Registers a flushed block.
    pub fn add(&mut self, block: &Block, stored_size: u64) {
        self.block_offsets.push(self.index_offset());
        self.block_sizes.push(stored_size);
        self.row_counts.push(block.len() as u32);
        self.last_keys.push(UserKey::from(block.last_key()));
    }

    pub fn marshal(&self) -> crate::Result<Vec<u8>> {
        let mut out = vec![];

        out.write_u64_varint(self.len() as u64).map_err(crate::Error::Io)?;

        for &size in &self.block_sizes {
            out.write_u64_varint(size).map_err(crate::Error::Io)?;
        }
        for &count in &self.row_counts {
            out.write_u32_varint(count).map_err(crate::Error::Io)?;
        }
        for key in &self.last_keys {
            out.write_u64_varint(key.len() as u64).map_err(crate::Error::Io)?;
        }
        for key in &self.last_keys {
            out.extend_from_slice(key);
        }

        Ok(out)
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = data;

        let count = reader.read_u64_varint()? as usize;

        let mut index = Self::default();
        if count == 0 {
            return Ok(index);
        }

        let mut block_sizes = Vec::with_capacity(count);
        for _ in 0..count {
            block_sizes.push(reader.read_u64_varint()?);
        }

        let mut row_counts = Vec::with_capacity(count);
        for _ in 0..count {
            row_counts.push(reader.read_u32_varint()?);
        }

        let mut key_sizes = Vec::with_capacity(count);
        for _ in 0..count {
            key_sizes.push(reader.read_u64_varint()? as usize);
        }

        let key_total: usize = key_sizes.iter().sum();
        if reader.len() < key_total {
            return Err(DecodeError::Truncated("BlockIndex"));
        }

        let mut last_keys = Vec::with_capacity(count);
        for size in key_sizes {
            #[allow(clippy::indexing_slicing)]
            let (key, rest) = reader.split_at(size);
            last_keys.push(UserKey::from(key));
            reader = rest;
        }

        let mut block_offsets = Vec::with_capacity(count);
        let mut offset = TableHeader::serialized_len() as u64;
        for &size in &block_sizes {
            block_offsets.push(offset);
            offset += size;
        }

        index.block_sizes = block_sizes;
        index.row_counts = row_counts;
        index.last_keys = last_keys;
        index.block_offsets = block_offsets;

        Ok(index)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use test_log::test;

    fn block_of(rows: &[(&str, &str)]) -> Block {
        let mut block = Block::default();
        for (k, v) in rows {
            block.add(k.as_bytes(), v.as_bytes());
        }
        block
    }

    #[test]
    fn block_index_roundtrip() -> crate::Result<()> {
        let mut index = BlockIndex::default();
        index.add(&block_of(&[("a", "1"), ("c", "2")]), 100);
        index.add(&block_of(&[("d", "3"), ("f", "4")]), 200);

        let bytes = index.marshal()?;
        let decoded = BlockIndex::unmarshal(&bytes)?;

        assert_eq!(2, decoded.len());
        assert_eq!(24, decoded.block_offset(0));
        assert_eq!(124, decoded.block_offset(1));
        assert_eq!(324, decoded.index_offset());
        assert_eq!(2, decoded.row_count(0));
        assert_eq!(200, decoded.block_size(1));

        Ok(())
    }

    #[test]
    fn block_index_find_block() {
        let mut index = BlockIndex::default();
        index.add(&block_of(&[("a", "1"), ("c", "2")]), 100);
        index.add(&block_of(&[("d", "3"), ("f", "4")]), 200);

        assert_eq!(0, index.find_block(b"a"));
        assert_eq!(0, index.find_block(b"b"));
        assert_eq!(0, index.find_block(b"c"));
        assert_eq!(1, index.find_block(b"ca"));
        assert_eq!(1, index.find_block(b"f"));
        assert_eq!(2, index.find_block(b"g"));
    }

    #[test]
    fn block_index_empty_roundtrip() -> crate::Result<()> {
        let index = BlockIndex::default();
        let bytes = index.marshal()?;
        assert_eq!(1, bytes.len());

        let decoded = BlockIndex::unmarshal(&bytes)?;
        assert!(decoded.is_empty());
        assert_eq!(24, decoded.index_offset());

        Ok(())
    }

    #[test]
    fn block_index_truncated() {
        let mut index = BlockIndex::default();
        index.add(&block_of(&[("abcdef", "1")]), 50);

        let mut bytes = index.marshal().expect("marshals");
        bytes.truncate(bytes.len() - 3);

        assert!(BlockIndex::unmarshal(&bytes).is_err());
    }
}
