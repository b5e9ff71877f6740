// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{varint_len, DecodeError};
use varint_rs::{VarintReader, VarintWriter};

/// A run of adjacent rows; the unit of compression and of the block index.
///
/// Two serialized forms exist:
///
/// - *Compact*: all key sizes as varints, all value sizes as varints, then
///   the concatenated key bytes, then the concatenated value bytes.
/// - *Seekable*: per row `varint key_size, varint value_size, key, value`,
///   so in-block byte offsets address individual rows.
///
/// Both forms serialize to the same number of bytes, so the size estimate
/// is exact either way.
#[derive(Debug, Default)]
pub struct Block {
    key_sizes: Vec<u32>,
    key_offsets: Vec<usize>,
    key_data: Vec<u8>,

    value_sizes: Vec<u32>,
    value_offsets: Vec<usize>,
    value_data: Vec<u8>,

    serialized_size: usize,
}

impl Block {
    #[must_use]
    pub fn len(&self) -> usize {
        self.key_sizes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_sizes.is_empty()
    }

    /// Exact size of the marshaled block.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.serialized_size
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        self.key_sizes.push(key.len() as u32);
        self.key_offsets.push(self.key_data.len());
        self.key_data.extend_from_slice(key);

        self.value_sizes.push(value.len() as u32);
        self.value_offsets.push(self.value_data.len());
        self.value_data.extend_from_slice(value);

        self.serialized_size += varint_len(key.len() as u64)
            + varint_len(value.len() as u64)
            + key.len()
            + value.len();
    }

    pub fn clear(&mut self) {
        self.key_sizes.clear();
        self.key_offsets.clear();
        self.key_data.clear();
        self.value_sizes.clear();
        self.value_offsets.clear();
        self.value_data.clear();
        self.serialized_size = 0;
    }

    /// # Panics
    ///
    /// Panics if the row index is out of bounds.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn key(&self, idx: usize) -> &[u8] {
        let start = self.key_offsets[idx];
        let len = self.key_sizes[idx] as usize;
        &self.key_data[start..start + len]
    }

    /// # Panics
    ///
    /// Panics if the row index is out of bounds.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn value(&self, idx: usize) -> &[u8] {
        let start = self.value_offsets[idx];
        let len = self.value_sizes[idx] as usize;
        &self.value_data[start..start + len]
    }

    /// # Panics
    ///
    /// Panics if the block is empty.
    #[must_use]
    pub fn last_key(&self) -> &[u8] {
        debug_assert!(!self.is_empty());
        self.key(self.len() - 1)
    }

    /// Index of the first row whose key is `>= key`, or `len()` if none.
    #[must_use]
    pub fn find_row(&self, key: &[u8]) -> usize {
        let mut left = 0;
        let mut right = self.len();

        while left < right {
            let mid = (left + right) / 2;

            if self.key(mid) < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }

    /// Serializes the block, appending to `out`.
    #[allow(clippy::indexing_slicing)]
    pub fn marshal(&self, seekable: bool, out: &mut Vec<u8>) -> crate::Result<()> {
        out.reserve(self.serialized_size);

        if seekable {
            for i in 0..self.len() {
                out.write_u32_varint(self.key_sizes[i]).map_err(crate::Error::Io)?;
                out.write_u32_varint(self.value_sizes[i]).map_err(crate::Error::Io)?;
                out.extend_from_slice(self.key(i));
                out.extend_from_slice(self.value(i));
            }
        } else {
            for &size in &self.key_sizes {
                out.write_u32_varint(size).map_err(crate::Error::Io)?;
            }
            for &size in &self.value_sizes {
                out.write_u32_varint(size).map_err(crate::Error::Io)?;
            }
            out.extend_from_slice(&self.key_data);
            out.extend_from_slice(&self.value_data);
        }

        Ok(())
    }

    /// Deserializes a block of `row_count` rows.
    #[allow(clippy::indexing_slicing)]
    pub fn unmarshal(data: &[u8], row_count: usize, seekable: bool) -> Result<Self, DecodeError> {
        let mut block = Self::default();

        if row_count == 0 {
            return Ok(block);
        }

        let mut reader = data;

        if seekable {
            for _ in 0..row_count {
                let key_size = reader.read_u32_varint()? as usize;
                let value_size = reader.read_u32_varint()? as usize;

                let key = reader
                    .get(..key_size)
                    .ok_or(DecodeError::Truncated("Block"))?;
                reader = &reader[key_size..];

                let value = reader
                    .get(..value_size)
                    .ok_or(DecodeError::Truncated("Block"))?;
                reader = &reader[value_size..];

                block.add(key, value);
            }
        } else {
            let mut key_sizes = Vec::with_capacity(row_count);
            let mut value_sizes = Vec::with_capacity(row_count);

            for _ in 0..row_count {
                key_sizes.push(reader.read_u32_varint()? as usize);
            }
            for _ in 0..row_count {
                value_sizes.push(reader.read_u32_varint()? as usize);
            }

            let key_total: usize = key_sizes.iter().sum();
            let value_total: usize = value_sizes.iter().sum();

            if reader.len() < key_total + value_total {
                return Err(DecodeError::Truncated("Block"));
            }

            let (key_data, rest) = reader.split_at(key_total);
            let value_data = rest.get(..value_total).ok_or(DecodeError::Truncated("Block"))?;

            let mut key_pos = 0;
            let mut value_pos = 0;

            #[allow(clippy::indexing_slicing)]
            for i in 0..row_count {
                let key = &key_data[key_pos..key_pos + key_sizes[i]];
                let value = &value_data[value_pos..value_pos + value_sizes[i]];
                block.add(key, value);

                key_pos += key_sizes[i];
                value_pos += value_sizes[i];
            }
        }

        Ok(block)
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::expect_used)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_block() -> Block {
        let mut block = Block::default();
        block.add(b"apple", b"1");
        block.add(b"banana", b"22");
        block.add(b"cherry", b"");
        block
    }

    #[test]
    fn block_roundtrip_compact() -> crate::Result<()> {
        let block = sample_block();

        let mut buf = vec![];
        block.marshal(false, &mut buf)?;
        assert_eq!(block.serialized_size(), buf.len());

        let decoded = Block::unmarshal(&buf, 3, false)?;
        assert_eq!(3, decoded.len());
        assert_eq!(b"apple".as_slice(), decoded.key(0));
        assert_eq!(b"22".as_slice(), decoded.value(1));
        assert_eq!(b"".as_slice(), decoded.value(2));
        assert_eq!(b"cherry".as_slice(), decoded.last_key());

        Ok(())
    }

    #[test]
    fn block_roundtrip_seekable() -> crate::Result<()> {
        let block = sample_block();

        let mut buf = vec![];
        block.marshal(true, &mut buf)?;
        assert_eq!(block.serialized_size(), buf.len());

        let decoded = Block::unmarshal(&buf, 3, true)?;
        assert_eq!(3, decoded.len());
        assert_eq!(b"banana".as_slice(), decoded.key(1));
        assert_eq!(b"1".as_slice(), decoded.value(0));

        Ok(())
    }

    #[test]
    fn block_find_row() {
        let block = sample_block();

        assert_eq!(0, block.find_row(b"a"));
        assert_eq!(0, block.find_row(b"apple"));
        assert_eq!(1, block.find_row(b"apricot"));
        assert_eq!(1, block.find_row(b"banana"));
        assert_eq!(3, block.find_row(b"zebra"));
    }

    #[test]
    fn block_unmarshal_truncated() {
        let block = sample_block();

        let mut buf = vec![];
        block.marshal(false, &mut buf).expect("marshals");
        buf.truncate(buf.len() - 2);

        assert!(Block::unmarshal(&buf, 3, false).is_err());
    }

    #[test]
    fn block_empty() -> crate::Result<()> {
        let block = Block::default();
        assert!(block.is_empty());
        assert_eq!(0, block.serialized_size());

        let mut buf = vec![];
        block.marshal(false, &mut buf)?;
        assert!(buf.is_empty());

        Ok(())
    }
}
