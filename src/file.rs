// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fs::File;
use std::path::Path;

/// Magic number identifying a write-once table, stored little-endian at
/// file offset 0. The byte order of the stored value doubles as an
/// endianness marker.
pub const TABLE_MAGIC: u64 = 0x6c62_6174_2e69_2e70;

/// Trailing magic number of LevelDB-format SSTables; recognized by the
/// factory only to produce a precise error.
pub const LEVELDB_FOOTER_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Reads exactly `size` bytes at `offset` using `pread`.
pub fn read_exact_at(file: &File, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0; size];
    file.read_exact_at(&mut buf, offset)?;

    Ok(buf)
}

/// Fsyncs a directory, making a freshly linked file name durable.
#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn pread_exact() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.bin");

        {
            let mut file = File::create(&path)?;
            file.write_all(b"0123456789")?;
        }

        let file = File::open(&path)?;
        assert_eq!(b"345".as_slice(), read_exact_at(&file, 3, 3)?);
        assert!(read_exact_at(&file, 8, 5).is_err());

        Ok(())
    }
}
