use quarry::table::{self, SeekableReader, TableReader, Writer, WriterOptions};
use quarry::CompressionType;
use std::io::SeekFrom;
use test_log::test;

fn seekable_options() -> WriterOptions {
    WriterOptions {
        seekable: true,
        ..Default::default()
    }
}

#[test]
fn seekable_offsets_address_rows() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("summary_00");

    let rows: Vec<(String, String)> = (0..500)
        .map(|i| (format!("doc{i:04}"), format!("{{\"id\":{i}}}")))
        .collect();

    let mut writer = Writer::create(&path, seekable_options())?;
    for (key, value) in &rows {
        writer.insert_row(key, value)?;
    }
    writer.sync()?;

    // First pass: remember every row's byte offset
    let mut reader = SeekableReader::open(&path)?;
    let mut offsets = vec![];

    loop {
        let offset = reader.offset();
        let Some((key, _)) = reader.read_row()? else {
            break;
        };
        offsets.push((offset, key));
    }

    assert_eq!(rows.len(), offsets.len());

    // Second pass: every offset must address exactly its row
    for (offset, key) in offsets.iter().rev() {
        reader.seek(SeekFrom::Start(*offset))?;
        let (got_key, _) = reader.read_row()?.expect("row should exist");
        assert_eq!(key, &got_key);
    }

    Ok(())
}

#[test]
fn seekable_seek_to_key() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("summary_00");

    let mut writer = Writer::create(&path, seekable_options())?;
    writer.insert_row("a", "xxx")?;
    writer.insert_row("c", "zzz")?;
    writer.sync()?;

    let mut reader = SeekableReader::open(&path)?;

    assert!(reader.seek_to_key(b"a")?);
    assert_eq!(0, reader.offset());

    // A miss leaves the cursor on the next greater key
    assert!(!reader.seek_to_key(b"b")?);
    let (key, _) = reader.read_row()?.expect("row should exist");
    assert_eq!(b"c".as_slice(), &*key);

    assert!(!reader.seek_to_key(b"z")?);
    assert!(reader.read_row()?.is_none());

    Ok(())
}

#[test]
fn seekable_seek_bounds() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("summary_00");

    let mut writer = Writer::create(&path, seekable_options())?;
    writer.insert_row("a", "xxx")?;
    writer.sync()?;

    let mut reader = SeekableReader::open(&path)?;

    reader.seek(SeekFrom::End(0))?;
    assert!(reader.read_row()?.is_none());

    reader.seek(SeekFrom::Start(0))?;
    assert!(reader.read_row()?.is_some());

    assert!(reader.seek(SeekFrom::Start(1 << 40)).is_err());
    assert!(reader.seek(SeekFrom::Current(-1000)).is_err());

    Ok(())
}

#[test]
fn seekable_blocks_stay_raw_under_compression() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("summary_00");

    let mut writer = Writer::create(
        &path,
        WriterOptions {
            seekable: true,
            compression: CompressionType::Zstd,
            ..Default::default()
        },
    )?;

    let rows: Vec<(String, String)> = (0..2_000)
        .map(|i| (format!("doc{i:04}"), format!("{{\"id\":{i}}}")))
        .collect();

    for (key, value) in &rows {
        writer.insert_row(key, value)?;
    }
    writer.sync()?;

    let mut reader = SeekableReader::open(&path)?;

    let mut count = 0;
    while reader.read_row()?.is_some() {
        count += 1;
    }
    assert_eq!(rows.len(), count);

    assert!(reader.seek_to_key(b"doc1234")?);

    Ok(())
}

#[test]
fn non_seekable_table_refuses_seekable_open() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("table_00");

    let mut writer = Writer::create(&path, WriterOptions::default())?;
    writer.insert_row("a", "xxx")?;
    writer.sync()?;

    assert!(matches!(
        SeekableReader::open(&path),
        Err(quarry::Error::InvalidInput(_)),
    ));

    // The factory hands back the plain variant instead
    let mut reader = table::open(&path)?;
    assert!(reader.seek_to_key(b"a")?);

    Ok(())
}

#[test]
fn seekable_table_via_generic_reader() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("summary_00");

    let mut writer = Writer::create(&path, seekable_options())?;
    writer.insert_row("a", "xxx")?;
    writer.insert_row("b", "yyy")?;
    writer.sync()?;

    let mut reader = table::open(&path)?;
    assert!(reader.seek_to_key(b"b")?);

    let (key, value) = reader.read_row()?.expect("row should exist");
    assert_eq!(b"b".as_slice(), &*key);
    assert_eq!(b"yyy".as_slice(), &*value);

    Ok(())
}
