use quarry::postings::{self, PostingEntry, TableMergeOptions};
use quarry::table::{self, Reader, TableReader, Writer, WriterOptions};
use quarry::Merger;
use test_log::test;

fn build_table(path: &std::path::Path, rows: &[(&str, &str)]) -> quarry::Result<()> {
    let mut writer = Writer::create(path, WriterOptions::default())?;
    for (key, value) in rows {
        writer.insert_row(key, value)?;
    }
    writer.sync()
}

#[test]
fn merge_readers_in_key_order() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let path_a = folder.path().join("table_00");
    let path_b = folder.path().join("table_01");

    build_table(&path_a, &[("a", "0"), ("c", "0"), ("e", "0")])?;
    build_table(&path_b, &[("b", "1"), ("d", "1"), ("f", "1")])?;

    let readers = vec![Reader::open(&path_a)?, Reader::open(&path_b)?];

    let mut keys = vec![];
    for row in Merger::from_readers(readers) {
        let (key, _) = row?;
        keys.push(String::from_utf8_lossy(&key).into_owned());
    }

    assert_eq!(vec!["a", "b", "c", "d", "e", "f"], keys);

    Ok(())
}

#[test]
fn merge_ties_resolve_by_table_order() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let path_a = folder.path().join("table_00");
    let path_b = folder.path().join("table_01");
    let path_c = folder.path().join("table_02");

    build_table(&path_a, &[("k", "first")])?;
    build_table(&path_b, &[("k", "second")])?;
    build_table(&path_c, &[("k", "third")])?;

    let readers = vec![
        Reader::open(&path_a)?,
        Reader::open(&path_b)?,
        Reader::open(&path_c)?,
    ];

    let values: Vec<Vec<u8>> = Merger::from_readers(readers)
        .map(|row| row.map(|(_, value)| value.to_vec()))
        .collect::<quarry::Result<_>>()?;

    assert_eq!(
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()],
        values,
    );

    Ok(())
}

#[test]
fn merge_grouped_collects_equal_keys() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let path_a = folder.path().join("table_00");
    let path_b = folder.path().join("table_01");

    build_table(&path_a, &[("a", "0"), ("b", "0")])?;
    build_table(&path_b, &[("b", "1"), ("c", "1")])?;

    let readers = vec![Reader::open(&path_a)?, Reader::open(&path_b)?];

    let groups: Vec<(String, usize)> = Merger::from_readers(readers)
        .grouped()
        .map(|group| {
            group.map(|(key, values)| {
                (String::from_utf8_lossy(&key).into_owned(), values.len())
            })
        })
        .collect::<quarry::Result<_>>()?;

    assert_eq!(
        vec![
            ("a".to_owned(), 1),
            ("b".to_owned(), 2),
            ("c".to_owned(), 1),
        ],
        groups,
    );

    Ok(())
}

#[test]
fn merge_posting_shards_with_key_prefix() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let path_a = folder.path().join("table_00");
    let path_b = folder.path().join("table_01");
    let merged_path = folder.path().join("merged");

    {
        let mut writer = Writer::create(&path_a, WriterOptions::default())?;
        postings::write_postings(&mut writer, b"a", &[PostingEntry::new(1, 0.5)])?;
        writer.sync()?;
    }

    {
        let mut writer = Writer::create(&path_b, WriterOptions::default())?;
        postings::write_postings(&mut writer, b"a", &[PostingEntry::new(2, 4.0)])?;
        writer.sync()?;
    }

    let sources = vec![table::open(&path_a)?, table::open(&path_b)?];

    let mut writer = Writer::create(&merged_path, WriterOptions::default())?;
    postings::merge_posting_tables(
        sources,
        &mut writer,
        &TableMergeOptions {
            add_key_prefix: Some(b"foo:".to_vec()),
            ..Default::default()
        },
    )?;
    writer.sync()?;

    let mut reader = Reader::open(&merged_path)?;

    let (key, value) = reader.read_row()?.expect("row should exist");
    assert_eq!(b"foo:a".as_slice(), &*key);
    assert_eq!(
        vec![PostingEntry::new(1, 0.5), PostingEntry::new(2, 4.0)],
        postings::decode(&value)?,
    );

    assert!(reader.read_row()?.is_none());

    Ok(())
}

#[test]
fn merge_postings_strip_prefix_and_shard() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let source_path = folder.path().join("table_00");
    let merged_path = folder.path().join("merged");

    {
        let mut writer = Writer::create(&source_path, WriterOptions::default())?;
        postings::write_postings(&mut writer, b"in:x", &[PostingEntry::new(1, 1.0)])?;
        postings::write_postings(&mut writer, b"in:y", &[PostingEntry::new(2, 1.0)])?;
        writer.sync()?;
    }

    let mut writer = Writer::create(&merged_path, WriterOptions::default())?;
    postings::merge_posting_tables(
        vec![table::open(&source_path)?],
        &mut writer,
        &TableMergeOptions {
            strip_key_prefix: Some(b"in:".to_vec()),
            ..Default::default()
        },
    )?;
    writer.sync()?;

    let mut reader = Reader::open(&merged_path)?;
    assert!(reader.seek_to_key(b"x")?);
    assert!(reader.seek_to_key(b"y")?);

    // Sharding keeps only matching keys; with a single shard everything
    // survives
    let sharded_path = folder.path().join("sharded");
    let mut writer = Writer::create(&sharded_path, WriterOptions::default())?;
    postings::merge_posting_tables(
        vec![table::open(&source_path)?],
        &mut writer,
        &TableMergeOptions {
            shard: Some((1, 0)),
            ..Default::default()
        },
    )?;
    writer.sync()?;

    let mut reader = Reader::open(&sharded_path)?;
    assert!(reader.seek_to_key(b"in:x")?);
    assert!(reader.seek_to_key(b"in:y")?);

    Ok(())
}
