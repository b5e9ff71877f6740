use quarry::table::{TableReader, Writer, WriterOptions};
use quarry::Schema;
use test_log::test;

fn build_table(path: &std::path::Path, seekable: bool) -> quarry::Result<()> {
    let mut writer = Writer::create(
        path,
        WriterOptions {
            seekable,
            ..Default::default()
        },
    )?;
    writer.insert_row("a", "{\"x\":1}")?;
    writer.sync()
}

#[test]
fn schema_loads_all_table_kinds() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let summary = folder.path().join("summary_00");
    let override_table = folder.path().join("override_00");
    let index = folder.path().join("index_00");

    build_table(&summary, true)?;
    build_table(&override_table, false)?;
    build_table(&index, false)?;

    let schema_path = folder.path().join("schema");
    std::fs::write(
        &schema_path,
        format!(
            "# a comment line\n\
             \n\
             summary\t{}\t0x10\n\
             summary-override\t{}\n\
             index\t{}\n",
            summary.display(),
            override_table.display(),
            index.display(),
        ),
    )?;

    let mut schema = Schema::new(&schema_path);
    schema.load()?;

    assert_eq!(1, schema.summary_tables.len());
    assert_eq!(0x10, schema.summary_tables[0].0);
    assert_eq!(1, schema.summary_override_tables.len());

    // Index tables open lazily, on first use
    let index_tables = schema.index_tables()?;
    assert_eq!(1, index_tables.len());
    assert!(index_tables[0].seek_to_key(b"a")?);

    Ok(())
}

#[test]
fn schema_load_is_idempotent() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let summary = folder.path().join("summary_00");
    build_table(&summary, true)?;

    let schema_path = folder.path().join("schema");
    std::fs::write(&schema_path, format!("summary\t{}\t0\n", summary.display()))?;

    let mut schema = Schema::new(&schema_path);
    schema.load()?;
    schema.load()?;

    assert_eq!(1, schema.summary_tables.len());

    Ok(())
}

#[test]
fn schema_rejects_missing_tab() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema_path = folder.path().join("schema");
    std::fs::write(&schema_path, "summary with no tab\n")?;

    let mut schema = Schema::new(&schema_path);

    assert!(matches!(
        schema.load(),
        Err(quarry::Error::InvalidInput(message)) if message.contains("TAB"),
    ));

    Ok(())
}

#[test]
fn schema_rejects_unknown_kind() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema_path = folder.path().join("schema");
    std::fs::write(&schema_path, "mystery\t/nonexistent\n")?;

    let mut schema = Schema::new(&schema_path);

    assert!(matches!(
        schema.load(),
        Err(quarry::Error::InvalidInput(message)) if message.contains("mystery"),
    ));

    Ok(())
}

#[test]
fn schema_rejects_bad_offset() -> quarry::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema_path = folder.path().join("schema");
    std::fs::write(&schema_path, "summary\t/nonexistent\tabc\n")?;

    let mut schema = Schema::new(&schema_path);

    assert!(matches!(
        schema.load(),
        Err(quarry::Error::InvalidInput(_)),
    ));

    Ok(())
}
