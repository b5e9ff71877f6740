// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::table::{self, AnyReader, SeekableReader};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Parses a decimal, `0x…` hex or `0…` octal number.
fn parse_u64_cstyle(input: &str) -> Option<u64> {
    if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if input.len() > 1 && input.starts_with('0') {
        u64::from_str_radix(input, 8).ok()
    } else {
        input.parse().ok()
    }
}

/// The set of tables making up one catalog, loaded from a manifest.
///
/// The manifest is a text file of `<kind>\t<path>[\t<number>]` lines,
/// where kind is `summary`, `summary-override` or `index`. `#` starts a
/// comment. For summary tables the third field is the base offset that
/// maps in-table byte offsets into the global offset space; summary
/// tables partition that space by ascending base offset.
///
/// Summary and override tables are opened eagerly by [`Schema::load`];
/// index tables are opened on first use.
pub struct Schema {
    path: PathBuf,
    loaded: bool,

    /// Summary tables with their base offsets, ascending
    pub summary_tables: Vec<(u64, SeekableReader)>,

    /// Tables whose rows are spliced into matching summaries at output
    /// time
    pub summary_override_tables: Vec<AnyReader>,

    index_table_paths: Vec<PathBuf>,
    index_tables: Vec<AnyReader>,
}

impl Schema {
    /// Creates an unloaded schema for the manifest at `path`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            loaded: false,
            summary_tables: Vec::new(),
            summary_override_tables: Vec::new(),
            index_table_paths: Vec::new(),
            index_tables: Vec::new(),
        }
    }

    /// Parses the manifest and opens the summary tables. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is malformed or a table cannot be
    /// opened.
    pub fn load(&mut self) -> crate::Result<()> {
        if self.loaded {
            return Ok(());
        }

        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);

        for (lineno, line) in reader.lines().enumerate() {
            let lineno = lineno + 1;
            let line = line?;
            let line = line.trim_end();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split('\t');

            #[allow(clippy::expect_used)]
            let kind = fields.next().expect("split yields at least one field");

            let table_path = fields.next().ok_or_else(|| {
                crate::Error::InvalidInput(format!(
                    "{}:{lineno}: missing TAB character",
                    self.path.display(),
                ))
            })?;

            let base_offset = match fields.next() {
                None => 0,
                Some(field) => parse_u64_cstyle(field).ok_or_else(|| {
                    crate::Error::InvalidInput(format!(
                        "{}:{lineno}: invalid offset {field:?}",
                        self.path.display(),
                    ))
                })?,
            };

            match kind {
                "summary" => {
                    let reader = table::open_seekable(table_path)?;
                    self.summary_tables.push((base_offset, reader));
                }

                "summary-override" => {
                    self.summary_override_tables.push(table::open(table_path)?);
                }

                "index" => {
                    self.index_table_paths.push(table_path.into());
                }

                kind => {
                    return Err(crate::Error::InvalidInput(format!(
                        "{}:{lineno}: unknown table type {kind:?}",
                        self.path.display(),
                    )));
                }
            }
        }

        self.summary_tables.sort_by_key(|(base, _)| *base);

        log::debug!(
            "loaded schema {}: {} summary, {} override, {} index tables",
            self.path.display(),
            self.summary_tables.len(),
            self.summary_override_tables.len(),
            self.index_table_paths.len(),
        );

        self.loaded = true;

        Ok(())
    }

    /// The index tables, opened on first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or a table cannot be opened.
    pub fn index_tables(&mut self) -> crate::Result<&mut [AnyReader]> {
        self.load()?;

        if self.index_tables.len() != self.index_table_paths.len() {
            self.index_tables.clear();

            for path in &self.index_table_paths {
                self.index_tables.push(table::open(path)?);
            }
        }

        Ok(&mut self.index_tables)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_u64_cstyle;
    use test_log::test;

    #[test]
    fn parse_offsets() {
        assert_eq!(Some(0), parse_u64_cstyle("0"));
        assert_eq!(Some(1234), parse_u64_cstyle("1234"));
        assert_eq!(Some(255), parse_u64_cstyle("0xff"));
        assert_eq!(Some(8), parse_u64_cstyle("010"));
        assert_eq!(None, parse_u64_cstyle("12z"));
        assert_eq!(None, parse_u64_cstyle(""));
    }
}
