// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::eval::union_offsets;
use crate::cas::CasClient;
use crate::postings::{self, PostingEntry};
use crate::table::{AnyReader, TableReader};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Header metadata attached to offsets by `FIELD-in:KEY` lookups,
/// spliced into the JSON output as `_header` / `_header_key`.
pub(crate) type ExtraMetadata = FxHashMap<u64, (String, String)>;

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes `%HH` escapes; malformed escapes pass through untouched.
pub(crate) fn decode_uri_component(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while let Some(&byte) = bytes.get(i) {
        if byte == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_value);
            let lo = bytes.get(i + 2).copied().and_then(hex_value);

            if let (Some(hi), Some(lo)) = (hi, lo) {
                result.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }

        result.push(byte);
        i += 1;
    }

    result
}

/// Checks whether a string may be a valid domain name.
fn is_valid_domain_name(name: &str) -> bool {
    if name.len() < 3 {
        return false;
    }

    !name.starts_with('.') && !name.ends_with('.')
}

/// Plain keyword lookup: decodes the identifier, probes every index
/// table and unions the posting lists.
pub(crate) fn lookup_plain(
    index_tables: &mut [AnyReader],
    token: &str,
) -> crate::Result<Vec<PostingEntry>> {
    let key = decode_uri_component(token);

    let mut result: Vec<PostingEntry> = vec![];

    for table in index_tables {
        if !table.seek_to_key(&key)? {
            continue;
        }

        let Some((_, data)) = table.read_row()? else {
            return Err(crate::Error::InvalidInput(
                "index table ended after a successful seek".into(),
            ));
        };

        let new_offsets = postings::decode(&data)?;

        result = if result.is_empty() {
            new_offsets
        } else {
            union_offsets(&result, &new_offsets)
        };
    }

    Ok(result)
}

/// Scans every index key starting with `prefix` and keeps those whose
/// remainder contains `needle` case-insensitively; all their offsets are
/// unioned.
fn lookup_prefix_scan(
    index_tables: &mut [AnyReader],
    prefix: &str,
    needle: &str,
) -> crate::Result<Vec<PostingEntry>> {
    let needle = needle.to_ascii_lowercase();
    let prefix = prefix.as_bytes();

    // A sorted set handles the offset-level dedup cheaply; unioning
    // vectors per key would be quadratic on hot prefixes
    let mut offset_buffer = BTreeSet::new();

    for table in index_tables {
        table.seek_to_first();
        table.seek_to_key(prefix)?;

        while let Some((row_key, data)) = table.read_row()? {
            if !row_key.starts_with(prefix) {
                break;
            }

            #[allow(clippy::indexing_slicing)]
            let suffix = String::from_utf8_lossy(&row_key[prefix.len()..]).to_ascii_lowercase();

            if !suffix.contains(&needle) {
                continue;
            }

            for entry in postings::decode(&data)? {
                offset_buffer.insert(entry.offset);
            }
        }
    }

    Ok(offset_buffer
        .into_iter()
        .map(|offset| PostingEntry::new(offset, 0.0))
        .collect())
}

/// Expands a `FIELD-in:KEY` token: fetches the document under `KEY` from
/// the content store, extracts DNS-name-shaped tokens and `{header}`
/// markers, and unions the postings of `FIELD:name` for every name.
///
/// Headers preceding a name are recorded per offset in `extra` unless
/// the query is already building threshold headers.
fn lookup_cas_expansion(
    index_tables: &mut [AnyReader],
    field: &str,
    cas_key: &str,
    make_headers: bool,
    extra: &mut ExtraMetadata,
    cas_client: &mut Option<Box<dyn CasClient>>,
) -> crate::Result<Vec<PostingEntry>> {
    let Some(client) = cas_client else {
        return Err(crate::Error::Unsupported(
            "no content store client configured",
        ));
    };

    let field = if field == "links" { "name" } else { field };

    let data = client.get(cas_key)?;

    // Deterministic iteration order; the map also makes names unique,
    // first header wins
    let mut names: BTreeMap<String, (String, String)> = BTreeMap::new();

    let mut add_name = |mut name: String, header: &str, header_key: &str| {
        if let Some(rest) = name.strip_prefix("www.") {
            name = rest.into();
        }

        if is_valid_domain_name(&name) {
            names
                .entry(name)
                .or_insert_with(|| (header.into(), header_key.into()));
        }
    };

    let mut name = String::new();
    let mut header = String::new();
    let mut header_key = String::new();
    let mut in_header = false;
    let mut header_idx = 0usize;

    for ch in data.iter().map(|&b| char::from(b)) {
        if in_header {
            if ch.is_ascii_alphanumeric() || " .,_&-".contains(ch) {
                header.push(ch);
            } else if ch == '}' {
                header_key = format!("{header_idx:06}");
                header_idx += 1;
                in_header = false;
            } else {
                header.clear();
                in_header = false;
            }
        } else if ch == '{' {
            in_header = true;
            header.clear();
        } else if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
            name.push(ch.to_ascii_lowercase());
        } else if !name.is_empty() {
            add_name(std::mem::take(&mut name), &header, &header_key);
        }
    }

    if !name.is_empty() {
        add_name(name, &header, &header_key);
    }

    let mut offset_buffer = BTreeSet::new();

    for (name, (header, header_key)) in &names {
        let token = format!("{field}:{name}");

        for entry in lookup_plain(index_tables, &token)? {
            offset_buffer.insert(entry.offset);

            if !header.is_empty() && !make_headers {
                extra.insert(entry.offset, (header.clone(), header_key.clone()));
            }
        }
    }

    Ok(offset_buffer
        .into_iter()
        .map(|offset| PostingEntry::new(offset, 0.0))
        .collect())
}

/// Resolves a `Leaf` identifier, recognizing the two special token
/// forms.
pub(crate) fn lookup_index_key(
    index_tables: &mut [AnyReader],
    token: &str,
    make_headers: bool,
    extra: &mut ExtraMetadata,
    cas_client: &mut Option<Box<dyn CasClient>>,
) -> crate::Result<Vec<PostingEntry>> {
    if let Some(delimiter) = token.find(':') {
        if delimiter > 3 && token.get(delimiter - 3..delimiter) == Some("-in") {
            let field = token.get(..delimiter - 3).unwrap_or_default();
            let cas_key = token.get(delimiter + 1..).unwrap_or_default();

            return lookup_cas_expansion(
                index_tables,
                field,
                cas_key,
                make_headers,
                extra,
                cas_client,
            );
        }
    }

    if let Some(rest) = token.strip_prefix("in-") {
        let Some((prefix, needle)) = rest.split_once(':') else {
            return Ok(vec![]);
        };

        return lookup_prefix_scan(index_tables, prefix, needle);
    }

    lookup_plain(index_tables, token)
}
