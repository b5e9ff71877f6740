// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Facade over an external content-addressed store.
//!
//! One query form (`FIELD-in:KEY`) expands a stored document into a set
//! of index lookups. The store itself is an external collaborator; this
//! crate only needs a blocking fetch.

/// A blocking client for the external content-addressed store.
pub trait CasClient {
    /// Fetches the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be retrieved.
    fn get(&mut self, key: &str) -> crate::Result<Vec<u8>>;
}
