// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::table::TableReader;
use crate::{KvPair, UserKey, UserValue};
use interval_heap::IntervalHeap as Heap;

/// An iterator of rows, as fed into [`Merger`]
pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<KvPair>> + 'a>;

/// Adapts a [`TableReader`] into a row iterator.
pub struct Rows<R: TableReader>(pub R);

impl<R: TableReader> Iterator for Rows<R> {
    type Item = crate::Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.read_row().transpose()
    }
}

#[derive(Eq, PartialEq)]
struct HeapItem(usize, KvPair);

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ties are broken by source index, making the merge stable
        (&self.1 .0, self.0).cmp(&(&other.1 .0, other.0))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges multiple sorted KV iterators into one key-ordered stream.
///
/// Rows with equal keys are yielded in ascending source order.
pub struct Merger<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: Heap<HeapItem>,

    initialized: bool,
}

impl<'a> Merger<'a> {
    #[must_use]
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        let heap = Heap::with_capacity(iterators.len());

        Self {
            iterators,
            heap,
            initialized: false,
        }
    }

    /// Merges opened tables.
    #[must_use]
    pub fn from_readers<R: TableReader + 'a>(readers: Vec<R>) -> Self {
        Self::new(
            readers
                .into_iter()
                .map(|reader| Box::new(Rows(reader)) as BoxedIterator<'a>)
                .collect(),
        )
    }

    /// Groups consecutive rows sharing a key into one item.
    #[must_use]
    pub fn grouped(self) -> GroupedMerger<'a> {
        GroupedMerger {
            inner: self,
            pending: None,
        }
    }

    #[allow(clippy::indexing_slicing)]
    fn initialize(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            if let Some(item) = self.iterators[idx].next() {
                let item = item?;
                self.heap.push(HeapItem(idx, item));
            }
        }
        self.initialized = true;
        Ok(())
    }
}

impl Iterator for Merger<'_> {
    type Item = crate::Result<KvPair>;

    #[allow(clippy::indexing_slicing)]
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            fail_iter!(self.initialize());
        }

        let min_item = self.heap.pop_min()?;

        if let Some(next_item) = self.iterators[min_item.0].next() {
            let next_item = fail_iter!(next_item);
            self.heap.push(HeapItem(min_item.0, next_item));
        }

        Some(Ok(min_item.1))
    }
}

/// Merges sorted KV iterators, accumulating all consecutive rows that
/// share a key before yielding them as one group.
pub struct GroupedMerger<'a> {
    inner: Merger<'a>,
    pending: Option<KvPair>,
}

impl Iterator for GroupedMerger<'_> {
    type Item = crate::Result<(UserKey, Vec<UserValue>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = match self.pending.take() {
            Some(row) => row,
            None => fail_iter!(self.inner.next()?),
        };

        let mut values = vec![value];

        loop {
            match self.inner.next() {
                None => return Some(Ok((key, values))),

                Some(Err(e)) => return Some(Err(e)),

                Some(Ok((next_key, next_value))) => {
                    if next_key == key {
                        values.push(next_value);
                    } else {
                        self.pending = Some((next_key, next_value));
                        return Some(Ok((key, values)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    fn source(rows: &[(&str, &str)]) -> BoxedIterator<'static> {
        let rows: Vec<crate::Result<KvPair>> = rows
            .iter()
            .map(|(k, v)| Ok((UserKey::from(*k), UserValue::from(*v))))
            .collect();

        Box::new(rows.into_iter())
    }

    #[test]
    fn merge_two_sources() {
        let merger = Merger::new(vec![
            source(&[("a", "0"), ("c", "0"), ("e", "0")]),
            source(&[("b", "1"), ("d", "1")]),
        ]);

        let keys: Vec<String> = merger
            .map(|row| String::from_utf8(row.expect("merges").0.to_vec()).expect("is utf-8"))
            .collect();

        assert_eq!(vec!["a", "b", "c", "d", "e"], keys);
    }

    #[test]
    fn merge_is_stable() {
        let merger = Merger::new(vec![
            source(&[("a", "first"), ("b", "first")]),
            source(&[("a", "second")]),
            source(&[("a", "third"), ("c", "third")]),
        ]);

        let rows: Vec<KvPair> = merger.map(|row| row.expect("merges")).collect();

        let values: Vec<&[u8]> = rows
            .iter()
            .take(3)
            .map(|(_, v)| v.as_ref())
            .collect();

        // Equal keys arrive in source order
        assert_eq!(
            vec![b"first".as_slice(), b"second".as_slice(), b"third".as_slice()],
            values,
        );
    }

    #[test]
    fn merge_grouped() {
        let merger = Merger::new(vec![
            source(&[("a", "0"), ("b", "0")]),
            source(&[("b", "1"), ("c", "1")]),
            source(&[("b", "2")]),
        ]);

        let groups: Vec<(UserKey, Vec<UserValue>)> = merger
            .grouped()
            .map(|group| group.expect("merges"))
            .collect();

        assert_eq!(3, groups.len());
        assert_eq!(UserKey::from("a"), groups[0].0);
        assert_eq!(1, groups[0].1.len());

        assert_eq!(UserKey::from("b"), groups[1].0);
        assert_eq!(
            vec![
                UserValue::from("0"),
                UserValue::from("1"),
                UserValue::from("2"),
            ],
            groups[1].1,
        );

        assert_eq!(UserKey::from("c"), groups[2].0);
    }

    #[test]
    fn merge_empty() {
        let mut merger = Merger::new(vec![]);
        assert!(merger.next().is_none());

        let mut merger = Merger::new(vec![source(&[])]).grouped();
        assert!(merger.next().is_none());
    }
}
