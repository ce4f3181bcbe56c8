//! Distinct-value accumulator: one group's value -> count map.
//!
//! Values are copied into the accumulator's own [`KeyStore`]; the hash table
//! only holds indices into it, so growth rehashes `usize`s using the stored
//! hashes and never touches value bytes. Nulls never reach this layer.

use crate::error::{HistogramError, Result};
use crate::physical::codec::{ColumnView, ValueCodec};
use crate::physical::key_store::KeyStore;
use arrow::array::{ArrayRef, Int64Array};
use hashbrown::HashTable;
use std::mem::size_of;
use std::sync::Arc;

/// Counts of each distinct non-null value seen by one group
#[derive(Debug)]
pub struct DistinctCounts {
    codec: Arc<ValueCodec>,
    keys: KeyStore,
    counts: Vec<i64>,
    hashes: Vec<u64>,
    table: HashTable<usize>,
}

impl DistinctCounts {
    pub fn new(codec: Arc<ValueCodec>) -> Self {
        let keys = KeyStore::new(&codec);
        Self {
            codec,
            keys,
            counts: Vec::new(),
            hashes: Vec::new(),
            table: HashTable::new(),
        }
    }

    /// Create with room for `capacity` distinct values
    pub fn try_with_capacity(codec: Arc<ValueCodec>, capacity: usize) -> Result<Self> {
        let mut acc = Self::new(codec);
        if capacity > 0 {
            acc.counts.try_reserve(capacity)?;
            acc.hashes.try_reserve(capacity)?;
            let hashes = &acc.hashes;
            acc.table.try_reserve(capacity, |&i| hashes[i])?;
        }
        Ok(acc)
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Count one occurrence of the value at `row`
    pub fn insert_or_increment(&mut self, view: &ColumnView<'_>, row: usize) -> Result<()> {
        self.upsert(view.hash(row), view, row, 1)
    }

    /// Add `delta` occurrences of the value at `row`
    pub fn insert_or_increment_by(
        &mut self,
        view: &ColumnView<'_>,
        row: usize,
        delta: i64,
    ) -> Result<()> {
        if delta <= 0 {
            return Err(HistogramError::InvalidState(format!(
                "histogram counts must be positive, got {}",
                delta
            )));
        }
        self.upsert(view.hash(row), view, row, delta)
    }

    /// Add every (value, count) of `other` into this accumulator
    pub fn merge(&mut self, other: &DistinctCounts) -> Result<()> {
        if self.codec.data_type() != other.codec.data_type() {
            return Err(HistogramError::TypeMismatch(format!(
                "cannot merge histogram of {} into histogram of {}",
                other.codec.data_type(),
                self.codec.data_type()
            )));
        }
        if other.is_empty() {
            return Ok(());
        }

        let keys = other.keys.finish()?;
        let view = self.codec.view(keys.as_ref())?;
        for (row, (&hash, &count)) in other.hashes.iter().zip(&other.counts).enumerate() {
            self.upsert(hash, &view, row, count)?;
        }
        Ok(())
    }

    /// Count of the value at `row`, if present
    #[cfg(test)]
    pub(crate) fn count_of(&self, view: &ColumnView<'_>, row: usize) -> Option<i64> {
        let hash = view.hash(row);
        self.table
            .find(hash, |&i| {
                self.hashes[i] == hash && self.keys.matches(i, view, row)
            })
            .map(|&i| self.counts[i])
    }

    /// Distinct values and their counts, in first-seen order
    pub fn entries(&self) -> Result<(ArrayRef, Int64Array)> {
        let keys = self.keys.finish()?;
        Ok((keys, Int64Array::from(self.counts.clone())))
    }

    /// Approximate heap bytes held by the accumulator
    pub fn memory_size(&self) -> usize {
        self.keys.memory_size()
            + self.counts.capacity() * size_of::<i64>()
            + self.hashes.capacity() * size_of::<u64>()
            + self.table.capacity() * (size_of::<usize>() + 1)
    }

    fn upsert(&mut self, hash: u64, view: &ColumnView<'_>, row: usize, delta: i64) -> Result<()> {
        let Self {
            keys,
            counts,
            hashes,
            table,
            ..
        } = self;

        if let Some(&idx) = table.find(hash, |&i| hashes[i] == hash && keys.matches(i, view, row))
        {
            let current = counts[idx];
            counts[idx] = current.checked_add(delta).ok_or_else(|| {
                HistogramError::Execution(format!(
                    "histogram count overflow adding {} to {}",
                    delta, current
                ))
            })?;
            return Ok(());
        }

        table.try_reserve(1, |&i| hashes[i])?;
        counts.try_reserve(1)?;
        hashes.try_reserve(1)?;
        let idx = keys.push(view, row)?;
        counts.push(delta);
        hashes.push(hash);
        table.insert_unique(hash, idx, |&i| hashes[i]);
        Ok(())
    }
}
