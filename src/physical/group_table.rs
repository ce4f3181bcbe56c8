//! Group table: group key -> distinct-value accumulator.
//!
//! Group keys are materialized column-wise into one [`KeyStore`] per key
//! column. Groups are addressed by dense [`GroupId`]s; the hash table holds
//! ids, and accumulators live in a `Vec` indexed by id, so growing the table
//! never moves or re-creates an accumulator. A table with no key columns is
//! the global aggregation and always contains exactly one group.
//!
//! Memory is tracked per accumulator. Groups handed out through
//! [`GroupTable::accumulator_mut`] are re-measured on the next
//! [`GroupTable::memory_size`], so measuring costs the number of groups
//! touched since the last call, not the number of groups.

use crate::error::{HistogramError, Result};
use crate::physical::accumulator::DistinctCounts;
use crate::physical::codec::{decode_dictionary, ColumnView, ValueCodec};
use crate::physical::key_store::KeyStore;
use crate::physical::vectorized_hash::hash_rows;
use arrow::array::ArrayRef;
use arrow::datatypes::DataType;
use hashbrown::HashTable;
use std::mem::size_of;
use std::sync::Arc;

/// Dense index of a group, stable for the table's lifetime
pub type GroupId = usize;

/// Id of the single group of a global aggregation
pub const GLOBAL_GROUP: GroupId = 0;

#[derive(Debug)]
pub struct GroupTable {
    key_codecs: Vec<ValueCodec>,
    key_stores: Vec<KeyStore>,
    hashes: Vec<u64>,
    table: HashTable<GroupId>,
    accumulators: Vec<DistinctCounts>,
    /// Last measured size of each accumulator
    accumulator_sizes: Vec<usize>,
    /// Sum of `accumulator_sizes`
    accumulator_bytes: usize,
    /// Groups possibly grown since they were last measured
    touched: Vec<GroupId>,
    is_touched: Vec<bool>,
    value_codec: Arc<ValueCodec>,
    initial_capacity: usize,
}

impl GroupTable {
    /// Create a table grouping on columns of `key_types`. With no key types
    /// the global group is created up front.
    pub fn try_new(
        key_types: &[DataType],
        value_codec: Arc<ValueCodec>,
        initial_capacity: usize,
    ) -> Result<Self> {
        let key_codecs = key_types
            .iter()
            .map(ValueCodec::try_new)
            .collect::<Result<Vec<_>>>()?;
        let key_stores = key_codecs.iter().map(KeyStore::new).collect();

        let mut groups = Self {
            key_codecs,
            key_stores,
            hashes: Vec::new(),
            table: HashTable::new(),
            accumulators: Vec::new(),
            accumulator_sizes: Vec::new(),
            accumulator_bytes: 0,
            touched: Vec::new(),
            is_touched: Vec::new(),
            value_codec,
            initial_capacity,
        };
        if groups.is_global() {
            let acc =
                DistinctCounts::try_with_capacity(groups.value_codec.clone(), initial_capacity)?;
            groups.push_accumulator(acc);
        }
        Ok(groups)
    }

    pub fn is_global(&self) -> bool {
        self.key_codecs.is_empty()
    }

    pub fn num_groups(&self) -> usize {
        self.accumulators.len()
    }

    /// Group of every row, creating groups seen for the first time.
    /// Rows whose key components are null form groups like any other value.
    /// Dictionary-encoded key columns are decoded first.
    pub fn resolve(&mut self, key_columns: &[ArrayRef], num_rows: usize) -> Result<Vec<GroupId>> {
        let key_columns = key_columns
            .iter()
            .map(decode_dictionary)
            .collect::<Result<Vec<_>>>()?;
        let views = self.key_views(&key_columns, num_rows)?;
        if self.is_global() {
            return Ok(vec![GLOBAL_GROUP; num_rows]);
        }

        let hashes = hash_rows(&views, num_rows);
        let mut group_ids = Vec::with_capacity(num_rows);
        for (row, &hash) in hashes.iter().enumerate() {
            group_ids.push(self.find_or_create(&views, hash, row)?);
        }
        Ok(group_ids)
    }

    /// Accumulator of `group`, to be re-measured by the next
    /// [`memory_size`](Self::memory_size)
    pub fn accumulator_mut(&mut self, group: GroupId) -> &mut DistinctCounts {
        if !self.is_touched[group] {
            self.is_touched[group] = true;
            self.touched.push(group);
        }
        &mut self.accumulators[group]
    }

    /// Visit every group exactly once, in creation order
    pub fn for_each_group<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(GroupId, &DistinctCounts) -> Result<()>,
    {
        for (group, acc) in self.accumulators.iter().enumerate() {
            visit(group, acc)?;
        }
        Ok(())
    }

    /// One array per key column, row `i` holding group `i`'s key
    pub fn group_key_arrays(&self) -> Result<Vec<ArrayRef>> {
        self.key_stores.iter().map(KeyStore::finish).collect()
    }

    /// Approximate heap bytes held by keys and accumulators
    pub fn memory_size(&mut self) -> usize {
        for group in self.touched.drain(..) {
            self.is_touched[group] = false;
            let size = self.accumulators[group].memory_size();
            self.accumulator_bytes = self.accumulator_bytes - self.accumulator_sizes[group] + size;
            self.accumulator_sizes[group] = size;
        }

        self.key_stores.iter().map(KeyStore::memory_size).sum::<usize>()
            + self.accumulator_bytes
            + self.accumulators.capacity() * size_of::<DistinctCounts>()
            + self.accumulator_sizes.capacity() * size_of::<usize>()
            + self.touched.capacity() * size_of::<GroupId>()
            + self.is_touched.capacity()
            + self.hashes.capacity() * size_of::<u64>()
            + self.table.capacity() * (size_of::<GroupId>() + 1)
    }

    fn push_accumulator(&mut self, acc: DistinctCounts) -> GroupId {
        let group = self.accumulators.len();
        let size = acc.memory_size();
        self.accumulators.push(acc);
        self.accumulator_sizes.push(size);
        self.accumulator_bytes += size;
        self.is_touched.push(false);
        group
    }

    fn key_views<'a>(
        &self,
        key_columns: &'a [ArrayRef],
        num_rows: usize,
    ) -> Result<Vec<ColumnView<'a>>> {
        if key_columns.len() != self.key_codecs.len() {
            return Err(HistogramError::InvalidArgument(format!(
                "expected {} group key columns, got {}",
                self.key_codecs.len(),
                key_columns.len()
            )));
        }
        key_columns
            .iter()
            .zip(&self.key_codecs)
            .map(|(column, codec)| {
                if column.len() != num_rows {
                    return Err(HistogramError::InvalidArgument(format!(
                        "group key column has {} rows, expected {}",
                        column.len(),
                        num_rows
                    )));
                }
                codec.view(column.as_ref())
            })
            .collect()
    }

    fn find_or_create(
        &mut self,
        views: &[ColumnView<'_>],
        hash: u64,
        row: usize,
    ) -> Result<GroupId> {
        let existing = self.table.find(hash, |&g| {
            self.hashes[g] == hash
                && self
                    .key_stores
                    .iter()
                    .zip(views)
                    .all(|(store, view)| store.matches(g, view, row))
        });
        if let Some(&group) = existing {
            return Ok(group);
        }

        self.table.try_reserve(1, |&g| self.hashes[g])?;
        self.hashes.try_reserve(1)?;
        self.accumulators.try_reserve(1)?;
        self.accumulator_sizes.try_reserve(1)?;
        self.is_touched.try_reserve(1)?;
        let acc =
            DistinctCounts::try_with_capacity(self.value_codec.clone(), self.initial_capacity)?;
        for (store, view) in self.key_stores.iter_mut().zip(views) {
            store.push(view, row)?;
        }

        let group = self.push_accumulator(acc);
        self.hashes.push(hash);
        let hashes = &self.hashes;
        self.table.insert_unique(hash, group, |&g| hashes[g]);
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::*;
    use arrow::datatypes::{Int16Type, Int64Type};

    fn value_codec() -> Arc<ValueCodec> {
        Arc::new(ValueCodec::try_new(&DataType::Int64).unwrap())
    }

    #[test]
    fn test_global_group_exists_up_front() {
        let mut groups = GroupTable::try_new(&[], value_codec(), 0).unwrap();
        assert!(groups.is_global());
        assert_eq!(groups.num_groups(), 1);

        let ids = groups.resolve(&[], 3).unwrap();
        assert_eq!(ids, vec![GLOBAL_GROUP; 3]);
        assert_eq!(groups.num_groups(), 1);
        assert!(groups.group_key_arrays().unwrap().is_empty());
    }

    #[test]
    fn test_null_keys_form_a_group() {
        let mut groups = GroupTable::try_new(&[DataType::Int32], value_codec(), 0).unwrap();
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![
            Some(1),
            None,
            Some(2),
            None,
            Some(1),
        ]));

        let ids = groups.resolve(&[keys], 5).unwrap();
        assert_eq!(ids, vec![0, 1, 2, 1, 0]);
        assert_eq!(groups.num_groups(), 3);

        let key_arrays = groups.group_key_arrays().unwrap();
        let out = key_arrays[0].as_primitive::<arrow::datatypes::Int32Type>();
        assert_eq!(out.value(0), 1);
        assert!(out.is_null(1));
        assert_eq!(out.value(2), 2);
    }

    #[test]
    fn test_composite_keys() {
        let mut groups =
            GroupTable::try_new(&[DataType::Int32, DataType::Utf8], value_codec(), 0).unwrap();
        let a: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), Some(1), None, Some(1)]));
        let b: ArrayRef = Arc::new(StringArray::from(vec![Some("x"), None, Some("x"), Some("x")]));

        let ids = groups.resolve(&[a, b], 4).unwrap();
        assert_eq!(ids, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_identity_survives_growth() {
        let mut groups = GroupTable::try_new(&[DataType::Int64], value_codec(), 0).unwrap();
        let first: ArrayRef = Arc::new(Int64Array::from(vec![42]));
        let values = Int64Array::from(vec![7]);
        let view_codec = value_codec();
        let view = view_codec.view(&values).unwrap();

        let group = groups.resolve(&[first.clone()], 1).unwrap()[0];
        groups
            .accumulator_mut(group)
            .insert_or_increment(&view, 0)
            .unwrap();

        let many: ArrayRef = Arc::new(Int64Array::from_iter_values(0..10_000));
        let ids = groups.resolve(&[many], 10_000).unwrap();
        assert_eq!(ids[42], group);
        assert_eq!(groups.num_groups(), 10_000);

        let again = groups.resolve(&[first], 1).unwrap()[0];
        assert_eq!(again, group);
        assert_eq!(groups.accumulator_mut(again).count_of(&view, 0), Some(1));
    }

    #[test]
    fn test_dictionary_keys_group_by_value() {
        let mut groups = GroupTable::try_new(
            &[DataType::Dictionary(Box::new(DataType::Int16), Box::new(DataType::Utf8))],
            value_codec(),
            0,
        )
        .unwrap();
        let plain: ArrayRef = Arc::new(StringArray::from(vec![Some("b"), None]));
        let dict: DictionaryArray<Int16Type> =
            vec![Some("a"), Some("b"), None, Some("a")].into_iter().collect();
        let dict: ArrayRef = Arc::new(dict);

        assert_eq!(groups.resolve(&[plain], 2).unwrap(), vec![0, 1]);
        assert_eq!(groups.resolve(&[dict], 4).unwrap(), vec![2, 0, 1, 2]);

        let keys = groups.group_key_arrays().unwrap();
        assert_eq!(keys[0].data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_memory_size_tracks_touched_groups() {
        let mut groups = GroupTable::try_new(&[DataType::Int64], value_codec(), 0).unwrap();
        let keys: ArrayRef = Arc::new(Int64Array::from_iter_values(0..1_000));
        let ids = groups.resolve(&[keys], 1_000).unwrap();
        let before = groups.memory_size();

        let values = Int64Array::from_iter_values(0..5_000);
        let codec = value_codec();
        let view = codec.view(&values).unwrap();
        for row in 0..values.len() {
            groups
                .accumulator_mut(ids[row % 3])
                .insert_or_increment(&view, row)
                .unwrap();
        }

        let after = groups.memory_size();
        assert!(after > before);
        assert!(groups.touched.is_empty());

        let measured: usize = groups.accumulators.iter().map(DistinctCounts::memory_size).sum();
        assert_eq!(groups.accumulator_bytes, measured);
        assert_eq!(groups.memory_size(), after);
    }

    #[test]
    fn test_for_each_group_visits_once() {
        let mut groups = GroupTable::try_new(&[DataType::Int64], value_codec(), 0).unwrap();
        let keys: ArrayRef = Arc::new(Int64Array::from(vec![3, 1, 3, 2, 1]));
        let values = Int64Array::from(vec![10, 20, 30, 40, 50]);
        let codec = value_codec();
        let view = codec.view(&values).unwrap();

        let ids = groups.resolve(&[keys], 5).unwrap();
        for (row, &group) in ids.iter().enumerate() {
            groups
                .accumulator_mut(group)
                .insert_or_increment(&view, row)
                .unwrap();
        }

        let mut seen = Vec::new();
        groups
            .for_each_group(|group, acc| {
                seen.push((group, acc.len()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, 2), (1, 2), (2, 1)]);

        let key_arrays = groups.group_key_arrays().unwrap();
        assert_eq!(
            key_arrays[0].as_primitive::<Int64Type>().values().to_vec(),
            vec![3, 1, 2]
        );
    }

    #[test]
    fn test_key_column_count_checked() {
        let mut groups = GroupTable::try_new(&[DataType::Int64], value_codec(), 0).unwrap();
        let err = groups.resolve(&[], 1).unwrap_err();
        assert!(matches!(err, HistogramError::InvalidArgument(_)));
    }
}
