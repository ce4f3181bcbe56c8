//! Histogram aggregate operator
//!
//! Computes, per group, a map from each distinct non-null value to the
//! number of times it occurred. Execution has three phases: raw batches are
//! accumulated with [`HistogramAggregator::add_batch`], intermediate maps
//! from other instances are folded in with
//! [`HistogramAggregator::merge_partial`], and
//! [`HistogramAggregator::extract_final`] emits one row per group.

use crate::error::{HistogramError, Result};
use crate::execution::{
    create_memory_pool, EmptyGroupOutput, EntryOrder, HistogramConfig, MemoryReservation,
    SharedMemoryPool,
};
use crate::physical::codec::{decode_dictionary, decoded_type, ValueCodec};
use crate::physical::group_table::GroupTable;
use crate::types::{histogram_data_type, histogram_field, map_entries_field, sql_type_name};
use arrow::array::{
    new_empty_array, new_null_array, Array, ArrayRef, AsArray, Int64Array, MapArray, StructArray,
    UInt32Array,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::compute::{concat, take};
use arrow::datatypes::{DataType, Field, FieldRef, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle of a [`HistogramAggregator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Created,
    Accumulating,
    Finalized,
    /// An accumulate or merge failed; partial results were discarded
    Failed,
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregatorState::Created => "created",
            AggregatorState::Accumulating => "accumulating",
            AggregatorState::Finalized => "finalized",
            AggregatorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Distinct-value histogram aggregation over one value column
#[derive(Debug)]
pub struct HistogramAggregator {
    value_field: FieldRef,
    group_fields: Vec<FieldRef>,
    codec: Arc<ValueCodec>,
    /// `None` once finalized or failed
    groups: Option<GroupTable>,
    config: HistogramConfig,
    state: AggregatorState,
    reservation: MemoryReservation,
    schema: SchemaRef,
}

impl HistogramAggregator {
    /// Create an aggregator with its own memory pool sized by `config.memory_limit`
    pub fn try_new(
        value_field: FieldRef,
        group_fields: Vec<FieldRef>,
        config: HistogramConfig,
    ) -> Result<Self> {
        let pool = create_memory_pool(config.memory_limit);
        Self::try_new_with_pool(value_field, group_fields, config, pool)
    }

    /// Create an aggregator that reserves its state from a shared pool
    pub fn try_new_with_pool(
        value_field: FieldRef,
        group_fields: Vec<FieldRef>,
        config: HistogramConfig,
        pool: SharedMemoryPool,
    ) -> Result<Self> {
        let codec = Arc::new(ValueCodec::try_new(value_field.data_type())?);
        let key_types: Vec<DataType> = group_fields
            .iter()
            .map(|f| f.data_type().clone())
            .collect();
        let groups = GroupTable::try_new(&key_types, codec.clone(), config.initial_capacity)?;

        debug!(
            value_type = %sql_type_name(&value_field),
            group_columns = group_fields.len(),
            "created histogram aggregator"
        );

        // Output carries decoded values, never dictionary encoding
        let value_field = Arc::new(
            value_field
                .as_ref()
                .clone()
                .with_data_type(codec.data_type().clone()),
        );
        let mut fields: Vec<Field> = group_fields
            .iter()
            .map(|f| {
                Field::new(f.name(), decoded_type(f.data_type()), true)
                    .with_metadata(f.metadata().clone())
            })
            .collect();
        fields.push(histogram_field(&value_field));
        let schema = Arc::new(Schema::new(fields));

        let mut aggregator = Self {
            value_field,
            group_fields,
            codec,
            groups: Some(groups),
            config,
            state: AggregatorState::Created,
            reservation: pool.reservation(),
            schema,
        };
        aggregator.update_reservation()?;
        Ok(aggregator)
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Output schema: group key columns followed by the `histogram` map.
    /// Partial and final output share it.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.as_ref().map_or(0, GroupTable::num_groups)
    }

    /// Bytes currently reserved for aggregation state
    pub fn memory_used(&self) -> usize {
        self.reservation.size()
    }

    /// Accumulate one batch of values and their group keys.
    /// Rows with a null value still create their group. Dictionary-encoded
    /// columns are decoded before accumulation.
    pub fn add_batch(&mut self, values: &ArrayRef, group_keys: &[ArrayRef]) -> Result<()> {
        self.check_active("add_batch")?;
        self.state = AggregatorState::Accumulating;
        let result = self.accumulate(values, group_keys);
        self.settle(result)
    }

    /// Accumulate columns of `batch` selected by index
    pub fn add_record_batch(
        &mut self,
        batch: &RecordBatch,
        value_column: usize,
        group_columns: &[usize],
    ) -> Result<()> {
        let column = |idx: usize| {
            if idx < batch.num_columns() {
                Ok(batch.column(idx).clone())
            } else {
                Err(HistogramError::InvalidArgument(format!(
                    "column index {} out of bounds for batch with {} columns",
                    idx,
                    batch.num_columns()
                )))
            }
        };
        let values = column(value_column)?;
        let keys = group_columns
            .iter()
            .map(|&idx| column(idx))
            .collect::<Result<Vec<_>>>()?;
        self.add_batch(&values, &keys)
    }

    /// Current state as a mergeable batch, same shape as the final output.
    /// Does not change the aggregator's state.
    pub fn extract_partial(&self) -> Result<RecordBatch> {
        self.check_active("extract_partial")?;
        self.build_output(false)
    }

    /// Fold partial histograms into the groups named by `group_keys`.
    /// A null map row contributes nothing but still registers its group.
    pub fn merge_partial(&mut self, group_keys: &[ArrayRef], partial: &ArrayRef) -> Result<()> {
        self.check_active("merge_partial")?;
        self.state = AggregatorState::Accumulating;
        let result = self.merge_states(group_keys, partial);
        self.settle(result)
    }

    /// Merge a batch produced by [`extract_partial`](Self::extract_partial)
    pub fn merge_partial_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let expected = self.group_fields.len() + 1;
        if batch.num_columns() != expected {
            return Err(HistogramError::InvalidArgument(format!(
                "partial batch has {} columns, expected {}",
                batch.num_columns(),
                expected
            )));
        }
        let columns = batch.columns();
        let (keys, partial) = columns.split_at(expected - 1);
        self.merge_partial(keys, &partial[0])
    }

    /// Emit one row per group and finish the aggregation
    pub fn extract_final(&mut self) -> Result<RecordBatch> {
        self.check_active("extract_final")?;
        let result = self.build_output(true);

        let groups = self.groups.take();
        self.reservation.free();
        match result {
            Ok(batch) => {
                self.state = AggregatorState::Finalized;
                debug!(
                    groups = groups.map_or(0, |g| g.num_groups()),
                    rows = batch.num_rows(),
                    "histogram aggregator finalized"
                );
                Ok(batch)
            }
            Err(e) => {
                self.state = AggregatorState::Failed;
                Err(e)
            }
        }
    }

    fn check_active(&self, operation: &str) -> Result<()> {
        match self.state {
            AggregatorState::Created | AggregatorState::Accumulating => Ok(()),
            state => Err(HistogramError::InvalidState(format!(
                "{} called on {} histogram aggregator",
                operation, state
            ))),
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = AggregatorState::Failed;
            self.groups = None;
            self.reservation.free();
        }
        result
    }

    fn groups_mut(&mut self) -> Result<&mut GroupTable> {
        self.groups
            .as_mut()
            .ok_or_else(|| HistogramError::Internal("group table already released".to_string()))
    }

    fn update_reservation(&mut self) -> Result<()> {
        let size = self.groups.as_mut().map_or(0, GroupTable::memory_size);
        self.reservation.try_resize(size)
    }

    fn accumulate(&mut self, values: &ArrayRef, group_keys: &[ArrayRef]) -> Result<()> {
        let num_rows = values.len();
        let values = decode_dictionary(values)?;
        let view = self.codec.view(values.as_ref())?;
        let absent = self.codec.is_absent();
        let groups = self.groups_mut()?;
        let group_ids = groups.resolve(group_keys, num_rows)?;

        if !absent {
            for (row, &group) in group_ids.iter().enumerate() {
                if view.is_valid(row) {
                    groups
                        .accumulator_mut(group)
                        .insert_or_increment(&view, row)?;
                }
            }
        }

        trace!(
            rows = num_rows,
            groups = groups.num_groups(),
            "accumulated histogram batch"
        );
        self.update_reservation()
    }

    fn merge_states(&mut self, group_keys: &[ArrayRef], partial: &ArrayRef) -> Result<()> {
        let map = partial.as_map_opt().ok_or_else(|| {
            HistogramError::TypeMismatch(format!(
                "partial histogram must be a map, got {}",
                partial.data_type()
            ))
        })?;
        if !map.keys().data_type().equals_datatype(self.codec.data_type()) {
            return Err(HistogramError::TypeMismatch(format!(
                "partial histogram keys are {}, expected {}",
                map.keys().data_type(),
                self.codec.data_type()
            )));
        }
        let counts = map.values().as_primitive_opt::<Int64Type>().ok_or_else(|| {
            HistogramError::TypeMismatch(format!(
                "partial histogram counts are {}, expected Int64",
                map.values().data_type()
            ))
        })?;

        let codec = self.codec.clone();
        let groups = self.groups_mut()?;
        let group_ids = groups.resolve(group_keys, map.len())?;

        if !codec.is_absent() {
            let keys = codec.view(map.keys().as_ref())?;
            let offsets = map.value_offsets();
            for (row, &group) in group_ids.iter().enumerate() {
                if map.is_null(row) {
                    continue;
                }
                let acc = groups.accumulator_mut(group);
                for entry in offsets[row] as usize..offsets[row + 1] as usize {
                    if keys.is_null(entry) || counts.is_null(entry) {
                        return Err(HistogramError::InvalidState(format!(
                            "partial histogram row {} has a null key or count",
                            row
                        )));
                    }
                    acc.insert_or_increment_by(&keys, entry, counts.value(entry))?;
                }
            }
        }

        trace!(
            rows = map.len(),
            groups = groups.num_groups(),
            "merged partial histograms"
        );
        self.update_reservation()
    }

    fn build_output(&self, final_output: bool) -> Result<RecordBatch> {
        let groups = self.groups.as_ref().ok_or_else(|| {
            HistogramError::InvalidState("histogram aggregator has no groups".to_string())
        })?;
        let mut columns = groups.group_key_arrays()?;
        columns.push(self.build_histograms(groups, final_output)?);
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    fn build_histograms(&self, groups: &GroupTable, final_output: bool) -> Result<ArrayRef> {
        let num_groups = groups.num_groups();
        if self.codec.is_absent() {
            let map_type = histogram_data_type(&self.value_field);
            return Ok(new_null_array(&map_type, num_groups));
        }

        let null_when_empty = final_output && self.config.empty_group == EmptyGroupOutput::Null;
        let mut key_arrays: Vec<ArrayRef> = Vec::with_capacity(num_groups);
        let mut count_arrays: Vec<ArrayRef> = Vec::with_capacity(num_groups);
        let mut offsets: Vec<i32> = Vec::with_capacity(num_groups + 1);
        let mut validity: Vec<bool> = Vec::with_capacity(num_groups);
        offsets.push(0);
        let mut total = 0usize;

        groups.for_each_group(|_, acc| {
            let (keys, counts) = acc.entries()?;
            let (keys, counts) = match self.config.entry_order {
                EntryOrder::Insertion => (keys, Arc::new(counts) as ArrayRef),
                EntryOrder::Sorted => sort_entries(keys, counts)?,
            };
            total += keys.len();
            offsets.push(i32::try_from(total).map_err(|_| {
                HistogramError::Execution(format!(
                    "histogram output of {} entries exceeds 32-bit map offsets",
                    total
                ))
            })?);
            validity.push(!(null_when_empty && acc.is_empty()));
            key_arrays.push(keys);
            count_arrays.push(counts);
            Ok(())
        })?;

        let keys = concat_or_empty(&key_arrays, self.codec.data_type())?;
        let counts = concat_or_empty(&count_arrays, &DataType::Int64)?;

        let entries_field = map_entries_field(&self.value_field);
        let DataType::Struct(entry_fields) = entries_field.data_type() else {
            return Err(HistogramError::Internal(format!(
                "map entries must be a struct, got {}",
                entries_field.data_type()
            )));
        };
        let entries = StructArray::try_new(entry_fields.clone(), vec![keys, counts], None)?;
        let nulls = validity
            .contains(&false)
            .then(|| NullBuffer::from(validity));

        let map = MapArray::try_new(
            entries_field,
            OffsetBuffer::new(ScalarBuffer::from(offsets)),
            entries,
            nulls,
            false,
        )?;
        Ok(Arc::new(map))
    }
}

impl fmt::Display for HistogramAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group_by: Vec<&str> = self.group_fields.iter().map(|g| g.name().as_str()).collect();
        write!(
            f,
            "HistogramAggregator: histogram({}: {}), group_by=[{}], state={}",
            self.value_field.name(),
            sql_type_name(&self.value_field),
            group_by.join(", "),
            self.state
        )
    }
}

/// Reorder one group's entries ascending by key
fn sort_entries(keys: ArrayRef, counts: Int64Array) -> Result<(ArrayRef, ArrayRef)> {
    let converter = RowConverter::new(vec![SortField::new(keys.data_type().clone())])?;
    let rows = converter.convert_columns(&[keys.clone()])?;
    let mut indices: Vec<u32> = (0..keys.len() as u32).collect();
    indices.sort_unstable_by(|&a, &b| rows.row(a as usize).cmp(&rows.row(b as usize)));
    let indices = UInt32Array::from(indices);
    Ok((
        take(keys.as_ref(), &indices, None)?,
        take(&counts, &indices, None)?,
    ))
}

fn concat_or_empty(arrays: &[ArrayRef], data_type: &DataType) -> Result<ArrayRef> {
    if arrays.is_empty() {
        return Ok(new_empty_array(data_type));
    }
    let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
    Ok(concat(&refs)?)
}
