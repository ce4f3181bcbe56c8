//! Arena of materialized values.
//!
//! A [`KeyStore`] owns copies of every distinct value an accumulator (or a
//! group table column) has seen, in contiguous vectors: fixed-width values
//! in one `Vec`, variable-length bytes in one `Vec<u8>` with offsets, array
//! elements in a child store. Values are addressed by index and never move
//! between stores; everything is freed together when the store drops.

use crate::error::{HistogramError, Result};
use crate::physical::codec::{CodecKind, ColumnView, FixedView, ValueCodec};
use crate::physical::vectorized_hash::{f32_eq, f64_eq};
use arrow::array::{make_array, new_null_array, ArrayData, ArrayRef, BooleanArray};
use arrow::buffer::{Buffer, NullBuffer};
use arrow::datatypes::{ArrowNativeType, DataType};
use std::mem::size_of;
use std::sync::Arc;

#[derive(Debug)]
enum StoreValues {
    Absent,
    Boolean(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int128(Vec<i128>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bytes { offsets: Vec<i64>, data: Vec<u8> },
    List { offsets: Vec<i64>, child: Box<KeyStore> },
}

impl StoreValues {
    fn new(kind: &CodecKind) -> Self {
        match kind {
            CodecKind::Absent => StoreValues::Absent,
            CodecKind::Boolean => StoreValues::Boolean(Vec::new()),
            CodecKind::Int8 => StoreValues::Int8(Vec::new()),
            CodecKind::Int16 => StoreValues::Int16(Vec::new()),
            CodecKind::Int32 => StoreValues::Int32(Vec::new()),
            CodecKind::Int64 => StoreValues::Int64(Vec::new()),
            CodecKind::Int128 => StoreValues::Int128(Vec::new()),
            CodecKind::Float32 => StoreValues::Float32(Vec::new()),
            CodecKind::Float64 => StoreValues::Float64(Vec::new()),
            CodecKind::Utf8 | CodecKind::LargeUtf8 | CodecKind::Binary | CodecKind::LargeBinary => {
                StoreValues::Bytes {
                    offsets: vec![0],
                    data: Vec::new(),
                }
            }
            CodecKind::List(child) | CodecKind::LargeList(child) => StoreValues::List {
                offsets: vec![0],
                child: Box::new(KeyStore::new(child)),
            },
        }
    }
}

/// Owned, append-only column of values of one codec type
#[derive(Debug)]
pub struct KeyStore {
    data_type: DataType,
    values: StoreValues,
    validity: Vec<bool>,
    null_count: usize,
}

impl KeyStore {
    pub fn new(codec: &ValueCodec) -> Self {
        Self {
            data_type: codec.data_type().clone(),
            values: StoreValues::new(codec.kind()),
            validity: Vec::new(),
            null_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Copy the value at `row` of `view` into the store, returning its index
    pub fn push(&mut self, view: &ColumnView<'_>, row: usize) -> Result<usize> {
        let idx = self.len();
        let valid = view.is_valid(row);
        self.validity.try_reserve(1)?;

        match (&mut self.values, view) {
            (StoreValues::Absent, ColumnView::Absent { .. }) => {}
            (StoreValues::Boolean(values), ColumnView::Boolean { values: src, .. }) => {
                values.try_reserve(1)?;
                values.push(valid && src.value(row));
            }
            (StoreValues::Int8(values), ColumnView::Int8(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Int16(values), ColumnView::Int16(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Int32(values), ColumnView::Int32(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Int64(values), ColumnView::Int64(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Int128(values), ColumnView::Int128(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Float32(values), ColumnView::Float32(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (StoreValues::Float64(values), ColumnView::Float64(src)) => {
                push_fixed(values, src, row, valid)?
            }
            (
                StoreValues::Bytes { offsets, data },
                ColumnView::Bytes {
                    offsets: src_offsets,
                    data: src_data,
                    ..
                },
            ) => {
                if valid {
                    let bytes = &src_data[src_offsets.range(row)];
                    data.try_reserve(bytes.len())?;
                    data.extend_from_slice(bytes);
                }
                offsets.try_reserve(1)?;
                offsets.push(data.len() as i64);
            }
            (
                StoreValues::List { offsets, child },
                ColumnView::List {
                    offsets: src_offsets,
                    child: src_child,
                    ..
                },
            ) => {
                if valid {
                    for i in src_offsets.range(row) {
                        child.push(src_child, i)?;
                    }
                }
                offsets.try_reserve(1)?;
                offsets.push(child.len() as i64);
            }
            (_, other) => {
                return Err(HistogramError::TypeMismatch(format!(
                    "cannot store {:?} in a {} key store",
                    other, self.data_type
                )))
            }
        }

        self.validity.push(valid);
        if !valid {
            self.null_count += 1;
        }
        Ok(idx)
    }

    /// Null-aware equality of stored value `idx` with `row` of `view`.
    /// Two nulls are equal; floats compare on bits with all NaNs equal.
    pub fn matches(&self, idx: usize, view: &ColumnView<'_>, row: usize) -> bool {
        let stored_valid = self.validity[idx];
        let valid = view.is_valid(row);
        if !stored_valid || !valid {
            return stored_valid == valid;
        }

        match (&self.values, view) {
            (StoreValues::Boolean(v), ColumnView::Boolean { values, .. }) => {
                v[idx] == values.value(row)
            }
            (StoreValues::Int8(v), ColumnView::Int8(src)) => v[idx] == src.values[row],
            (StoreValues::Int16(v), ColumnView::Int16(src)) => v[idx] == src.values[row],
            (StoreValues::Int32(v), ColumnView::Int32(src)) => v[idx] == src.values[row],
            (StoreValues::Int64(v), ColumnView::Int64(src)) => v[idx] == src.values[row],
            (StoreValues::Int128(v), ColumnView::Int128(src)) => v[idx] == src.values[row],
            (StoreValues::Float32(v), ColumnView::Float32(src)) => f32_eq(v[idx], src.values[row]),
            (StoreValues::Float64(v), ColumnView::Float64(src)) => f64_eq(v[idx], src.values[row]),
            (
                StoreValues::Bytes { offsets, data },
                ColumnView::Bytes {
                    offsets: src_offsets,
                    data: src_data,
                    ..
                },
            ) => {
                let stored = &data[offsets[idx] as usize..offsets[idx + 1] as usize];
                stored == &src_data[src_offsets.range(row)]
            }
            (
                StoreValues::List { offsets, child },
                ColumnView::List {
                    offsets: src_offsets,
                    child: src_child,
                    ..
                },
            ) => {
                let start = offsets[idx] as usize;
                let end = offsets[idx + 1] as usize;
                let range = src_offsets.range(row);
                end - start == range.len()
                    && range
                        .enumerate()
                        .all(|(k, i)| child.matches(start + k, src_child, i))
            }
            _ => false,
        }
    }

    /// Build an Arrow array of every stored value, in insertion order
    pub fn finish(&self) -> Result<ArrayRef> {
        let len = self.len();
        let nulls = (self.null_count > 0).then(|| NullBuffer::from(self.validity.clone()));
        let builder = ArrayData::builder(self.data_type.clone())
            .len(len)
            .nulls(nulls);

        let data = match &self.values {
            StoreValues::Absent => return Ok(new_null_array(&self.data_type, len)),
            StoreValues::Boolean(values) => {
                let array: BooleanArray = values
                    .iter()
                    .zip(&self.validity)
                    .map(|(v, valid)| valid.then_some(*v))
                    .collect();
                return Ok(Arc::new(array));
            }
            StoreValues::Int8(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Int16(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Int32(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Int64(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Int128(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Float32(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Float64(v) => builder.add_buffer(Buffer::from_slice_ref(v)),
            StoreValues::Bytes { offsets, data } => builder
                .add_buffer(self.offsets_buffer(offsets)?)
                .add_buffer(Buffer::from_slice_ref(data)),
            StoreValues::List { offsets, child } => builder
                .add_buffer(self.offsets_buffer(offsets)?)
                .child_data(vec![child.finish()?.to_data()]),
        };

        Ok(make_array(data.build()?))
    }

    fn offsets_buffer(&self, offsets: &[i64]) -> Result<Buffer> {
        match self.data_type {
            DataType::LargeUtf8 | DataType::LargeBinary | DataType::LargeList(_) => {
                Ok(Buffer::from_slice_ref(offsets))
            }
            _ => {
                let small = offsets
                    .iter()
                    .map(|&o| i32::try_from(o))
                    .collect::<std::result::Result<Vec<i32>, _>>()
                    .map_err(|_| {
                        HistogramError::Execution(format!(
                            "{} key store exceeds 32-bit offsets",
                            self.data_type
                        ))
                    })?;
                Ok(Buffer::from_vec(small))
            }
        }
    }

    /// Approximate heap bytes held by the store
    pub fn memory_size(&self) -> usize {
        let values = match &self.values {
            StoreValues::Absent => 0,
            StoreValues::Boolean(v) => v.capacity(),
            StoreValues::Int8(v) => vec_bytes(v),
            StoreValues::Int16(v) => vec_bytes(v),
            StoreValues::Int32(v) => vec_bytes(v),
            StoreValues::Int64(v) => vec_bytes(v),
            StoreValues::Int128(v) => vec_bytes(v),
            StoreValues::Float32(v) => vec_bytes(v),
            StoreValues::Float64(v) => vec_bytes(v),
            StoreValues::Bytes { offsets, data } => vec_bytes(offsets) + data.capacity(),
            StoreValues::List { offsets, child } => vec_bytes(offsets) + child.memory_size(),
        };
        values + self.validity.capacity()
    }
}

fn push_fixed<T: ArrowNativeType>(
    values: &mut Vec<T>,
    src: &FixedView<'_, T>,
    row: usize,
    valid: bool,
) -> Result<()> {
    values.try_reserve(1)?;
    values.push(if valid { src.values[row] } else { T::default() });
    Ok(())
}

fn vec_bytes<T>(v: &Vec<T>) -> usize {
    v.capacity() * size_of::<T>()
}
