//! Value codec: per-type hashing and typed views over Arrow columns.
//!
//! A [`ValueCodec`] is resolved once from the declared value type. For each
//! incoming batch it borrows the column as a [`ColumnView`], a closed set of
//! typed slices, so the per-row hot path never goes through a downcast or a
//! trait object. Materializing and comparing stored values lives in
//! [`KeyStore`](crate::physical::key_store::KeyStore).

use crate::error::{HistogramError, Result};
use crate::physical::vectorized_hash::{
    canonical_f32_bits, canonical_f64_bits, combine_hash, hash_bytes, hash_u64, NULL_HASH,
};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::buffer::{BooleanBuffer, NullBuffer};
use arrow::compute::cast;
use arrow::datatypes::*;
use std::ops::Range;
use std::sync::Arc;

/// `data_type` with dictionary encoding removed, including inside lists
pub fn decoded_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Dictionary(_, value) => decoded_type(value),
        DataType::List(field) => DataType::List(decoded_field(field)),
        DataType::LargeList(field) => DataType::LargeList(decoded_field(field)),
        other => other.clone(),
    }
}

fn decoded_field(field: &FieldRef) -> FieldRef {
    Arc::new(field.as_ref().clone().with_data_type(decoded_type(field.data_type())))
}

/// Decode a dictionary-encoded column into its value type.
/// Columns without dictionary encoding are returned as is.
pub fn decode_dictionary(array: &ArrayRef) -> Result<ArrayRef> {
    let target = decoded_type(array.data_type());
    if &target == array.data_type() {
        return Ok(Arc::clone(array));
    }
    Ok(cast(array.as_ref(), &target)?)
}

/// Physical layout selected for a logical value type
#[derive(Debug, Clone, PartialEq)]
pub enum CodecKind {
    /// The unknown type: every value is null
    Absent,
    Boolean,
    Int8,
    Int16,
    /// `Int32`, `Date32`, `Time32`
    Int32,
    /// `Int64`, `Date64`, `Time64`, `Timestamp`, `Duration`, packed zoned timestamps
    Int64,
    /// `Decimal128`, including 128-bit integers
    Int128,
    Float32,
    Float64,
    Utf8,
    LargeUtf8,
    Binary,
    LargeBinary,
    List(Box<ValueCodec>),
    LargeList(Box<ValueCodec>),
}

/// Equality, hashing and materialization rules for one value type
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCodec {
    data_type: DataType,
    kind: CodecKind,
}

impl ValueCodec {
    /// Resolve the codec for a declared value type. Dictionary-encoded
    /// types resolve to the codec of their values.
    pub fn try_new(data_type: &DataType) -> Result<Self> {
        let data_type = &decoded_type(data_type);
        let kind = match data_type {
            DataType::Null => CodecKind::Absent,
            DataType::Boolean => CodecKind::Boolean,
            DataType::Int8 => CodecKind::Int8,
            DataType::Int16 => CodecKind::Int16,
            DataType::Int32
            | DataType::Date32
            | DataType::Time32(TimeUnit::Second)
            | DataType::Time32(TimeUnit::Millisecond) => CodecKind::Int32,
            DataType::Int64
            | DataType::Date64
            | DataType::Time64(TimeUnit::Microsecond)
            | DataType::Time64(TimeUnit::Nanosecond)
            | DataType::Timestamp(_, _)
            | DataType::Duration(_) => CodecKind::Int64,
            DataType::Decimal128(_, _) => CodecKind::Int128,
            DataType::Float32 => CodecKind::Float32,
            DataType::Float64 => CodecKind::Float64,
            DataType::Utf8 => CodecKind::Utf8,
            DataType::LargeUtf8 => CodecKind::LargeUtf8,
            DataType::Binary => CodecKind::Binary,
            DataType::LargeBinary => CodecKind::LargeBinary,
            DataType::List(field) => CodecKind::List(Box::new(Self::try_new(field.data_type())?)),
            DataType::LargeList(field) => {
                CodecKind::LargeList(Box::new(Self::try_new(field.data_type())?))
            }
            other => {
                return Err(HistogramError::UnsupportedType(format!(
                    "no histogram codec for {}",
                    other
                )))
            }
        };
        Ok(Self {
            data_type: data_type.clone(),
            kind,
        })
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn kind(&self) -> &CodecKind {
        &self.kind
    }

    /// True for the unknown type, whose values are all null
    pub fn is_absent(&self) -> bool {
        matches!(self.kind, CodecKind::Absent)
    }

    /// Borrow a column of this codec's type as typed slices
    pub fn view<'a>(&self, array: &'a dyn Array) -> Result<ColumnView<'a>> {
        if !array.data_type().equals_datatype(&self.data_type) {
            return Err(HistogramError::TypeMismatch(format!(
                "expected column of type {}, got {}",
                self.data_type,
                array.data_type()
            )));
        }

        let view = match &self.kind {
            CodecKind::Absent => Some(ColumnView::Absent { len: array.len() }),
            CodecKind::Boolean => array.as_boolean_opt().map(|a| ColumnView::Boolean {
                values: a.values(),
                nulls: a.nulls(),
            }),
            CodecKind::Int8 => fixed::<Int8Type>(array).map(ColumnView::Int8),
            CodecKind::Int16 => fixed::<Int16Type>(array).map(ColumnView::Int16),
            CodecKind::Int32 => int32_view(array).map(ColumnView::Int32),
            CodecKind::Int64 => int64_view(array).map(ColumnView::Int64),
            CodecKind::Int128 => fixed::<Decimal128Type>(array).map(ColumnView::Int128),
            CodecKind::Float32 => fixed::<Float32Type>(array).map(ColumnView::Float32),
            CodecKind::Float64 => fixed::<Float64Type>(array).map(ColumnView::Float64),
            CodecKind::Utf8 => array.as_string_opt::<i32>().map(|a| ColumnView::Bytes {
                offsets: Offsets::Small(a.value_offsets()),
                data: a.value_data(),
                nulls: a.nulls(),
            }),
            CodecKind::LargeUtf8 => array.as_string_opt::<i64>().map(|a| ColumnView::Bytes {
                offsets: Offsets::Large(a.value_offsets()),
                data: a.value_data(),
                nulls: a.nulls(),
            }),
            CodecKind::Binary => array.as_binary_opt::<i32>().map(|a| ColumnView::Bytes {
                offsets: Offsets::Small(a.value_offsets()),
                data: a.value_data(),
                nulls: a.nulls(),
            }),
            CodecKind::LargeBinary => array.as_binary_opt::<i64>().map(|a| ColumnView::Bytes {
                offsets: Offsets::Large(a.value_offsets()),
                data: a.value_data(),
                nulls: a.nulls(),
            }),
            CodecKind::List(child) => match array.as_list_opt::<i32>() {
                Some(a) => Some(ColumnView::List {
                    offsets: Offsets::Small(a.value_offsets()),
                    child: Box::new(child.view(a.values().as_ref())?),
                    nulls: a.nulls(),
                }),
                None => None,
            },
            CodecKind::LargeList(child) => match array.as_list_opt::<i64>() {
                Some(a) => Some(ColumnView::List {
                    offsets: Offsets::Large(a.value_offsets()),
                    child: Box::new(child.view(a.values().as_ref())?),
                    nulls: a.nulls(),
                }),
                None => None,
            },
        };

        view.ok_or_else(|| {
            HistogramError::Internal(format!(
                "cannot view {} column as {:?}",
                array.data_type(),
                self.kind
            ))
        })
    }
}

fn fixed<T: ArrowPrimitiveType>(array: &dyn Array) -> Option<FixedView<'_, T::Native>> {
    array.as_primitive_opt::<T>().map(|a| FixedView {
        values: a.values(),
        nulls: a.nulls(),
    })
}

fn int32_view(array: &dyn Array) -> Option<FixedView<'_, i32>> {
    match array.data_type() {
        DataType::Int32 => fixed::<Int32Type>(array),
        DataType::Date32 => fixed::<Date32Type>(array),
        DataType::Time32(TimeUnit::Second) => fixed::<Time32SecondType>(array),
        DataType::Time32(TimeUnit::Millisecond) => fixed::<Time32MillisecondType>(array),
        _ => None,
    }
}

fn int64_view(array: &dyn Array) -> Option<FixedView<'_, i64>> {
    match array.data_type() {
        DataType::Int64 => fixed::<Int64Type>(array),
        DataType::Date64 => fixed::<Date64Type>(array),
        DataType::Time64(TimeUnit::Microsecond) => fixed::<Time64MicrosecondType>(array),
        DataType::Time64(TimeUnit::Nanosecond) => fixed::<Time64NanosecondType>(array),
        DataType::Timestamp(TimeUnit::Second, _) => fixed::<TimestampSecondType>(array),
        DataType::Timestamp(TimeUnit::Millisecond, _) => fixed::<TimestampMillisecondType>(array),
        DataType::Timestamp(TimeUnit::Microsecond, _) => fixed::<TimestampMicrosecondType>(array),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => fixed::<TimestampNanosecondType>(array),
        DataType::Duration(TimeUnit::Second) => fixed::<DurationSecondType>(array),
        DataType::Duration(TimeUnit::Millisecond) => fixed::<DurationMillisecondType>(array),
        DataType::Duration(TimeUnit::Microsecond) => fixed::<DurationMicrosecondType>(array),
        DataType::Duration(TimeUnit::Nanosecond) => fixed::<DurationNanosecondType>(array),
        _ => None,
    }
}

/// Fixed-width values with their validity
#[derive(Debug, Clone, Copy)]
pub struct FixedView<'a, T> {
    pub values: &'a [T],
    pub nulls: Option<&'a NullBuffer>,
}

/// Offsets of a variable-length column
#[derive(Debug, Clone, Copy)]
pub enum Offsets<'a> {
    Small(&'a [i32]),
    Large(&'a [i64]),
}

impl Offsets<'_> {
    #[inline]
    pub fn range(&self, row: usize) -> Range<usize> {
        match self {
            Offsets::Small(o) => o[row] as usize..o[row + 1] as usize,
            Offsets::Large(o) => o[row] as usize..o[row + 1] as usize,
        }
    }
}

/// A batch column borrowed as typed slices
#[derive(Debug, Clone)]
pub enum ColumnView<'a> {
    Absent {
        len: usize,
    },
    Boolean {
        values: &'a BooleanBuffer,
        nulls: Option<&'a NullBuffer>,
    },
    Int8(FixedView<'a, i8>),
    Int16(FixedView<'a, i16>),
    Int32(FixedView<'a, i32>),
    Int64(FixedView<'a, i64>),
    Int128(FixedView<'a, i128>),
    Float32(FixedView<'a, f32>),
    Float64(FixedView<'a, f64>),
    /// Strings and byte strings
    Bytes {
        offsets: Offsets<'a>,
        data: &'a [u8],
        nulls: Option<&'a NullBuffer>,
    },
    List {
        offsets: Offsets<'a>,
        child: Box<ColumnView<'a>>,
        nulls: Option<&'a NullBuffer>,
    },
}

impl ColumnView<'_> {
    fn nulls(&self) -> Option<&NullBuffer> {
        match self {
            ColumnView::Absent { .. } => None,
            ColumnView::Boolean { nulls, .. }
            | ColumnView::Bytes { nulls, .. }
            | ColumnView::List { nulls, .. } => *nulls,
            ColumnView::Int8(v) => v.nulls,
            ColumnView::Int16(v) => v.nulls,
            ColumnView::Int32(v) => v.nulls,
            ColumnView::Int64(v) => v.nulls,
            ColumnView::Int128(v) => v.nulls,
            ColumnView::Float32(v) => v.nulls,
            ColumnView::Float64(v) => v.nulls,
        }
    }

    #[inline]
    pub fn is_valid(&self, row: usize) -> bool {
        if let ColumnView::Absent { .. } = self {
            return false;
        }
        self.nulls().map_or(true, |n| n.is_valid(row))
    }

    #[inline]
    pub fn is_null(&self, row: usize) -> bool {
        !self.is_valid(row)
    }

    /// Hash of the value at `row`, consistent with stored-value equality
    pub fn hash(&self, row: usize) -> u64 {
        if self.is_null(row) {
            return NULL_HASH;
        }
        match self {
            ColumnView::Absent { .. } => NULL_HASH,
            ColumnView::Boolean { values, .. } => hash_u64(values.value(row) as u64),
            ColumnView::Int8(v) => hash_u64(v.values[row] as i64 as u64),
            ColumnView::Int16(v) => hash_u64(v.values[row] as i64 as u64),
            ColumnView::Int32(v) => hash_u64(v.values[row] as i64 as u64),
            ColumnView::Int64(v) => hash_u64(v.values[row] as u64),
            ColumnView::Int128(v) => hash_bytes(&v.values[row].to_le_bytes()),
            ColumnView::Float32(v) => hash_u64(canonical_f32_bits(v.values[row]) as u64),
            ColumnView::Float64(v) => hash_u64(canonical_f64_bits(v.values[row])),
            ColumnView::Bytes { offsets, data, .. } => hash_bytes(&data[offsets.range(row)]),
            ColumnView::List { offsets, child, .. } => {
                let range = offsets.range(row);
                let mut hash = hash_u64(range.len() as u64);
                for i in range {
                    hash = combine_hash(hash, child.hash(i));
                }
                hash
            }
        }
    }
}
