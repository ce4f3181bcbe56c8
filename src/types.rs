//! Logical value types on top of Arrow storage
//!
//! Most logical types map directly onto an Arrow data type. Two do not:
//! 128-bit integers are carried as `Decimal128(38, 0)`, and timestamps with
//! a time zone are `Int64` columns whose field carries extension metadata.
//! The output of the aggregate is `Map<value, Int64>`.

use arrow::datatypes::{DataType, Field, FieldRef, Fields};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Arrow metadata key naming an extension type
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";

/// Extension name tagging packed timestamp-with-time-zone columns
pub const TIMESTAMP_TZ_EXTENSION: &str = "histogram_agg.timestamp_with_time_zone";

/// Name of the map column in aggregate output
pub const HISTOGRAM_COLUMN: &str = "histogram";

const ZONE_BITS: u32 = 12;
const ZONE_MASK: i64 = (1 << ZONE_BITS) - 1;

/// An instant in UTC milliseconds plus a time zone id, packed into one `i64`.
///
/// The packed value is the identity of the timestamp: the same instant in
/// two zones packs to two different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZonedTimestamp {
    pub millis_utc: i64,
    pub zone_id: u16,
}

impl ZonedTimestamp {
    pub fn new(millis_utc: i64, zone_id: u16) -> Self {
        Self {
            millis_utc,
            zone_id: zone_id & ZONE_MASK as u16,
        }
    }

    pub fn pack(&self) -> i64 {
        (self.millis_utc << ZONE_BITS) | (self.zone_id as i64 & ZONE_MASK)
    }

    pub fn unpack(packed: i64) -> Self {
        Self {
            millis_utc: packed >> ZONE_BITS,
            zone_id: (packed & ZONE_MASK) as u16,
        }
    }

    /// The instant, or `None` if it falls outside chrono's range
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.millis_utc)
    }
}

impl fmt::Display for ZonedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Some(ts) => write!(f, "{} zone={}", ts.to_rfc3339(), self.zone_id),
            None => write!(f, "{}ms zone={}", self.millis_utc, self.zone_id),
        }
    }
}

/// Field for a packed timestamp-with-time-zone column
pub fn timestamp_tz_field(name: &str, nullable: bool) -> Field {
    let metadata = HashMap::from([(
        EXTENSION_NAME_KEY.to_string(),
        TIMESTAMP_TZ_EXTENSION.to_string(),
    )]);
    Field::new(name, DataType::Int64, nullable).with_metadata(metadata)
}

pub fn is_timestamp_tz(field: &Field) -> bool {
    field.data_type() == &DataType::Int64
        && field
            .metadata()
            .get(EXTENSION_NAME_KEY)
            .is_some_and(|name| name == TIMESTAMP_TZ_EXTENSION)
}

/// SQL-style name of a value field's logical type
pub fn sql_type_name(field: &Field) -> String {
    if is_timestamp_tz(field) {
        return "timestamp with time zone".to_string();
    }
    data_type_name(field.data_type())
}

fn data_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "unknown".to_string(),
        DataType::Boolean => "boolean".to_string(),
        DataType::Int8 => "tinyint".to_string(),
        DataType::Int16 => "smallint".to_string(),
        DataType::Int32 => "integer".to_string(),
        DataType::Int64 => "bigint".to_string(),
        DataType::Decimal128(38, 0) => "hugeint".to_string(),
        DataType::Decimal128(p, s) => format!("decimal({}, {})", p, s),
        DataType::Float32 => "real".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "time".to_string(),
        DataType::Timestamp(_, _) => "timestamp".to_string(),
        DataType::Duration(_) => "interval day to second".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 => "varchar".to_string(),
        DataType::Binary | DataType::LargeBinary => "varbinary".to_string(),
        DataType::List(f) | DataType::LargeList(f) => format!("array({})", sql_type_name(f)),
        DataType::Dictionary(_, value) => data_type_name(value),
        other => other.to_string(),
    }
}

/// Struct field of a map entry's key, keeping the value field's metadata
pub fn map_key_field(value_field: &Field) -> FieldRef {
    Arc::new(
        Field::new("keys", value_field.data_type().clone(), false)
            .with_metadata(value_field.metadata().clone()),
    )
}

pub fn map_value_field() -> FieldRef {
    Arc::new(Field::new("values", DataType::Int64, false))
}

/// The `entries` field of `Map<value, Int64>`
pub fn map_entries_field(value_field: &Field) -> FieldRef {
    let fields = Fields::from(vec![map_key_field(value_field), map_value_field()]);
    Arc::new(Field::new("entries", DataType::Struct(fields), false))
}

/// Output type of the aggregate for a value field
pub fn histogram_data_type(value_field: &Field) -> DataType {
    DataType::Map(map_entries_field(value_field), false)
}

pub fn histogram_field(value_field: &Field) -> Field {
    Field::new(HISTOGRAM_COLUMN, histogram_data_type(value_field), true)
}
