//! Output formatting for histogram results
//!
//! Supports:
//! - Table: Arrow's pretty-printed ASCII table (default)
//! - JSON: array of row objects, histograms rendered as `{value: count}`
//! - Vertical: one column per line

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde_json::{Map, Number, Value};
use std::io::{self, Write};

/// Output format for histogram results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Vertical,
}

/// Formatter for writing result batches
pub struct OutputFormatter {
    format: OutputFormat,
    max_rows: Option<usize>,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            max_rows: None,
        }
    }

    /// Set maximum rows to display
    pub fn with_max_rows(mut self, max: usize) -> Self {
        self.max_rows = Some(max);
        self
    }

    /// Format record batches and write to stdout
    pub fn print(&self, batches: &[RecordBatch]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        self.write(&mut stdout, batches)
    }

    /// Format record batches and write to the given writer
    pub fn write<W: Write>(&self, writer: &mut W, batches: &[RecordBatch]) -> io::Result<()> {
        let batches = self.limit(batches);
        match self.format {
            OutputFormat::Table => write_table(writer, &batches),
            OutputFormat::Json => write_json(writer, &batches),
            OutputFormat::Vertical => write_vertical(writer, &batches),
        }
    }

    pub fn format_to_string(&self, batches: &[RecordBatch]) -> io::Result<String> {
        let mut buffer = Vec::new();
        self.write(&mut buffer, batches)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// First `max_rows` rows, sliced out of the input batches
    fn limit(&self, batches: &[RecordBatch]) -> Vec<RecordBatch> {
        let Some(mut remaining) = self.max_rows else {
            return batches.to_vec();
        };
        let mut limited = Vec::new();
        for batch in batches {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(batch.num_rows());
            limited.push(batch.slice(0, take));
            remaining -= take;
        }
        limited
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn write_table<W: Write>(writer: &mut W, batches: &[RecordBatch]) -> io::Result<()> {
    if batches.is_empty() {
        return Ok(());
    }
    let display = arrow::util::pretty::pretty_format_batches(batches).map_err(io::Error::other)?;
    writeln!(writer, "{}", display)
}

fn write_json<W: Write>(writer: &mut W, batches: &[RecordBatch]) -> io::Result<()> {
    let options = FormatOptions::default();
    let mut rows = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let mut object = Map::new();
            for (field, column) in schema.fields().iter().zip(batch.columns()) {
                let value = json_value(column, row, &options).map_err(io::Error::other)?;
                object.insert(field.name().clone(), value);
            }
            rows.push(Value::Object(object));
        }
    }
    serde_json::to_writer_pretty(&mut *writer, &rows).map_err(io::Error::other)?;
    writeln!(writer)
}

fn write_vertical<W: Write>(writer: &mut W, batches: &[RecordBatch]) -> io::Result<()> {
    let options = FormatOptions::default().with_null("NULL");
    let mut row_count = 0;
    for batch in batches {
        let schema = batch.schema();
        let width = schema.fields().iter().map(|f| f.name().len()).max().unwrap_or(0);
        let formatters = batch
            .columns()
            .iter()
            .map(|c| ArrayFormatter::try_new(c.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io::Error::other)?;

        for row in 0..batch.num_rows() {
            row_count += 1;
            writeln!(
                writer,
                "*************************** {} ***************************",
                row_count
            )?;
            for (field, formatter) in schema.fields().iter().zip(&formatters) {
                writeln!(
                    writer,
                    "{:>width$}: {}",
                    field.name(),
                    formatter.value(row),
                    width = width
                )?;
            }
        }
    }
    Ok(())
}

fn display_value(
    array: &dyn Array,
    row: usize,
    options: &FormatOptions,
) -> Result<String, ArrowError> {
    Ok(ArrayFormatter::try_new(array, options)?.value(row).to_string())
}

fn json_value(array: &ArrayRef, row: usize, options: &FormatOptions) -> Result<Value, ArrowError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Map(_, _) => {
            let entries = array.as_map().value(row);
            let (keys, counts) = (entries.column(0), entries.column(1));
            let mut object = Map::new();
            for i in 0..entries.len() {
                let key = if keys.is_null(i) {
                    "null".to_string()
                } else {
                    display_value(keys.as_ref(), i, options)?
                };
                object.insert(key, json_value(counts, i, options)?);
            }
            Value::Object(object)
        }
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let text = display_value(array.as_ref(), row, options)?;
            text.parse::<i64>().map(Value::from).unwrap_or(Value::String(text))
        }
        DataType::Float32 | DataType::Float64 => {
            let text = display_value(array.as_ref(), row, options)?;
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text))
        }
        _ => Value::String(display_value(array.as_ref(), row, options)?),
    };
    Ok(value)
}
