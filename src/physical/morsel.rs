//! Morsel sources for parallel aggregation
//!
//! A source hands out independent units of work (morsels) from a shared
//! queue. Worker threads pull until the source is drained, each feeding its
//! own partial aggregator.

use crate::error::{HistogramError, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A unit of work: batches that one worker processes together
#[derive(Debug)]
pub struct Morsel {
    pub batches: Vec<RecordBatch>,
    /// Source identifier (file index or batch index)
    pub source_id: usize,
}

impl Morsel {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Shared queue of morsels, safe to drain from many threads
pub trait MorselSource: Send + Sync {
    fn schema(&self) -> SchemaRef;

    /// Next morsel, or `None` once the source is drained
    fn next_morsel(&self) -> Result<Option<Morsel>>;
}

/// In-memory batches, one morsel per batch
#[derive(Debug)]
pub struct MemorySource {
    schema: SchemaRef,
    queue: Mutex<VecDeque<(usize, RecordBatch)>>,
}

impl MemorySource {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        if let Some(batch) = batches.iter().find(|b| b.schema() != schema) {
            return Err(HistogramError::TypeMismatch(format!(
                "batch schema {:?} does not match source schema {:?}",
                batch.schema(),
                schema
            )));
        }
        Ok(Self {
            schema,
            queue: Mutex::new(batches.into_iter().enumerate().collect()),
        })
    }
}

impl MorselSource for MemorySource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_morsel(&self) -> Result<Option<Morsel>> {
        Ok(self.queue.lock().pop_front().map(|(source_id, batch)| Morsel {
            batches: vec![batch],
            source_id,
        }))
    }
}

/// Work unit representing a row group to be read
#[derive(Debug, Clone)]
pub struct RowGroupWork {
    pub file_path: PathBuf,
    pub row_group_idx: usize,
    pub file_idx: usize,
}

/// Parallel morsel source over the row groups of one or more Parquet files
pub struct ParallelParquetSource {
    /// Schema after projection
    schema: SchemaRef,
    /// Root column indices to read
    projection: Option<Vec<usize>>,
    batch_size: usize,
    work_queue: Mutex<VecDeque<RowGroupWork>>,
    completed: AtomicUsize,
    total_row_groups: usize,
}

impl std::fmt::Debug for ParallelParquetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelParquetSource")
            .field("batch_size", &self.batch_size)
            .field("projection", &self.projection)
            .field("total_row_groups", &self.total_row_groups)
            .finish()
    }
}

impl ParallelParquetSource {
    /// Queue every row group of `files`
    pub fn try_new(files: Vec<PathBuf>, schema: SchemaRef, batch_size: usize) -> Result<Self> {
        let mut work_queue = VecDeque::new();

        for (file_idx, file_path) in files.iter().enumerate() {
            let file = File::open(file_path)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
            if builder.schema().fields() != schema.fields() {
                return Err(HistogramError::TypeMismatch(format!(
                    "{} does not share the schema of the first file",
                    file_path.display()
                )));
            }

            for row_group_idx in 0..builder.metadata().num_row_groups() {
                work_queue.push_back(RowGroupWork {
                    file_path: file_path.clone(),
                    row_group_idx,
                    file_idx,
                });
            }
        }

        let total_row_groups = work_queue.len();

        Ok(Self {
            schema,
            projection: None,
            batch_size: batch_size.max(1),
            work_queue: Mutex::new(work_queue),
            completed: AtomicUsize::new(0),
            total_row_groups,
        })
    }

    /// Create from a Parquet file or a directory of Parquet files
    pub fn try_from_path(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            find_parquet_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let Some(first) = files.first() else {
            return Err(HistogramError::InvalidArgument(format!(
                "No Parquet files found: {}",
                path.display()
            )));
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(first)?)?;
        let schema = builder.schema().clone();

        Self::try_new(files, schema, batch_size)
    }

    /// Read only the named top-level columns, in file order
    pub fn with_columns(mut self, names: &[&str]) -> Result<Self> {
        let mut indices = names
            .iter()
            .map(|name| {
                self.schema.index_of(name).map_err(|_| {
                    HistogramError::InvalidArgument(format!("column not found: {}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        indices.sort_unstable();
        indices.dedup();

        self.schema = Arc::new(self.schema.project(&indices)?);
        self.projection = Some(indices);
        Ok(self)
    }

    /// Take the next row group from the queue
    pub fn get_work(&self) -> Option<RowGroupWork> {
        self.work_queue.lock().pop_front()
    }

    /// (completed, total) row groups
    pub fn progress(&self) -> (usize, usize) {
        (self.completed.load(Ordering::SeqCst), self.total_row_groups)
    }

    /// Read a single row group
    pub fn read_row_group(&self, work: &RowGroupWork) -> Result<Vec<RecordBatch>> {
        let file = File::open(&work.file_path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        let builder = if let Some(ref indices) = self.projection {
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices.iter().copied());
            builder.with_projection(mask)
        } else {
            builder
        };

        let reader = builder
            .with_row_groups(vec![work.row_group_idx])
            .with_batch_size(self.batch_size)
            .build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(batches)
    }
}

impl MorselSource for ParallelParquetSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_morsel(&self) -> Result<Option<Morsel>> {
        let Some(work) = self.get_work() else {
            return Ok(None);
        };
        let batches = self.read_row_group(&work)?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        let (completed, total) = self.progress();
        trace!(
            file = %work.file_path.display(),
            row_group = work.row_group_idx,
            completed,
            total,
            "read parquet row group"
        );
        Ok(Some(Morsel {
            batches,
            source_id: work.file_idx,
        }))
    }
}

/// Sorted `.parquet` files directly inside `dir`
fn find_parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
