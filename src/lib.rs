//! Distinct-value histogram aggregation over Arrow record batches
//!
//! For each group (or the whole input when ungrouped) the aggregate builds a
//! map from every distinct non-null value to the number of times it
//! occurred. Aggregation runs in partial and final phases, so independent
//! aggregators can split the input and merge their states afterwards.

pub mod cli;
pub mod error;
pub mod execution;
pub mod physical;
pub mod types;

// Re-export main types
pub use error::{HistogramError, Result};
pub use execution::{EmptyGroupOutput, EntryOrder, HistogramConfig, MemoryPool};
pub use physical::{
    execute_parallel_histogram, AggregatorState, DistinctCounts, GroupTable, HistogramAggregator,
    MemorySource, MorselSource, ParallelParquetSource, ValueCodec,
};
pub use types::ZonedTimestamp;
