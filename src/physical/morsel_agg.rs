//! Morsel-driven parallel histogram aggregation
//!
//! Each worker drains morsels from a shared source into its own partial
//! [`HistogramAggregator`]; no state is shared while accumulating. The
//! partial outputs are then merged into one final aggregator. Because
//! merging is additive, the result does not depend on how rows were split
//! between workers or the order partials are merged in.

use crate::error::{HistogramError, Result};
use crate::execution::{HistogramConfig, SharedMemoryPool};
use crate::physical::histogram::HistogramAggregator;
use crate::physical::morsel::MorselSource;
use arrow::datatypes::{FieldRef, SchemaRef};
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// Histogram of `value_column` grouped by `group_by`, computed in parallel
pub fn execute_parallel_histogram<S>(
    source: &S,
    value_column: &str,
    group_by: &[&str],
    config: &HistogramConfig,
    pool: SharedMemoryPool,
) -> Result<RecordBatch>
where
    S: MorselSource + ?Sized,
{
    let start = Instant::now();
    let schema = source.schema();
    let (value_idx, value_field) = resolve_column(&schema, value_column)?;
    let (group_idx, group_fields): (Vec<usize>, Vec<FieldRef>) = group_by
        .iter()
        .map(|name| resolve_column(&schema, name))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();

    let num_workers = config.target_partitions.max(1);

    let partials: Vec<Result<Option<RecordBatch>>> = (0..num_workers)
        .into_par_iter()
        .map(|worker| {
            let mut agg = HistogramAggregator::try_new_with_pool(
                value_field.clone(),
                group_fields.clone(),
                config.clone(),
                pool.clone(),
            )?;

            let mut morsels = 0usize;
            while let Some(morsel) = source.next_morsel()? {
                for batch in &morsel.batches {
                    agg.add_record_batch(batch, value_idx, &group_idx)?;
                }
                morsels += 1;
            }

            debug!(worker, morsels, groups = agg.num_groups(), "worker drained source");
            if morsels == 0 {
                return Ok(None);
            }
            agg.extract_partial().map(Some)
        })
        .collect();

    let mut final_agg =
        HistogramAggregator::try_new_with_pool(value_field, group_fields, config.clone(), pool)?;
    let mut merged = 0usize;
    for partial in partials {
        if let Some(batch) = partial? {
            final_agg.merge_partial_batch(&batch)?;
            merged += 1;
        }
    }

    let output = final_agg.extract_final()?;
    info!(
        workers = num_workers,
        partials = merged,
        groups = output.num_rows(),
        elapsed = ?start.elapsed(),
        "parallel histogram complete"
    );
    Ok(output)
}

fn resolve_column(schema: &SchemaRef, name: &str) -> Result<(usize, FieldRef)> {
    let idx = schema
        .index_of(name)
        .map_err(|_| HistogramError::InvalidArgument(format!("column not found: {}", name)))?;
    Ok((idx, schema.fields()[idx].clone()))
}
