//! Property tests for partial/merge equivalence
//!
//! However the input is split into partial aggregations, and in whatever
//! order the partials are merged, the final histograms must equal a naive
//! count over all rows.

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use histogram_agg::{DistinctCounts, HistogramAggregator, HistogramConfig, ValueCodec};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

type Row = (Option<i64>, Option<i64>);
type IntHistograms = BTreeMap<Option<i64>, BTreeMap<i64, i64>>;

/// Identity of a float under histogram equality
const NAN_KEY: u64 = u64::MAX;

fn float_key(value: f64) -> u64 {
    if value.is_nan() {
        NAN_KEY
    } else {
        value.to_bits()
    }
}

fn grouped_aggregator() -> HistogramAggregator {
    HistogramAggregator::try_new(
        Arc::new(Field::new("v", DataType::Int64, true)),
        vec![Arc::new(Field::new("k", DataType::Int64, true))],
        HistogramConfig::default(),
    )
    .unwrap()
}

fn columns(rows: &[Row]) -> (ArrayRef, ArrayRef) {
    let keys = Int64Array::from_iter(rows.iter().map(|r| r.0));
    let values = Int64Array::from_iter(rows.iter().map(|r| r.1));
    (Arc::new(keys), Arc::new(values))
}

fn partial(rows: &[Row]) -> RecordBatch {
    let mut agg = grouped_aggregator();
    let (keys, values) = columns(rows);
    agg.add_batch(&values, &[keys]).unwrap();
    agg.extract_partial().unwrap()
}

/// Split `rows` at the given cut points (clamped, sorted, deduplicated)
fn chunks<'a>(rows: &'a [Row], cuts: &[usize]) -> Vec<&'a [Row]> {
    let mut cuts: Vec<usize> = cuts.iter().map(|&c| c.min(rows.len())).collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(&rows[start..cut]);
        start = cut;
    }
    chunks.push(&rows[start..]);
    chunks
}

fn reference(rows: &[Row]) -> IntHistograms {
    let mut expected = IntHistograms::new();
    for &(key, value) in rows {
        let histogram = expected.entry(key).or_default();
        if let Some(value) = value {
            *histogram.entry(value).or_insert(0) += 1;
        }
    }
    expected
}

fn decode(batch: &RecordBatch) -> IntHistograms {
    let keys = batch.column(0).as_primitive::<Int64Type>();
    let maps = batch.column(1).as_map();
    (0..batch.num_rows())
        .map(|row| {
            let key = (!keys.is_null(row)).then(|| keys.value(row));
            let entries = maps.value(row);
            let values = entries.column(0).as_primitive::<Int64Type>();
            let counts = entries.column(1).as_primitive::<Int64Type>();
            let histogram = values
                .values()
                .iter()
                .copied()
                .zip(counts.values().iter().copied())
                .collect();
            (key, histogram)
        })
        .collect()
}

fn string_counts(values: &[String]) -> DistinctCounts {
    let codec = Arc::new(ValueCodec::try_new(&DataType::Utf8).unwrap());
    let array = StringArray::from_iter_values(values);
    let view = codec.view(&array).unwrap();
    let mut counts = DistinctCounts::new(codec);
    for row in 0..array.len() {
        counts.insert_or_increment(&view, row).unwrap();
    }
    counts
}

fn string_entries(counts: &DistinctCounts) -> BTreeMap<String, i64> {
    let (keys, counts) = counts.entries().unwrap();
    let keys = keys.as_string::<i32>();
    (0..keys.len())
        .map(|i| (keys.value(i).to_string(), counts.value(i)))
        .collect()
}

fn float_histogram(values: &[f64], cut: usize) -> BTreeMap<u64, i64> {
    let field = Arc::new(Field::new("v", DataType::Float64, false));
    let cut = cut.min(values.len());

    let mut partials = Vec::new();
    for part in [&values[..cut], &values[cut..]] {
        let mut agg =
            HistogramAggregator::try_new(field.clone(), vec![], HistogramConfig::default())
                .unwrap();
        let array: ArrayRef = Arc::new(Float64Array::from(part.to_vec()));
        agg.add_batch(&array, &[]).unwrap();
        partials.push(agg.extract_partial().unwrap());
    }

    let mut agg = HistogramAggregator::try_new(field, vec![], HistogramConfig::default()).unwrap();
    for partial in &partials {
        agg.merge_partial_batch(partial).unwrap();
    }
    let batch = agg.extract_final().unwrap();

    let entries = batch.column(0).as_map().value(0);
    let keys = entries.column(0).as_primitive::<Float64Type>();
    let counts = entries.column(1).as_primitive::<Int64Type>();
    let histogram: BTreeMap<u64, i64> = keys
        .values()
        .iter()
        .zip(counts.values().iter())
        .map(|(&k, &c)| (float_key(k), c))
        .collect();
    assert_eq!(histogram.len(), entries.len(), "duplicate float keys");
    histogram
}

fn any_nan() -> impl Strategy<Value = f64> {
    any::<u64>().prop_map(|bits| f64::from_bits(bits | 0x7ff0_0000_0000_0001))
}

fn rows_strategy() -> impl Strategy<Value = Vec<Row>> {
    proptest::collection::vec(
        (
            proptest::option::of(0i64..5),
            proptest::option::weighted(0.8, -20i64..20),
        ),
        0..200,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_split_merge_matches_single_pass(
        rows in rows_strategy(),
        cuts in proptest::collection::vec(0usize..200, 0..4),
    ) {
        let mut single = grouped_aggregator();
        let (keys, values) = columns(&rows);
        single.add_batch(&values, &[keys]).unwrap();
        let single = decode(&single.extract_final().unwrap());

        // First chunk goes in raw, the rest arrive as partials
        let parts = chunks(&rows, &cuts);
        let mut merged = grouped_aggregator();
        let (keys, values) = columns(parts[0]);
        merged.add_batch(&values, &[keys]).unwrap();
        for part in parts[1..].iter().rev() {
            merged.merge_partial_batch(&partial(part)).unwrap();
        }
        let merged = decode(&merged.extract_final().unwrap());

        prop_assert_eq!(&single, &reference(&rows));
        prop_assert_eq!(&merged, &single);
    }

    #[test]
    fn prop_merge_order_is_irrelevant(
        rows in rows_strategy(),
        cuts in proptest::collection::vec(0usize..200, 1..4),
    ) {
        let partials: Vec<RecordBatch> =
            chunks(&rows, &cuts).into_iter().map(partial).collect();

        let mut forward = grouped_aggregator();
        for p in &partials {
            forward.merge_partial_batch(p).unwrap();
        }
        let mut backward = grouped_aggregator();
        for p in partials.iter().rev() {
            backward.merge_partial_batch(p).unwrap();
        }

        let forward = decode(&forward.extract_final().unwrap());
        let backward = decode(&backward.extract_final().unwrap());
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(&forward, &reference(&rows));
    }

    #[test]
    fn prop_counts_sum_to_non_null_rows(rows in rows_strategy()) {
        let mut agg = grouped_aggregator();
        let (keys, values) = columns(&rows);
        agg.add_batch(&values, &[keys]).unwrap();
        let result = decode(&agg.extract_final().unwrap());

        let total: i64 = result.values().flat_map(|h| h.values()).sum();
        let non_null = rows.iter().filter(|r| r.1.is_some()).count() as i64;
        prop_assert_eq!(total, non_null);
        prop_assert!(result.values().flat_map(|h| h.values()).all(|&c| c > 0));
    }

    #[test]
    fn prop_nans_fold_into_one_key(
        values in proptest::collection::vec(
            prop_oneof![any::<f64>(), Just(f64::NAN), any_nan(), Just(0.0), Just(-0.0)],
            0..100,
        ),
        cut in 0usize..100,
    ) {
        let mut expected: BTreeMap<u64, i64> = BTreeMap::new();
        for &v in &values {
            *expected.entry(float_key(v)).or_insert(0) += 1;
        }
        prop_assert_eq!(float_histogram(&values, cut), expected);
    }

    #[test]
    fn prop_accumulator_merge_commutes(
        left in proptest::collection::vec("[a-d]{0,3}", 0..50),
        right in proptest::collection::vec("[a-d]{0,3}", 0..50),
    ) {
        let mut ab = string_counts(&left);
        ab.merge(&string_counts(&right)).unwrap();
        let mut ba = string_counts(&right);
        ba.merge(&string_counts(&left)).unwrap();

        let all: Vec<String> = left.iter().chain(&right).cloned().collect();
        let expected = string_entries(&string_counts(&all));
        prop_assert_eq!(string_entries(&ab), expected.clone());
        prop_assert_eq!(string_entries(&ba), expected);
    }
}
