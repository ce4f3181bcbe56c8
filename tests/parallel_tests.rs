//! Parallel histogram aggregation over Parquet files

use arrow::array::*;
use arrow::datatypes::{DataType, Decimal128Type, Field, Int32Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use histogram_agg::execution::create_memory_pool;
use histogram_agg::{
    execute_parallel_histogram, EntryOrder, HistogramAggregator, HistogramConfig,
    HistogramError, MemorySource, MorselSource, ParallelParquetSource,
};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

type Histograms = BTreeMap<Option<String>, BTreeMap<String, i64>>;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, true),
        Field::new("amount", DataType::Int64, true),
        Field::new("price", DataType::Decimal128(12, 2), true),
        Field::new(
            "tags",
            DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
            true,
        ),
    ]))
}

fn sales_batch(offset: usize, rows: usize) -> RecordBatch {
    const REGIONS: [Option<&str>; 4] = [Some("north"), Some("south"), Some("east"), None];
    let row_ids = || offset..offset + rows;

    let region = StringArray::from_iter(row_ids().map(|i| REGIONS[i % REGIONS.len()]));
    let amount = Int64Array::from_iter(
        row_ids().map(|i| (i % 9 != 0).then_some((i % 13) as i64)),
    );
    let price = Decimal128Array::from_iter(
        row_ids().map(|i| (i % 5 != 0).then_some((i % 7) as i128 * 250)),
    )
    .with_precision_and_scale(12, 2)
    .unwrap();
    let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(row_ids().map(|i| {
        match i % 4 {
            0 => None,
            1 => Some(vec![]),
            2 => Some(vec![Some(1), None]),
            _ => Some(vec![Some((i % 3) as i32)]),
        }
    }));

    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(region),
            Arc::new(amount),
            Arc::new(price),
            Arc::new(tags),
        ],
    )
    .unwrap()
}

fn sales_batches() -> Vec<RecordBatch> {
    (0..12).map(|b| sales_batch(b * 250, 250)).collect()
}

fn write_parquet(path: &Path, batches: &[RecordBatch], row_group_size: usize) {
    let file = File::create(path).unwrap();
    let props = WriterProperties::builder()
        .set_max_row_group_size(row_group_size)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema(), Some(props)).unwrap();
    for batch in batches {
        writer.write(batch).unwrap();
    }
    writer.close().unwrap();
}

/// Three files, several row groups each
fn sales_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let batches = sales_batches();
    for (i, files) in batches.chunks(4).enumerate() {
        write_parquet(&dir.path().join(format!("part-{}.parquet", i)), files, 300);
    }
    dir
}

fn render(array: &dyn Array, row: usize) -> String {
    ArrayFormatter::try_new(array, &FormatOptions::default())
        .unwrap()
        .value(row)
        .to_string()
}

fn decode(batch: &RecordBatch) -> Histograms {
    let maps = batch.column(batch.num_columns() - 1).as_map();
    (0..batch.num_rows())
        .map(|row| {
            let group = (batch.num_columns() > 1 && !batch.column(0).is_null(row))
                .then(|| render(batch.column(0).as_ref(), row));
            let entries = maps.value(row);
            let counts = entries.column(1).as_primitive::<Int64Type>();
            let histogram = (0..entries.len())
                .map(|i| (render(entries.column(0).as_ref(), i), counts.value(i)))
                .collect();
            (group, histogram)
        })
        .collect()
}

/// Single aggregator over all batches, no partials
fn serial(value: &str, group_by: &[&str]) -> Histograms {
    let schema = schema();
    let value_idx = schema.index_of(value).unwrap();
    let group_idx: Vec<usize> = group_by.iter().map(|g| schema.index_of(g).unwrap()).collect();
    let mut agg = HistogramAggregator::try_new(
        Arc::new(schema.field(value_idx).clone()),
        group_idx
            .iter()
            .map(|&i| Arc::new(schema.field(i).clone()))
            .collect(),
        HistogramConfig::default(),
    )
    .unwrap();
    for batch in sales_batches() {
        agg.add_record_batch(&batch, value_idx, &group_idx).unwrap();
    }
    decode(&agg.extract_final().unwrap())
}

#[test]
fn test_parquet_grouped_matches_serial() {
    let dir = sales_dir();
    for partitions in [1, 2, 4, 8] {
        let config = HistogramConfig::default()
            .with_target_partitions(partitions)
            .with_batch_size(64);
        let source = ParallelParquetSource::try_from_path(dir.path(), config.batch_size)
            .unwrap()
            .with_columns(&["region", "amount"])
            .unwrap();
        let pool = create_memory_pool(None);
        let result =
            execute_parallel_histogram(&source, "amount", &["region"], &config, pool.clone())
                .unwrap();

        assert_eq!(result.num_rows(), 4);
        assert_eq!(decode(&result), serial("amount", &["region"]));
        assert_eq!(pool.used(), 0, "reservations released");
    }
}

#[test]
fn test_parquet_decimal_and_list_values() {
    let dir = sales_dir();
    let config = HistogramConfig::default().with_target_partitions(3);

    for value in ["price", "tags"] {
        let source = ParallelParquetSource::try_from_path(dir.path(), config.batch_size)
            .unwrap()
            .with_columns(&[value])
            .unwrap();
        let result =
            execute_parallel_histogram(&source, value, &[], &config, create_memory_pool(None))
                .unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(decode(&result), serial(value, &[]));
    }
}

#[test]
fn test_parquet_multiple_group_columns() {
    let dir = sales_dir();
    let config = HistogramConfig::default()
        .with_target_partitions(4)
        .with_entry_order(EntryOrder::Sorted);
    let source = ParallelParquetSource::try_from_path(dir.path(), config.batch_size).unwrap();
    let result = execute_parallel_histogram(
        &source,
        "price",
        &["region", "amount"],
        &config,
        create_memory_pool(None),
    )
    .unwrap();

    // Every histogram comes back sorted by value
    let maps = result.column(2).as_map();
    for row in 0..result.num_rows() {
        let keys = maps.value(row).column(0).as_primitive::<Decimal128Type>().clone();
        let values: Vec<i128> = keys.values().to_vec();
        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(values, sorted);
    }

    // 4 regions (one null) x 13 amounts plus null
    assert_eq!(result.num_rows(), 4 * 14);
}

#[test]
fn test_memory_source_matches_parquet() {
    let dir = sales_dir();
    let config = HistogramConfig::default().with_target_partitions(4);

    let memory = MemorySource::try_new(schema(), sales_batches()).unwrap();
    let pool = create_memory_pool(None);
    let from_memory =
        execute_parallel_histogram(&memory, "tags", &["region"], &config, pool.clone()).unwrap();

    let parquet = ParallelParquetSource::try_from_path(dir.path(), config.batch_size).unwrap();
    assert_eq!(parquet.schema().fields().len(), memory.schema().fields().len());
    let from_parquet =
        execute_parallel_histogram(&parquet, "tags", &["region"], &config, pool).unwrap();

    assert_eq!(decode(&from_memory), decode(&from_parquet));
}

#[test]
fn test_shared_pool_limit() {
    let config = HistogramConfig::default().with_target_partitions(2);
    let source = MemorySource::try_new(schema(), sales_batches()).unwrap();
    let pool = create_memory_pool(Some(64));

    let err = execute_parallel_histogram(&source, "amount", &["region"], &config, pool.clone())
        .unwrap_err();
    assert!(matches!(err, HistogramError::ResourceExhausted(_)));
    assert_eq!(pool.used(), 0);
}

#[test]
fn test_parquet_dictionary_columns() {
    let dict_type = DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8));
    let schema = Arc::new(Schema::new(vec![
        Field::new("city", dict_type.clone(), true),
        Field::new("sku", dict_type, true),
    ]));
    let city: DictionaryArray<Int32Type> = (0..1_000)
        .map(|i| (i % 11 != 0).then_some(["oslo", "lima"][i % 2]))
        .collect();
    let sku: DictionaryArray<Int32Type> = (0..1_000)
        .map(|i| (i % 6 != 0).then_some(["a-1", "b-2", "c-3"][i % 3]))
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(city), Arc::new(sku)]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = File::create(dir.path().join("dict.parquet")).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let config = HistogramConfig::default().with_target_partitions(2);
    let source = ParallelParquetSource::try_from_path(dir.path(), config.batch_size).unwrap();
    let result =
        execute_parallel_histogram(&source, "sku", &["city"], &config, create_memory_pool(None))
            .unwrap();

    assert_eq!(result.schema().field(0).data_type(), &DataType::Utf8);
    let histograms = decode(&result);
    assert_eq!(histograms.len(), 3);
    let total: i64 = histograms.values().flat_map(|h| h.values()).sum();
    assert_eq!(total, (0..1_000).filter(|i| i % 6 != 0).count() as i64);
    // i % 6 != 0 and even means i % 3 is 1 or 2 whenever the city is oslo
    assert!(!histograms[&Some("oslo".to_string())].contains_key("a-1"));
}
