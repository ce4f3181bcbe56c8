//! Histogram aggregation CLI

use clap::Parser;
use histogram_agg::cli::{OutputFormat, OutputFormatter};
use histogram_agg::execution::{create_memory_pool, EntryOrder, HistogramConfig};
use histogram_agg::physical::{execute_parallel_histogram, ParallelParquetSource};
use histogram_agg::Result;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "histogram_agg")]
#[command(about = "Count distinct values of a Parquet column, optionally per group")]
struct Cli {
    /// Path to a Parquet file or a directory of Parquet files
    #[arg(short, long)]
    path: PathBuf,

    /// Column whose distinct values are counted
    #[arg(short, long)]
    value: String,

    /// Comma-separated grouping columns
    #[arg(short, long, value_delimiter = ',')]
    group_by: Vec<String>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    partitions: Option<usize>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sort each histogram by value
    #[arg(long)]
    sorted: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Maximum rows to print
    #[arg(long)]
    max_rows: Option<usize>,
}

fn main() {
    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => HistogramConfig::from_json_file(path)?,
        None => HistogramConfig::default(),
    };
    if let Some(n) = cli.partitions {
        config = config.with_target_partitions(n);
    }
    if cli.sorted {
        config = config.with_entry_order(EntryOrder::Sorted);
    }

    let group_by: Vec<&str> = cli.group_by.iter().map(String::as_str).collect();
    let mut columns = group_by.clone();
    columns.push(cli.value.as_str());

    let start = Instant::now();
    let source =
        ParallelParquetSource::try_from_path(&cli.path, config.batch_size)?.with_columns(&columns)?;
    let pool = create_memory_pool(config.memory_limit);
    let result = execute_parallel_histogram(&source, &cli.value, &group_by, &config, pool)?;
    let elapsed = start.elapsed();

    let mut formatter = OutputFormatter::new(cli.format);
    if let Some(max) = cli.max_rows {
        formatter = formatter.with_max_rows(max);
    }
    formatter.print(std::slice::from_ref(&result))?;
    eprintln!("{} groups in {:?}", result.num_rows(), elapsed);
    Ok(())
}
