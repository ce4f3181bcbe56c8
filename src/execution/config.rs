//! Aggregation configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default rows per batch when reading morsels
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Order of the entries inside each emitted map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    /// Order in which each value was first seen by the group
    #[default]
    Insertion,
    /// Ascending by value, using Arrow row ordering
    Sorted,
}

/// What a group whose values were all null emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyGroupOutput {
    #[default]
    EmptyMap,
    Null,
}

/// Configuration for a histogram aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// Byte limit for aggregation state; unlimited when unset
    pub memory_limit: Option<usize>,
    pub entry_order: EntryOrder,
    pub empty_group: EmptyGroupOutput,
    /// Distinct values pre-sized into each new group's accumulator
    pub initial_capacity: usize,
    /// Worker count for parallel execution
    pub target_partitions: usize,
    /// Rows per batch when reading Parquet row groups
    pub batch_size: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            entry_order: EntryOrder::default(),
            empty_group: EmptyGroupOutput::default(),
            initial_capacity: 0,
            target_partitions: rayon::current_num_threads(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl HistogramConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_entry_order(mut self, order: EntryOrder) -> Self {
        self.entry_order = order;
        self
    }

    pub fn with_empty_group(mut self, output: EmptyGroupOutput) -> Self {
        self.empty_group = output;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_target_partitions(mut self, n: usize) -> Self {
        self.target_partitions = n.max(1);
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HistogramConfig::default();
        assert_eq!(config.memory_limit, None);
        assert_eq!(config.entry_order, EntryOrder::Insertion);
        assert_eq!(config.empty_group, EmptyGroupOutput::EmptyMap);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.target_partitions >= 1);
    }

    #[test]
    fn test_partial_json() {
        let config =
            HistogramConfig::from_json_str(r#"{"entry_order": "sorted", "memory_limit": 4096}"#)
                .unwrap();
        assert_eq!(config.entry_order, EntryOrder::Sorted);
        assert_eq!(config.memory_limit, Some(4096));
        assert_eq!(config.empty_group, EmptyGroupOutput::EmptyMap);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"empty_group": "null", "target_partitions": 3}}"#).unwrap();

        let config = HistogramConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.empty_group, EmptyGroupOutput::Null);
        assert_eq!(config.target_partitions, 3);
    }

    #[test]
    fn test_bad_json() {
        assert!(HistogramConfig::from_json_str(r#"{"entry_order": "random"}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let config = HistogramConfig::default()
            .with_memory_limit(1 << 20)
            .with_target_partitions(0)
            .with_initial_capacity(16);
        assert_eq!(config.memory_limit, Some(1 << 20));
        assert_eq!(config.target_partitions, 1);
        assert_eq!(config.initial_capacity, 16);
    }
}
