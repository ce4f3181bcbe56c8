//! Command-line support
//!
//! Output formats for printing histogram results (table, JSON, vertical).

mod output;

pub use output::{OutputFormat, OutputFormatter};
