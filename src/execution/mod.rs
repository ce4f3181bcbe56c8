//! Execution configuration and resource accounting

mod config;
mod memory;

pub use config::*;
pub use memory::*;
