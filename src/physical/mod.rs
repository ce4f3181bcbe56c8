//! Physical execution module
//!
//! Value codecs, per-group accumulators and the histogram operator, plus the
//! morsel-driven parallel driver built on top of them.

pub mod accumulator;
pub mod codec;
pub mod group_table;
pub mod histogram;
pub mod key_store;
pub mod morsel;
pub mod morsel_agg;
pub mod vectorized_hash;

pub use accumulator::DistinctCounts;
pub use codec::{CodecKind, ColumnView, ValueCodec};
pub use group_table::{GroupId, GroupTable, GLOBAL_GROUP};
pub use histogram::{AggregatorState, HistogramAggregator};
pub use key_store::KeyStore;
pub use morsel::*;
pub use morsel_agg::*;
