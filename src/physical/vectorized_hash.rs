//! Hash primitives and batch-level hashing of group keys.
//!
//! Floating point values hash and compare on canonical bits: every NaN
//! payload folds to one bucket, while `+0.0` and `-0.0` stay distinct.

use crate::physical::codec::ColumnView;
use xxhash_rust::xxh3::xxh3_64;

/// Seed for multi-column row hashes
const ROW_HASH_SEED: u64 = 0x517cc1b727220a95;

/// Hash given to null values, at any nesting depth
pub const NULL_HASH: u64 = 0x2d35_8dcc_aa6c_78a5;

/// Compute hash values for all rows across multiple key columns.
/// Processes column-at-a-time; null components still contribute.
pub fn hash_rows(key_views: &[ColumnView<'_>], num_rows: usize) -> Vec<u64> {
    let mut hashes = vec![ROW_HASH_SEED; num_rows];

    for view in key_views {
        for (row, hash) in hashes.iter_mut().enumerate() {
            *hash = combine_hash(*hash, view.hash(row));
        }
    }

    hashes
}

/// Fibonacci hashing: multiply by the golden ratio and add
#[inline(always)]
pub fn combine_hash(seed: u64, value: u64) -> u64 {
    seed.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(value)
}

#[inline(always)]
pub fn hash_u64(value: u64) -> u64 {
    xxh3_64(&value.to_le_bytes())
}

#[inline(always)]
pub fn hash_bytes(data: &[u8]) -> u64 {
    xxh3_64(data)
}

#[inline]
pub fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

#[inline]
pub fn canonical_f32_bits(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Bit-identical, or both NaN
#[inline]
pub fn f64_eq(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

#[inline]
pub fn f32_eq(a: f32, b: f32) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}
