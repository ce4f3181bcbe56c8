//! Memory accounting for aggregation state

use crate::error::{HistogramError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Byte budget shared by every aggregator that reserves from it
#[derive(Debug)]
pub struct MemoryPool {
    /// Maximum bytes allowed
    max_memory: usize,
    /// Bytes currently reserved
    used: AtomicUsize,
}

/// Shared memory pool
pub type SharedMemoryPool = Arc<MemoryPool>;

impl MemoryPool {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            used: AtomicUsize::new(0),
        }
    }

    /// Create a pool with no limit
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Empty reservation that grows with `try_resize`
    pub fn reservation(self: &Arc<Self>) -> MemoryReservation {
        MemoryReservation {
            pool: Arc::clone(self),
            size: 0,
        }
    }

    /// Current memory usage
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Maximum memory
    pub fn max(&self) -> usize {
        self.max_memory
    }

    fn try_grow(&self, size: usize) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let new_usage = match current.checked_add(size) {
                Some(n) if n <= self.max_memory => n,
                _ => return false,
            };

            match self.used.compare_exchange_weak(
                current,
                new_usage,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::SeqCst);
    }
}

/// RAII guard for a reservation; returns its bytes to the pool on drop
#[derive(Debug)]
pub struct MemoryReservation {
    pool: SharedMemoryPool,
    size: usize,
}

impl MemoryReservation {
    /// Size of this reservation
    pub fn size(&self) -> usize {
        self.size
    }

    /// Resize the reservation, failing if growth would exceed the pool limit.
    /// On failure the reservation keeps its previous size.
    pub fn try_resize(&mut self, new_size: usize) -> Result<()> {
        if new_size > self.size {
            let diff = new_size - self.size;
            if !self.pool.try_grow(diff) {
                warn!(
                    requested = diff,
                    used = self.pool.used(),
                    limit = self.pool.max(),
                    "memory reservation refused"
                );
                return Err(HistogramError::ResourceExhausted(format!(
                    "cannot grow reservation by {} bytes: {} of {} bytes in use",
                    diff,
                    self.pool.used(),
                    self.pool.max()
                )));
            }
        } else {
            self.pool.release(self.size - new_size);
        }
        self.size = new_size;
        Ok(())
    }

    /// Return every reserved byte to the pool
    pub fn free(&mut self) {
        self.pool.release(self.size);
        self.size = 0;
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.pool.release(self.size);
    }
}

/// Create a shared memory pool, unbounded when no limit is given
pub fn create_memory_pool(max_memory: Option<usize>) -> SharedMemoryPool {
    match max_memory {
        Some(limit) => Arc::new(MemoryPool::new(limit)),
        None => Arc::new(MemoryPool::unbounded()),
    }
}
