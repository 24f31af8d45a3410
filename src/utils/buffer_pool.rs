//! # Buffer Pool
//!
//! Object pool for the fixed-size receive/send buffers used on the frame
//! hot path, bounding allocation while the pipeline is busy.
//!
//! A session owns two independent pools (inbound and outbound), each
//! configured with one buffer capacity. A buffer leased from a pool returns
//! to it automatically when the lease is dropped, but only when its
//! allocation size still equals the pool's configured capacity; a buffer
//! that was heap-allocated for an oversized frame carries a different
//! allocation size and is simply freed. Double-release cannot happen: the
//! lease is an owned value and drops exactly once.
//!
//! ## Usage
//! ```rust
//! use chatwire::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(16, 512);
//! let mut lease = pool.acquire();
//! lease.extend_from_slice(b"payload");
//! // Returned to the pool on drop.
//! ```

use std::sync::{Arc, Mutex};

/// Default capacity of a pooled receive buffer. Frames above this size are
/// rare on this protocol; they fall back to one-off allocations.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

/// Default number of pre-allocated buffers per pool.
pub const DEFAULT_POOL_SIZE: usize = 32;

/// A pooled buffer lease that returns its storage to the pool when dropped.
///
/// Handlers that retain frame bytes past their own scope call
/// [`PooledBuf::into_inner`], which takes the storage out of pool ownership
/// for good.
pub struct PooledBuf {
    buffer: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    pooled_capacity: usize,
}

impl PooledBuf {
    /// The underlying bytes, consuming the lease. The storage escapes pool
    /// ownership and is never returned.
    pub fn into_inner(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Whether this lease still carries a pool-sized allocation and will be
    /// returned on drop.
    pub fn is_pool_sized(&self) -> bool {
        self.buffer.capacity() == self.pooled_capacity
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        // Only allocations of exactly the pool's capacity go back; anything
        // else was a one-off for an oversized frame.
        if self.buffer.capacity() == self.pooled_capacity {
            self.buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buffer.len())
            .field("pool_sized", &self.is_pool_sized())
            .finish()
    }
}

/// Thread-safe pool of fixed-capacity byte buffers.
pub struct BufferPool {
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Create a pool holding `pool_size` pre-allocated buffers of
    /// `buffer_capacity` bytes each.
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let mut pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            pool.push(Vec::with_capacity(buffer_capacity));
        }

        Self {
            pool: Arc::new(Mutex::new(pool)),
            buffer_capacity,
        }
    }

    /// Acquire an empty pool-sized buffer, allocating fresh if the pool is
    /// exhausted. Growth is bounded by how many leases are live at once.
    pub fn acquire(&self) -> PooledBuf {
        let buffer = if let Ok(mut pool) = self.pool.lock() {
            pool.pop()
                .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
        } else {
            Vec::with_capacity(self.buffer_capacity)
        };

        PooledBuf {
            buffer,
            pool: self.pool.clone(),
            pooled_capacity: self.buffer_capacity,
        }
    }

    /// Lease for a payload of `len` bytes: pool-sized when it fits, a
    /// one-off allocation (never returned to the pool) when it does not.
    pub fn acquire_for(&self, len: usize) -> PooledBuf {
        if len <= self.buffer_capacity {
            self.acquire()
        } else {
            PooledBuf {
                buffer: Vec::with_capacity(len),
                pool: self.pool.clone(),
                pooled_capacity: self.buffer_capacity,
            }
        }
    }

    /// The configured capacity of each pooled buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Current number of idle buffers in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            buffer_capacity: self.buffer_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_return() {
        let pool = BufferPool::new(4, 128);
        assert_eq!(pool.available(), 4);

        let mut buf = pool.acquire();
        assert_eq!(pool.available(), 3);

        buf.push(42);
        assert_eq!(buf[0], 42);

        drop(buf);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_returned_buffer_is_cleared() {
        let pool = BufferPool::new(1, 64);

        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"test");
        }

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 4);
    }

    #[test]
    fn test_exhausted_pool_allocates() {
        let pool = BufferPool::new(1, 64);
        let _a = pool.acquire();
        let _b = pool.acquire();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_oversized_lease_never_pooled() {
        let pool = BufferPool::new(1, 64);
        // Drain the single pooled buffer so the count is unambiguous.
        let held = pool.acquire();
        assert_eq!(pool.available(), 0);

        {
            let big = pool.acquire_for(1000);
            assert!(!big.is_pool_sized());
        }
        assert_eq!(pool.available(), 0);

        drop(held);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_into_inner_escapes_pool_ownership() {
        let pool = BufferPool::new(1, 64);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"kept");
        let bytes = buf.into_inner();
        assert_eq!(&bytes, b"kept");
        // The storage left pool ownership for good.
        assert_eq!(pool.available(), 0);
    }
}
