//! Per-thread scratch buffers
//!
//! Senders encode into a buffer owned by their thread so that concurrent
//! sends never share scratch space. A buffer is taken out of the pool for
//! the duration of one use and put back afterwards, so a nested use on the
//! same thread simply gets a fresh buffer.

use crate::buffer::Buffer;
use dashmap::DashMap;
use std::thread::{self, ThreadId};

/// Default capacity of a new scratch buffer
pub const DEFAULT_SCRATCH_CAPACITY: usize = 1024;

pub struct BufferPool {
    buffers: DashMap<ThreadId, Buffer>,
    initial_capacity: usize,
}

impl BufferPool {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            initial_capacity,
        }
    }

    /// Take the calling thread's buffer, reset, or allocate a new one
    pub fn take(&self) -> Buffer {
        match self.buffers.remove(&thread::current().id()) {
            Some((_, mut buffer)) if !buffer.is_freed() => {
                buffer.reset();
                buffer
            }
            _ => Buffer::allocate(self.initial_capacity),
        }
    }

    /// Return a buffer to the calling thread's slot
    pub fn restore(&self, buffer: Buffer) {
        if let Some(mut previous) = self.buffers.insert(thread::current().id(), buffer) {
            previous.free();
        }
    }

    /// Run `f` with the calling thread's scratch buffer
    pub fn with<R>(&self, f: impl FnOnce(&mut Buffer) -> R) -> R {
        let mut buffer = self.take();
        let result = f(&mut buffer);
        self.restore(buffer);
        result
    }

    /// Number of pooled buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Free and forget every pooled buffer
    pub fn clear(&self) {
        let mut freed = 0usize;
        self.buffers.retain(|_, buffer| {
            buffer.free();
            freed += 1;
            false
        });
        tracing::trace!("Freed {} pooled buffer(s)", freed);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_buffer_is_reused_and_reset() {
        let pool = BufferPool::new(8);
        pool.with(|buf| {
            buf.write_bytes(&[0u8; 100]).unwrap();
        });
        assert_eq!(pool.len(), 1);

        pool.with(|buf| {
            assert_eq!(buf.write_index(), 0);
            assert!(buf.capacity() >= 100);
        });
    }

    #[test]
    fn test_nested_use_gets_distinct_buffer() {
        let pool = BufferPool::default();
        pool.with(|outer| {
            outer.write_u8(1).unwrap();
            pool.with(|inner| {
                assert_eq!(inner.write_index(), 0);
            });
            assert_eq!(outer.write_index(), 1);
        });
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_one_buffer_per_thread() {
        let pool = Arc::new(BufferPool::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.with(|buf| buf.write_u32(7).unwrap()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), 4);

        pool.clear();
        assert!(pool.is_empty());
    }
}
