//! Fixed-size byte buffer recycling for file copies.
//!
//! Copying a large file into the archive goes through a single buffer of
//! [`DEFAULT_BUFFER_LEN`] bytes, so memory per copy stays bounded no matter how
//! big the file is. Buffers are kept in a lock-free queue and handed out as
//! [`PooledBuffer`] handles that put the same allocation back on drop, which
//! covers early returns and `?` propagation inside the copy path.
//!
//! The pool grows on demand: an empty queue means a fresh allocation, and a
//! full queue means a released buffer is simply freed.

use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

/// Default buffer size in bytes. Files smaller than this are copied with an
/// exactly sized one-shot buffer instead.
pub const DEFAULT_BUFFER_LEN: usize = 4 * 1024;

/// Default number of idle buffers retained for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 64;

#[derive(Debug)]
struct PoolInner {
    buffer_len: usize,
    free: ArrayQueue<Box<[u8]>>,
}

/// Shared pool of equally sized byte buffers. Cloning is cheap and every clone
/// hands out buffers from the same queue.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool of `buffer_len`-byte buffers keeping at most
    /// `max_retained` idle buffers.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(buffer_len: usize, max_retained: usize) -> Self {
        assert!(buffer_len > 0, "buffer_len must be > 0");
        assert!(max_retained > 0, "max_retained must be > 0");
        Self {
            inner: Arc::new(PoolInner {
                buffer_len,
                free: ArrayQueue::new(max_retained),
            }),
        }
    }

    /// Process-wide pool for hosts that don't manage their own.
    pub fn shared() -> Self {
        static SHARED: OnceLock<BufferPool> = OnceLock::new();
        SHARED.get_or_init(BufferPool::default).clone()
    }

    /// Size of every buffer handed out by this pool.
    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    /// Number of idle buffers waiting for reuse.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    /// Takes a buffer out of the pool, allocating one if none is idle.
    ///
    /// Contents are whatever the previous user left behind.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buffer_len].into_boxed_slice());
        PooledBuffer {
            pool: self.clone(),
            buf: Some(buf),
        }
    }

    /// Returns a buffer for reuse. Buffers of the wrong size, or arriving while
    /// the pool is full, are dropped.
    pub fn release(&self, buf: Box<[u8]>) {
        if buf.len() != self.inner.buffer_len {
            return;
        }
        let _ = self.inner.free.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LEN, DEFAULT_MAX_RETAINED)
    }
}

/// Exclusive handle to a pooled buffer; the buffer goes back to its pool when
/// the handle is dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    pool: BufferPool,
    // Option so Drop can move the box out.
    buf: Option<Box<[u8]>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_has_fixed_length() {
        let pool = BufferPool::new(128, 4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 128);
        assert_eq!(pool.buffer_len(), 128);
    }

    #[test]
    fn test_drop_returns_original_buffer() {
        let pool = BufferPool::new(64, 4);
        let ptr = {
            let buf = pool.acquire();
            buf.as_ptr() as usize
        };
        assert_eq!(pool.available(), 1);

        let again = pool.acquire();
        assert_eq!(again.as_ptr() as usize, ptr);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_on_early_exit() {
        fn failing_copy(pool: &BufferPool) -> std::io::Result<()> {
            let mut buf = pool.acquire();
            buf[0] = 1;
            Err(std::io::Error::other("boom"))
        }

        let pool = BufferPool::new(32, 2);
        assert!(failing_copy(&pool).is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = BufferPool::new(16, 2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_release_rejects_foreign_sizes() {
        let pool = BufferPool::new(16, 2);
        pool.release(vec![0u8; 8].into_boxed_slice());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = BufferPool::new(256, 8);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.acquire();
                        buf.fill(i);
                        assert!(buf.iter().all(|b| *b == i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.available() <= 8);
    }

    #[test]
    fn test_shared_pool_uses_default_len() {
        assert_eq!(BufferPool::shared().buffer_len(), DEFAULT_BUFFER_LEN);
    }
}
