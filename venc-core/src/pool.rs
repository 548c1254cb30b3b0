//! Pixel buffer pool.
//!
//! The decision core never touches pixel data; it only tracks ownership of
//! opaque buffer handles from acquisition until reclamation. Handles are
//! arena indices, recycled in FIFO order.

use crate::error::{Error, Result};
use crate::picture::PixelBufferHandle;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A pool of pixel buffer handles.
#[derive(Debug)]
pub struct PictureBufferPool {
    /// Recycled handles available for reuse.
    available: VecDeque<PixelBufferHandle>,
    /// Handles currently owned by the pipeline.
    in_flight: HashSet<PixelBufferHandle>,
    /// Next fresh arena index.
    next_index: u64,
    /// Total buffers ever allocated (for statistics).
    total_allocated: usize,
}

impl PictureBufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            available: VecDeque::new(),
            in_flight: HashSet::new(),
            next_index: 0,
            total_allocated: 0,
        }
    }

    /// Acquire a buffer handle.
    ///
    /// Returns a recycled handle if available, otherwise a fresh one.
    pub fn acquire(&mut self) -> PixelBufferHandle {
        let handle = if let Some(handle) = self.available.pop_front() {
            handle
        } else {
            let handle = PixelBufferHandle::new(self.next_index);
            self.next_index += 1;
            self.total_allocated += 1;
            handle
        };
        self.in_flight.insert(handle);
        handle
    }

    /// Return a buffer handle to the pool.
    ///
    /// Releasing a handle the pool did not hand out, or releasing the same
    /// handle twice, is a consistency violation.
    pub fn release(&mut self, handle: PixelBufferHandle) -> Result<()> {
        if !self.in_flight.remove(&handle) {
            return Err(Error::consistency(format!(
                "release of {handle} which is not in flight"
            )));
        }
        self.available.push_back(handle);
        Ok(())
    }

    /// Number of handles currently owned by the pipeline.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of recycled handles ready for reuse.
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Total buffers ever allocated.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }
}

impl Default for PictureBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread-safe picture buffer pool.
#[derive(Debug)]
pub struct SharedPicturePool {
    inner: Arc<Mutex<PictureBufferPool>>,
}

impl SharedPicturePool {
    /// Create a new shared pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PictureBufferPool::new())),
        }
    }

    /// Acquire a buffer handle.
    pub fn acquire(&self) -> PixelBufferHandle {
        self.inner.lock().acquire()
    }

    /// Return a buffer handle to the pool.
    pub fn release(&self, handle: PixelBufferHandle) -> Result<()> {
        self.inner.lock().release(handle)
    }

    /// Number of handles currently owned by the pipeline.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight()
    }

    /// Number of recycled handles ready for reuse.
    pub fn available(&self) -> usize {
        self.inner.lock().available()
    }

    /// Total buffers ever allocated.
    pub fn total_allocated(&self) -> usize {
        self.inner.lock().total_allocated()
    }
}

impl Default for SharedPicturePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SharedPicturePool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_recycles() {
        let mut pool = PictureBufferPool::new();

        let h1 = pool.acquire();
        assert_eq!(pool.total_allocated(), 1);
        assert_eq!(pool.in_flight(), 1);

        pool.release(h1).unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_flight(), 0);

        let h2 = pool.acquire();
        assert_eq!(h2, h1); // Reused
        assert_eq!(pool.total_allocated(), 1);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut pool = PictureBufferPool::new();
        let h = pool.acquire();
        pool.release(h).unwrap();

        let err = pool.release(h).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        // The pool state is unchanged by the rejected call.
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_distinct_handles_in_flight() {
        let mut pool = PictureBufferPool::new();
        let h1 = pool.acquire();
        let h2 = pool.acquire();
        assert_ne!(h1, h2);
        assert_eq!(pool.in_flight(), 2);
    }

    #[test]
    fn test_shared_pool() {
        let pool = SharedPicturePool::new();
        let pool2 = pool.clone();

        let h = pool.acquire();
        assert_eq!(pool2.in_flight(), 1);

        pool2.release(h).unwrap();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.available(), 1);
    }
}
