//! Scratch buffers reused across encode calls.
//!
//! - Lock-free: buffers live in a bounded `crossbeam_queue::ArrayQueue`
//! - Scoped: a [`PooledBuf`] goes back to the pool when dropped, on every exit path
//! - Reset on release, so nothing written by one encode is visible to the next

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};

/// Initial capacity of a freshly allocated scratch buffer.
const INITIAL_CAPACITY: usize = 1024;

/// Buffers that grew past this size are dropped instead of pooled.
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Default number of buffers kept around.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct BufferPool {
    queue: ArrayQueue<BytesMut>,
}

impl BufferPool {
    /// Create a pool retaining at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take a buffer from the pool, or allocate one if the pool is empty.
    pub fn acquire(&self) -> PooledBuf<'_> {
        let buf = self
            .queue
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY));

        PooledBuf { buf, pool: self }
    }

    /// Number of idle buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }

        buf.clear();
        // Pool full: let the buffer go.
        let _ = self.queue.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(DEFAULT_POOL_CAPACITY)
    }
}

/// A buffer borrowed from a [`BufferPool`].
pub struct PooledBuf<'a> {
    buf: BytesMut,
    pool: &'a BufferPool,
}

impl Deref for PooledBuf<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
