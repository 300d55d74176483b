//! Pooled byte buffers for request and response bodies.
//!
//! A [`BufferPool`] hands out [`PooledBuffer`] guards. A guard returns its
//! buffer to the pool when dropped, so release happens exactly once on every
//! exit path, unwinding included.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use parking_lot::Mutex;

/// Initial capacity of a freshly allocated buffer.
const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;
/// Idle buffers kept for reuse; extra returns are dropped.
const DEFAULT_MAX_IDLE: usize = 256;
/// Buffers that grew beyond this are freed instead of pooled.
const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

struct Inner {
    idle: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_idle: usize,
    max_retained_capacity: usize,
}

/// A shared free-list of [`BytesMut`] buffers.
///
/// Cloning is cheap; clones share the same free-list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE, DEFAULT_MAX_RETAINED_CAPACITY)
    }

    pub fn with_limits(buffer_capacity: usize, max_idle: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::new()),
                buffer_capacity,
                max_idle,
                max_retained_capacity,
            }),
        }
    }

    /// Process-wide pool used when a round trip is built without one.
    pub fn global() -> &'static BufferPool {
        static GLOBAL: OnceLock<BufferPool> = OnceLock::new();
        GLOBAL.get_or_init(BufferPool::new)
    }

    /// Takes an empty buffer from the pool, allocating if none is idle.
    pub fn checkout(&self) -> PooledBuffer {
        let buf = self
            .inner
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));
        PooledBuffer { buf: Some(buf), pool: Arc::clone(&self.inner) }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool").field("idle", &self.idle()).finish()
    }
}

impl Inner {
    fn give_back(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained_capacity {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to [`BytesMut`]. Returned to its pool on drop.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<Inner>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        // Only `Drop` takes the buffer out.
        self.buf.as_ref().unwrap_or_else(|| unreachable!("pooled buffer used after release"))
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().unwrap_or_else(|| unreachable!("pooled buffer used after release"))
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.len()).finish()
    }
}
