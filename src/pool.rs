//! Reusable read/write buffers shared between connections.
//!
//! A buffer is checked out by exactly one connection and goes back to the pool when its
//! [`PooledBuf`] guard is dropped, on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Capacity of buffers created by a pool or handed out without one.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Number of idle buffers a pool keeps by default.
pub const DEFAULT_MAX_IDLE: usize = 256;

/// A free list of [`BytesMut`] buffers.
///
/// Share it between dialers and acceptors through an [`Arc`].
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_idle: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl BufferPool {
    /// Creates an empty pool whose buffers start with `buffer_size` bytes of capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            buffer_size,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    /// Caps how many released buffers are kept around. Extra buffers are freed.
    pub fn with_max_idle(self, max_idle: usize) -> Self {
        Self { max_idle, ..self }
    }

    /// Fills the pool with `count` fresh buffers, up to the idle cap.
    pub fn warm(&self, count: usize) {
        if let Ok(mut free) = self.free.lock() {
            let target = count.min(self.max_idle);
            while free.len() < target {
                free.push(BytesMut::with_capacity(self.buffer_size));
            }
        }
    }

    /// Checks out a buffer, reusing an idle one when available.
    pub fn acquire(self: &Arc<Self>) -> PooledBuf {
        let buf = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));

        PooledBuf {
            buf,
            pool: Some(Arc::clone(self)),
        }
    }

    /// Number of buffers currently waiting to be reused.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_idle {
                free.push(buf);
            }
        }
    }
}

/// A buffer owned by one connection, returned to its pool on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: BytesMut,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuf {
    /// A buffer that belongs to no pool and is simply freed on drop.
    pub fn unpooled(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            pool: None,
        }
    }

    pub(crate) fn acquire_from(pool: Option<&Arc<BufferPool>>) -> Self {
        match pool {
            Some(pool) => pool.acquire(),
            None => Self::unpooled(DEFAULT_BUFFER_SIZE),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}
