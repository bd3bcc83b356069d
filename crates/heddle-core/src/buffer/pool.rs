//! Capacity-class buffer pool.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{BufferError, SharedBuffer};

/// Pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Smallest capacity class in bytes. Every class is a power of two at or above this.
    pub min_capacity: usize,

    /// How many free buffers each class keeps; releases beyond this are dropped.
    pub max_retained_per_class: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            min_capacity: 1024,
            max_retained_per_class: 64,
        }
    }
}

impl BufferPoolConfig {
    /// Capacity class that satisfies `min_capacity`.
    ///
    /// Requests above the largest power of two get exactly what they asked for.
    pub fn class_for(&self, min_capacity: usize) -> usize {
        let wanted = min_capacity.max(self.min_capacity).max(1);
        wanted.checked_next_power_of_two().unwrap_or(wanted)
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Buffers freshly allocated.
    pub allocated: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
    /// Buffers returned to the free list.
    pub released: u64,
    /// Buffers dropped on release because their class was full.
    pub discarded: u64,
    /// Buffers currently sitting in the free list.
    pub free: usize,
}

struct PoolInner {
    config: BufferPoolConfig,
    free: Mutex<BTreeMap<usize, Vec<Box<[u8]>>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl PoolInner {
    fn recycle(&self, data: Box<[u8]>) {
        let class = data.len();
        let mut free = self.free.lock();
        let slot = free.entry(class).or_default();
        if slot.len() >= self.config.max_retained_per_class {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(class, "free list full, dropping buffer");
            return;
        }
        slot.push(data);
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Thread-safe pool of reusable byte buffers.
///
/// `Clone` hands out another reference to the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                free: Mutex::new(BTreeMap::new()),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.inner.config
    }

    /// Hand out a buffer with `capacity() >= min_capacity`, cursor spanning the whole buffer.
    ///
    /// The smallest free class that fits is reused. When nothing fits a new buffer
    /// of the requested class is allocated; smaller free buffers stay pooled.
    pub fn acquire(&self, min_capacity: usize) -> PooledBuffer {
        let class = self.inner.config.class_for(min_capacity);

        let reused = {
            let mut free = self.inner.free.lock();
            free.range_mut(class..)
                .find_map(|(_, slot)| slot.pop())
        };

        let data = match reused {
            Some(data) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                trace!(class, "allocating buffer");
                vec![0u8; class].into_boxed_slice()
            }
        };

        PooledBuffer::new(data, Arc::downgrade(&self.inner))
    }

    /// Return a buffer to the free list with its cursor reset (position 0, limit = capacity).
    ///
    /// A buffer handed out by a different pool is not adopted; it goes back to its own pool.
    pub fn release(&self, mut buffer: PooledBuffer) {
        buffer.clear();
        if !buffer.belongs_to(&self.inner) {
            warn!(
                capacity = buffer.capacity(),
                "released buffer belongs to another pool"
            );
        }
        drop(buffer);
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.inner.free.lock().values().map(Vec::len).sum();
        PoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            free,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

/// Exclusively owned buffer with a position/limit cursor.
///
/// Invariant: `position <= limit <= capacity`.
/// Dropping the handle returns the memory to the pool it came from (if the pool still exists).
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    position: usize,
    limit: usize,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    fn new(data: Box<[u8]>, pool: Weak<PoolInner>) -> Self {
        let limit = data.len();
        Self {
            data: Some(data),
            position: 0,
            limit,
            pool,
        }
    }

    fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.data().len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.limit {
            return Err(self.invalid_cursor());
        }
        self.position = position;
        Ok(())
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit > self.capacity() {
            return Err(self.invalid_cursor());
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Switch from writing to reading: limit = position, position = 0.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Cursor spans the full capacity again. Contents are not zeroed.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Bytes written so far (`[0, position)`).
    pub fn written(&self) -> &[u8] {
        &self.data()[..self.position]
    }

    /// Bytes left to read (`[position, limit)`).
    pub fn readable(&self) -> &[u8] {
        &self.data()[self.position..self.limit]
    }

    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                remaining,
            });
        }
        let start = self.position;
        self.data_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), BufferError> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn get_slice(&mut self, len: usize) -> Result<&[u8], BufferError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BufferError::Underflow {
                needed: len,
                remaining,
            });
        }
        let start = self.position;
        self.position += len;
        Ok(&self.data()[start..start + len])
    }

    pub fn get_u32(&mut self) -> Result<u32, BufferError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.get_slice(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn get_u64(&mut self) -> Result<u64, BufferError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.get_slice(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    /// Freeze the written bytes into a reference-counted read-only view.
    pub fn share(self) -> SharedBuffer {
        let len = self.position;
        SharedBuffer::new(Arc::new(self), 0..len)
    }

    fn invalid_cursor(&self) -> BufferError {
        BufferError::InvalidCursor {
            position: self.position,
            limit: self.limit,
            capacity: self.capacity(),
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl io::Write for PooledBuffer {
    /// Short writes once the limit is reached, so `write_all` reports `WriteZero`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        let start = self.position;
        self.data_mut()[start..start + n].copy_from_slice(&buf[..n]);
        self.position += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for PooledBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.readable()[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        // pool が先に破棄されていればそのまま解放
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(data);
        }
    }
}
