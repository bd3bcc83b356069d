//! Reference-counted read-only view over a pooled buffer.

use std::ops::{Deref, Range};
use std::sync::Arc;

use super::PooledBuffer;

/// Read-only, cloneable slice of a [`PooledBuffer`].
///
/// Clones and sub-slices share the same allocation. The buffer goes back to
/// its pool when the last view is dropped.
#[derive(Clone)]
pub struct SharedBuffer {
    buffer: Arc<PooledBuffer>,
    range: Range<usize>,
}

impl SharedBuffer {
    pub(super) fn new(buffer: Arc<PooledBuffer>, range: Range<usize>) -> Self {
        Self { buffer, range }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Sub-view relative to this view. Returns `None` when out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Option<SharedBuffer> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        Some(Self {
            buffer: Arc::clone(&self.buffer),
            range: start..end,
        })
    }

    /// Number of live views over the underlying buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }
}

impl Deref for SharedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer.written()[self.range.clone()]
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("range", &self.range)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
