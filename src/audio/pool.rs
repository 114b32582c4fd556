//! Fixed arena of capture buffers
//!
//! All buffers are allocated once when a session starts and are addressed
//! through [`BufferHandle`]s afterwards. A handle cannot be cloned, so
//! whoever holds it (a ring, the capture callback, the network thread) is the
//! only party allowed to touch that buffer's bytes.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// Exclusive ownership token for one buffer of a [`BufferPool`].
#[derive(PartialEq, Eq)]
pub struct BufferHandle {
    pool_id: usize,
    index: usize,
}

impl BufferHandle {
    /// Position of the buffer inside its pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({})", self.index)
    }
}

/// A set of equal-size byte buffers that never grows or shrinks.
pub struct BufferPool {
    id: usize,
    buffers: Box<[UnsafeCell<Box<[u8]>>]>,
    buffer_size: usize,
}

// SAFETY: each buffer is reachable only through its unique, non-Clone
// `BufferHandle`, and the accessors borrow that handle for as long as the
// returned slice lives, so no two threads can alias one buffer.
unsafe impl Sync for BufferPool {}
unsafe impl Send for BufferPool {}

impl BufferPool {
    /// Allocate `count` zeroed buffers of `buffer_size` bytes each.
    ///
    /// Returns the pool together with one handle per buffer, in index order.
    pub fn new(count: usize, buffer_size: usize) -> (Self, Vec<BufferHandle>) {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        let buffers = (0..count)
            .map(|_| UnsafeCell::new(vec![0u8; buffer_size].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let handles = (0..count)
            .map(|index| BufferHandle { pool_id: id, index })
            .collect();

        (
            Self {
                id,
                buffers,
                buffer_size,
            },
            handles,
        )
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size in bytes of every buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Read access to the buffer owned by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another pool.
    pub fn bytes<'a>(&'a self, handle: &'a BufferHandle) -> &'a [u8] {
        self.check(handle);
        // SAFETY: `handle` is the only token for this buffer and it is
        // borrowed for the lifetime of the returned slice.
        unsafe { &*self.buffers[handle.index].get() }
    }

    /// Write access to the buffer owned by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another pool.
    pub fn bytes_mut<'a>(&'a self, handle: &'a mut BufferHandle) -> &'a mut [u8] {
        self.check(handle);
        // SAFETY: `handle` is the only token for this buffer and it is
        // mutably borrowed for the lifetime of the returned slice.
        unsafe { &mut *self.buffers[handle.index].get() }
    }

    fn check(&self, handle: &BufferHandle) {
        assert_eq!(
            handle.pool_id, self.id,
            "buffer handle used with a pool that did not issue it"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocates_fixed_buffers() {
        let (pool, handles) = BufferPool::new(4, 640);

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.buffer_size(), 640);
        assert_eq!(
            handles.iter().map(BufferHandle::index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        for handle in &handles {
            assert_eq!(pool.bytes(handle).len(), 640);
        }
    }

    #[test]
    fn test_buffers_are_independent() {
        let (pool, mut handles) = BufferPool::new(2, 8);

        pool.bytes_mut(&mut handles[0]).fill(0xAA);
        pool.bytes_mut(&mut handles[1])[0] = 0x55;

        assert!(pool.bytes(&handles[0]).iter().all(|&b| b == 0xAA));
        assert_eq!(pool.bytes(&handles[1])[0], 0x55);
        assert_eq!(pool.bytes(&handles[1])[1], 0);
    }

    #[test]
    #[should_panic(expected = "did not issue it")]
    fn test_foreign_handle_is_rejected() {
        let (pool_a, _) = BufferPool::new(1, 4);
        let (_pool_b, handles_b) = BufferPool::new(1, 4);

        let _ = pool_a.bytes(&handles_b[0]);
    }
}
