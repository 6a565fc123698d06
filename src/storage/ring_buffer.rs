use core::cmp;
use managed::ManagedSlice;

use super::{Empty, Full};

/// A ring buffer.
///
/// Elements are enqueued at the back and dequeued from the front, one at a
/// time or by slices. Slice operations wrap around the end of the storage
/// transparently.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a + Copy> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is kept as is; its
    /// contents are irrelevant until enqueued.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    fn get_idx(&self, idx: usize) -> usize {
        let capacity = self.capacity();
        if capacity > 0 {
            (self.read_at + idx) % capacity
        } else {
            0
        }
    }

    /// Enqueue a single element at the back.
    pub fn enqueue_one(&mut self, value: T) -> Result<(), Full> {
        if self.is_full() {
            return Err(Full);
        }
        let index = self.get_idx(self.length);
        self.storage[index] = value;
        self.length += 1;
        Ok(())
    }

    /// Dequeue a single element from the front.
    pub fn dequeue_one(&mut self) -> Result<T, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }
        let value = self.storage[self.read_at];
        self.length -= 1;
        self.read_at = if self.length == 0 { 0 } else { self.get_idx(1) };
        Ok(value)
    }

    /// Return the element at `offset` from the front without removing it.
    pub fn peek_one(&self, offset: usize) -> Option<T> {
        if offset >= self.length {
            return None;
        }
        Some(self.storage[self.get_idx(offset)])
    }

    /// Enqueue as many elements from `data` as fit, and return the amount enqueued.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let size = cmp::min(self.window(), data.len());
        for (i, &value) in data[..size].iter().enumerate() {
            let index = self.get_idx(self.length + i);
            self.storage[index] = value;
        }
        self.length += size;
        size
    }

    /// Dequeue as many elements as fit into `data`, and return the amount dequeued.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let size = self.read_allocated(0, data);
        self.dequeue_allocated(size)
    }

    /// Copy up to `data.len()` elements starting `offset` elements past the
    /// front into `data`, without dequeuing them; return the amount copied.
    pub fn read_allocated(&self, offset: usize, data: &mut [T]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let size = cmp::min(self.length - offset, data.len());
        for (i, slot) in data[..size].iter_mut().enumerate() {
            *slot = self.storage[self.get_idx(offset + i)];
        }
        size
    }

    /// Drop up to `count` elements from the front, and return the amount dropped.
    pub fn dequeue_allocated(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.length);
        self.read_at = self.get_idx(count);
        self.length -= count;
        if self.length == 0 {
            self.read_at = 0;
        }
        count
    }

    /// Drop up to `count` elements from the back, and return the amount dropped.
    pub fn unenqueue(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.length);
        self.length -= count;
        if self.length == 0 {
            self.read_at = 0;
        }
        count
    }
}
