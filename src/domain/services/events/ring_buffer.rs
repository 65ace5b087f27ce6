//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Fixed-capacity FIFO queue holding envelopes between publish and dispatch.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | RingBuffer    | Slot array with a moving head; evicts the oldest item when full           |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                  | Description                               | Return Type             |
// |-----------------------|-------------------------------------------|------------------------|
// | new                   | Creates an empty buffer                   | RingBuffer<T>          |
// | enqueue               | Appends, evicting the head when full      | Option<T>              |
// | drain_all             | Removes every item in FIFO order          | Vec<T>                 |
// | clear                 | Removes every item without returning them | Vec<T>                 |
// | len / is_full / usage | O(1) occupancy queries                    | usize / bool / f64     |
//--------------------------------------------------------------------------------------------------

use std::num::NonZeroUsize;

/// Fixed-capacity FIFO with a drop-oldest overflow policy.
///
/// Invariant: the buffer always holds the most recent `len` accepted items in
/// arrival order. Only the head is ever evicted.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest item
    head: usize,
    len: usize,
    /// Items evicted by overflow since construction (or the last reset)
    dropped: u64,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` items.
    pub fn new(capacity: NonZeroUsize) -> Self {
        let mut slots = Vec::with_capacity(capacity.get());
        slots.resize_with(capacity.get(), || None);
        Self {
            slots,
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Appends an item to the tail.
    ///
    /// The item is always accepted. When the buffer is already full, the oldest
    /// item is evicted to make room, the drop counter is incremented, and the
    /// evicted item is handed back so its storage can be reclaimed.
    ///
    /// # Returns
    /// * `None` - The item was accepted without dropping another
    /// * `Some(T)` - The evicted oldest item
    pub fn enqueue(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();

        if self.len == capacity {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            self.dropped += 1;
            return evicted;
        }

        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(item);
        self.len += 1;
        None
    }

    /// Removes and returns every buffered item, oldest first.
    ///
    /// Items enqueued after this call returns go into the (now empty) buffer and
    /// are never part of the returned batch.
    pub fn drain_all(&mut self) -> Vec<T> {
        let capacity = self.capacity();
        let mut drained = Vec::with_capacity(self.len);

        for offset in 0..self.len {
            let index = (self.head + offset) % capacity;
            if let Some(item) = self.slots[index].take() {
                drained.push(item);
            }
        }

        self.head = 0;
        self.len = 0;
        drained
    }

    /// Discards every buffered item. The drop counter is left untouched.
    pub fn clear(&mut self) -> Vec<T> {
        self.drain_all()
    }

    /// Peeks at the oldest item.
    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fractional occupancy in `[0.0, 1.0]`.
    #[inline]
    pub fn usage(&self) -> f64 {
        self.len as f64 / self.capacity() as f64
    }

    /// Items evicted by overflow.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset_dropped(&mut self) {
        self.dropped = 0;
    }
}
