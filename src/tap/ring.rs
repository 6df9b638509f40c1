//! Fixed-capacity circular frame buffer
//!
//! Slots are allocated once at construction. Inserting into a full ring
//! overwrites the oldest frame, so memory per session stays bounded no
//! matter how long a conversation streams.

/// Default number of frames kept per session.
pub const DEFAULT_CAPACITY: usize = 500;

/// A bounded FIFO ring. Iteration yields items oldest → newest.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest item
    head: usize,
    len: usize,
}

impl<T> FrameRing<T> {
    /// Create a ring holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Append an item, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.slots.len();
        if self.len < capacity {
            let idx = (self.head + self.len) % capacity;
            self.slots[idx] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop every item, keeping the allocation.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Iterate oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }
}

impl<T: Clone> FrameRing<T> {
    /// Snapshot of the ring contents in arrival order.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity() {
        let mut ring = FrameRing::new(4);
        assert!(ring.push(1).is_none());
        assert!(ring.push(2).is_none());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let capacity = 5;
        let mut ring = FrameRing::new(capacity);
        for n in 0..23 {
            ring.push(n);
            assert!(ring.len() <= capacity);
        }
        assert_eq!(ring.len(), capacity);
        assert_eq!(ring.to_vec(), vec![18, 19, 20, 21, 22]);
    }

    #[test]
    fn test_eviction_returns_oldest() {
        let mut ring = FrameRing::new(2);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.push("c"), Some("a"));
        assert_eq!(ring.push("d"), Some("b"));
        assert_eq!(ring.to_vec(), vec!["c", "d"]);
    }

    #[test]
    fn test_no_reallocation() {
        let mut ring = FrameRing::new(8);
        let before = ring.slots.capacity();
        for n in 0..100 {
            ring.push(n);
        }
        assert_eq!(ring.slots.capacity(), before);
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn test_clear() {
        let mut ring = FrameRing::new(3);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(9);
        assert_eq!(ring.to_vec(), vec![9]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = FrameRing::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.to_vec(), vec![2]);
    }
}
