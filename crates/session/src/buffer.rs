//! Bounded pre-speech buffer.

use std::collections::VecDeque;

/// Fixed-capacity FIFO that evicts its oldest entry when full.
///
/// Holds the audio that arrives before start-of-speech is confirmed, so the
/// frames the detector needed to confirm it can still be replayed.
#[derive(Debug)]
pub struct FrameBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FrameBuffer<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Capacity covering `window_ms` of frames `frame_ms` long.
    pub fn for_window(window_ms: u32, frame_ms: u32) -> Self {
        Self::new(window_ms.div_ceil(frame_ms.max(1)) as usize)
    }

    /// Append `item`, returning the evicted head when the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove every item, oldest first.
    pub fn drain_oldest_first(&mut self) -> std::collections::vec_deque::Drain<'_, T> {
        self.items.drain(..)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
