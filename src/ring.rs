use crate::frame::FrameData;
use std::collections::VecDeque;

/// Fixed-capacity, oldest-evicting store of recent frames for one camera.
///
/// Unlike a shared buffer this ring is owned exclusively by its detector and
/// only ever touched from the coordinator's single dispatch task, so entries
/// need no locking. Sequence numbers are assigned by the detector and are
/// strictly increasing per camera.
pub struct FrameRing {
    entries: VecDeque<(FrameData, u64)>,
    capacity: usize,
    evictions: u64,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame ring capacity must be greater than 0");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evictions: 0,
        }
    }

    /// Push a frame with its sequence number, evicting the oldest entry
    /// when the ring is full.
    pub fn push(&mut self, frame: FrameData, seq: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evictions += 1;
        }
        self.entries.push_back((frame, seq));
    }

    /// Iterate entries oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &(FrameData, u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
