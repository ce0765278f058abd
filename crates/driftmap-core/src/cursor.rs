//! Read-state bookkeeping for a circular sample buffer
//!
//! The buffer itself belongs to a stream source. The cursor records where
//! the oldest unread sample sits and how many unread samples follow it; the
//! source moves it forward when it writes, the reader moves it forward when
//! it consumes.

use std::ops::Range;

/// Per-stream read position over a ring buffer of `capacity` rows
///
/// Invariants: `unread <= capacity` and `position < capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferCursor {
    capacity: usize,
    position: usize,
    unread: usize,
}

impl RingBufferCursor {
    /// Create an empty cursor
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            capacity,
            position: 0,
            unread: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the oldest unread row
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread rows
    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn is_empty(&self) -> bool {
        self.unread == 0
    }

    /// Index the next written row lands on
    pub fn write_index(&self) -> usize {
        (self.position + self.unread) % self.capacity
    }

    /// The unread window `[position, position + unread)` as at most two
    /// contiguous ranges, in read order. The second range is present only
    /// when the window wraps past the end of the buffer.
    pub fn unread_segments(&self) -> (Range<usize>, Option<Range<usize>>) {
        let end = self.position + self.unread;
        if end <= self.capacity {
            (self.position..end, None)
        } else {
            (
                self.position..self.capacity,
                Some(0..end - self.capacity),
            )
        }
    }

    /// Mark `consumed` rows as read.
    ///
    /// `unread' = max(0, unread - consumed)` and
    /// `position' = (position + consumed) mod capacity`.
    pub fn advance(&mut self, consumed: usize) {
        self.unread = self.unread.saturating_sub(consumed);
        self.position = (self.position + consumed % self.capacity) % self.capacity;
    }

    /// Record `written` new rows appended at `write_index()`.
    ///
    /// Rows beyond capacity overwrite the oldest unread rows, which moves the
    /// read position forward. Returns the number of rows overwritten.
    pub fn record_write(&mut self, written: usize) -> usize {
        let total = self.unread + written;
        if total <= self.capacity {
            self.unread = total;
            return 0;
        }
        let overwritten = total - self.capacity;
        self.position = (self.position + overwritten % self.capacity) % self.capacity;
        self.unread = self.capacity;
        overwritten
    }

    /// Overwrite the raw state, clamping it into the invariants.
    pub fn set(&mut self, position: usize, unread: usize) {
        self.position = position % self.capacity;
        self.unread = unread.min(self.capacity);
    }
}
