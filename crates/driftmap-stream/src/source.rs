//! In-process ring-buffered stream source
//!
//! Producers push rows through a cloneable [`SourceInlet`] from any thread.
//! The owning reader drains the inlet into the ring on `fill`, so producers
//! never contend with the reader's copy of the unread window. The inlet
//! holds at most one ring's worth of rows; older rows are dropped first.

use std::collections::VecDeque;
use std::sync::Arc;

use driftmap_core::{DriftmapError, Result, RingBufferCursor, StreamSource};
use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;
use tracing::warn;

/// Rows waiting for the next `fill`, bounded by the ring capacity
#[derive(Debug)]
struct PendingQueue {
    rows: VecDeque<(Vec<f64>, f64)>,
    capacity: usize,
    dropped: usize,
}

impl PendingQueue {
    fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    fn push(&mut self, row: Vec<f64>, timestamp: f64) {
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
            self.dropped += 1;
        }
        self.rows.push_back((row, timestamp));
    }

    /// Take the queued rows and the count of rows dropped since last time.
    fn drain(&mut self) -> (VecDeque<(Vec<f64>, f64)>, usize) {
        let rows = std::mem::replace(&mut self.rows, VecDeque::with_capacity(self.capacity));
        (rows, std::mem::take(&mut self.dropped))
    }
}

type Pending = Arc<Mutex<PendingQueue>>;

/// Producer handle for a [`RingBufferSource`]
#[derive(Clone, Debug)]
pub struct SourceInlet {
    width: usize,
    pending: Pending,
}

impl SourceInlet {
    /// Queue one row with its timestamp in seconds.
    pub fn push(&self, row: Vec<f64>, timestamp: f64) -> Result<()> {
        if row.len() != self.width {
            return Err(DriftmapError::Shape(format!(
                "expected a row of {} values, got {}",
                self.width,
                row.len()
            )));
        }
        self.pending.lock().push(row, timestamp);
        Ok(())
    }

    /// Queue many rows at once.
    pub fn push_chunk(&self, rows: ArrayView2<'_, f64>, timestamps: &[f64]) -> Result<()> {
        if rows.ncols() != self.width || rows.nrows() != timestamps.len() {
            return Err(DriftmapError::Shape(format!(
                "expected {} columns and one timestamp per row, got {}x{} with {} timestamps",
                self.width,
                rows.nrows(),
                rows.ncols(),
                timestamps.len()
            )));
        }
        let mut pending = self.pending.lock();
        for (row, ts) in rows.rows().into_iter().zip(timestamps) {
            pending.push(row.to_vec(), *ts);
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows queued for the next `fill`.
    pub fn pending(&self) -> usize {
        self.pending.lock().rows.len()
    }
}

/// Fixed-capacity ring buffer fed through a [`SourceInlet`]
#[derive(Debug)]
pub struct RingBufferSource {
    name: String,
    buffer: Array2<f64>,
    timestamps: Vec<f64>,
    cursor: RingBufferCursor,
    pending: Pending,
}

impl RingBufferSource {
    /// Create a source holding `capacity` rows of `width` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(name: impl Into<String>, capacity: usize, width: usize) -> Self {
        Self {
            name: name.into(),
            buffer: Array2::zeros((capacity, width)),
            timestamps: vec![0.0; capacity],
            cursor: RingBufferCursor::new(capacity),
            pending: Arc::new(Mutex::new(PendingQueue::new(capacity))),
        }
    }

    /// Size the ring to hold `seconds` of data at `sampling_rate_hz`.
    pub fn with_buffer_seconds(
        name: impl Into<String>,
        seconds: f64,
        sampling_rate_hz: f64,
        width: usize,
    ) -> Self {
        let capacity = (seconds * sampling_rate_hz).ceil().max(1.0) as usize;
        Self::new(name, capacity, width)
    }

    pub fn inlet(&self) -> SourceInlet {
        SourceInlet {
            width: self.buffer.ncols(),
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn width(&self) -> usize {
        self.buffer.ncols()
    }
}

impl StreamSource for RingBufferSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill(&mut self) -> Result<()> {
        let (drained, dropped) = self.pending.lock().drain();
        if drained.is_empty() {
            return Ok(());
        }

        let capacity = self.cursor.capacity();
        let mut overwritten = dropped;
        for (row, ts) in drained {
            let index = self.cursor.write_index();
            self.buffer
                .row_mut(index)
                .iter_mut()
                .zip(row)
                .for_each(|(slot, value)| *slot = value);
            self.timestamps[index] = ts;
            overwritten += self.cursor.record_write(1);
        }

        if overwritten > 0 {
            warn!(
                stream = %self.name,
                overwritten,
                capacity,
                "Ring buffer overflow, oldest unread samples were dropped"
            );
        }
        Ok(())
    }

    fn buffer(&self) -> ArrayView2<'_, f64> {
        self.buffer.view()
    }

    fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    fn cursor(&self) -> &RingBufferCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut RingBufferCursor {
        &mut self.cursor
    }
}
