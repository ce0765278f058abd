use crate::cursor::RingBufferCursor;
use crate::error::Result;
use ndarray::ArrayView2;

/// A ring-buffered sample stream
///
/// The source owns the buffer and fills it; readers own the consumption
/// side and move the cursor forward directly through `cursor_mut`. Rows of
/// `buffer()` and entries of `timestamps()` are parallel and both have
/// `cursor().capacity()` entries.
pub trait StreamSource: Send {
    /// Stream name, for logging
    fn name(&self) -> &str;

    /// Pull pending samples into the ring buffer.
    fn fill(&mut self) -> Result<()>;

    /// Raw ring buffer, one row per slot
    fn buffer(&self) -> ArrayView2<'_, f64>;

    /// Timestamp of each slot, in seconds
    fn timestamps(&self) -> &[f64];

    fn cursor(&self) -> &RingBufferCursor;

    fn cursor_mut(&mut self) -> &mut RingBufferCursor;
}
