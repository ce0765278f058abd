//! # Driftmap Stream
//!
//! Reads a feature stream and an optional auxiliary (label) stream from
//! ring buffers and aligns them into ordered `(features, timestamp, label)`
//! rows.
//!
//! The pipeline for one read cycle:
//! - `StreamSource::fill` pulls new samples into each ring buffer
//! - the unread window of each buffer is copied out, unwrapping the ring
//! - `StreamInterpreter` strips the id column and resolves labels
//! - `StreamMatcher` pairs feature rows with auxiliary rows
//! - both cursors advance by the highest consumed index + 1
//!
//! ## Example
//!
//! ```rust,no_run
//! use driftmap_core::StreamSettings;
//! use driftmap_stream::{DualStreamReader, RingBufferSource};
//!
//! # fn main() -> driftmap_core::Result<()> {
//! let settings = StreamSettings::new("eeg").without_labels();
//! let source = RingBufferSource::new("eeg", 256, 8);
//! let inlet = source.inlet();
//! let mut reader = DualStreamReader::new(settings, source, None::<RingBufferSource>)?;
//!
//! inlet.push(vec![0.0; 8], 0.01)?;
//! if let Some(batch) = reader.read()? {
//!     println!("read {} rows", batch.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod interpreter;
pub mod matcher;
pub mod reader;
pub mod source;

pub use interpreter::{InterpretedChunk, StreamInterpreter, StreamRole};
pub use matcher::{MatchedBatch, StreamMatcher};
pub use reader::{DualStreamReader, ReadBatch};
pub use source::{RingBufferSource, SourceInlet};
