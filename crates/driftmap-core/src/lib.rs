//! Driftmap Core: Traits and types for online incremental 2-D projection
//!
//! This crate defines the shared abstractions used by the streaming,
//! projection and supervision crates:
//! - Stream sources: ring-buffered sample providers with an externally
//!   advanced read cursor
//! - Projection models: pluggable embedding algorithms (`fit_new`,
//!   `fit_update`, `project`)
//! - Plot sinks: consumers of incremental and full embedding refreshes
//! - Configuration: serde-backed settings with validation
//!
//! Key features:
//! - Dual-stream alignment: features and labels from independently clocked
//!   streams are matched by sample id or timestamp
//! - Concurrent refit: a high-rate projecting loop and a low-rate refit loop
//!   share one lock domain over the staged, historic and embedded data
//! - Cooperative control: pause/resume/stop flags checked at iteration
//!   boundaries

pub mod config;
pub mod cursor;
pub mod error;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{
    IdColumn, LabelInterpretation, LoopConfig, MatchingScheme, ProjectorConfig, StreamLayout,
    StreamSection, StreamSettings,
};
pub use cursor::RingBufferCursor;
pub use error::{DriftmapError, Result};
pub use traits::{PlotSink, ProjectionModel, StreamSource};
pub use types::{Label, LabelCode, SampleId};
