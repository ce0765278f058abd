//! Projector: online incremental projection
//!
//! Accepts samples as they arrive, embeds them with the serving model, and
//! periodically refits a second model on everything seen so far.
//!
//! Key features:
//! - Two model instances: "current" serves projections, "latest" is refit
//! - One lock domain over staged samples, historic samples and cached
//!   embeddings; model fits and projections run outside it
//! - Promotion re-embeds the full history and reconciles the cache without
//!   losing rows appended concurrently
//! - Label corrections through the same lock domain

pub mod dataset;
pub mod labels;
pub mod linear;
pub mod projector;

pub use dataset::{HistoricalDataset, ProjectionCache, RecentStagingBuffer};
pub use labels::LabelMap;
pub use linear::LinearProjection;
pub use projector::{Projector, RefitOutcome};
