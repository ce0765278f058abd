use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftmapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported matching scheme: {0}")]
    UnsupportedMatchingScheme(String),

    #[error("Stream interpretation error: {0}")]
    Interpretation(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Loop '{name}' panicked, guards released: {message}")]
    LoopPanicked { name: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DriftmapError>;

impl DriftmapError {
    /// Wrap a model failure as a projection error.
    pub fn projection(err: impl std::fmt::Display) -> Self {
        DriftmapError::Projection(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DriftmapError {
    fn from(err: ndarray::ShapeError) -> Self {
        DriftmapError::Shape(err.to_string())
    }
}

// Collaborator errors:
//
// Projection models and plot sinks live outside this workspace. Anything
// implementing `std::error::Error + Send + Sync + 'static` converts into
// `DriftmapError::Other` through `anyhow`, so implementations can use `?`
// on their own error types:
//
// fn fit_new(&mut self, ...) -> Result<()> {
//     let solver = MySolver::new(&self.params).map_err(anyhow::Error::from)?;
//     ...
// }
