pub mod plot;
pub mod projection;
pub mod source;

pub use plot::PlotSink;
pub use projection::ProjectionModel;
pub use source::StreamSource;
