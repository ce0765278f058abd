use crate::error::Result;
use crate::types::{LabelCode, SampleId};
use ndarray::ArrayView2;

/// Consumer of embeddings, typically a live scatter plot
///
/// Labels are `None` for unclassified samples.
pub trait PlotSink: Send + Sync {
    /// Add newly projected samples.
    fn plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> Result<()>;

    /// Replace every plotted sample after a model promotion.
    fn update_plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> Result<()>;
}
