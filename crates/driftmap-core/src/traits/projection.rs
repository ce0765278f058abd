use crate::error::Result;
use crate::types::LabelCode;
use ndarray::{Array2, ArrayView2};

/// Pluggable embedding algorithm
///
/// The projector keeps two live instances: "current", which serves
/// projections of new samples, and "latest", which is retrained on every
/// refit. Promotion replaces current with a deep copy of latest, hence the
/// `Clone` bound.
///
/// Implementations are selected by configuration name and own their
/// numerics; the projector only relies on the contract below.
pub trait ProjectionModel: Clone + Send + Sync + 'static {
    /// Train a fresh model on `data`.
    ///
    /// * `labels` - one class code per row for supervised fits, `None` for
    ///   unsupervised fits
    /// * `timestamps` - one timestamp per row
    /// * `prior_embedding` - previous embedding of the first rows of `data`,
    ///   supplied when projection alignment is enabled
    fn fit_new(
        &mut self,
        data: ArrayView2<'_, f64>,
        labels: Option<&[LabelCode]>,
        timestamps: Option<&[f64]>,
        prior_embedding: Option<ArrayView2<'_, f64>>,
    ) -> Result<()>;

    /// Fold unlabeled rows into the already fitted model.
    ///
    /// Only reached through hybrid training. Implementations without
    /// incremental training return `DriftmapError::Projection`.
    fn fit_update(&mut self, data: ArrayView2<'_, f64>, timestamps: Option<&[f64]>) -> Result<()>;

    /// Embed `data`, one output row per input row.
    ///
    /// `existing_data` is the historic dataset the model was fitted against,
    /// for methods that embed relative to it.
    fn project(
        &self,
        data: ArrayView2<'_, f64>,
        existing_data: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>>;
}
