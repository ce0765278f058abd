//! Sample storage behind the projector lock
//!
//! Staged samples arrive between refits and are folded into the historic
//! dataset on every refit. Row `i` of the projection cache is the embedding
//! of historic-then-staged sample `i`.

use std::sync::Arc;

use driftmap_core::{DriftmapError, LabelCode, Result, SampleId};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

fn check_columns(
    rows: usize,
    ids: &[SampleId],
    timestamps: &[f64],
    labels: &[Option<LabelCode>],
) -> Result<()> {
    if ids.len() != rows || timestamps.len() != rows || labels.len() != rows {
        return Err(DriftmapError::Shape(format!(
            "{} rows with {} ids, {} timestamps and {} labels",
            rows,
            ids.len(),
            timestamps.len(),
            labels.len()
        )));
    }
    Ok(())
}

fn check_width(expected: Option<usize>, actual: usize, what: &str) -> Result<()> {
    match expected {
        Some(width) if width != actual => Err(DriftmapError::Shape(format!(
            "{} has {} columns, got rows with {}",
            what, width, actual
        ))),
        _ => Ok(()),
    }
}

fn relabel(ids: &[SampleId], labels: &mut [Option<LabelCode>], id: SampleId, code: Option<LabelCode>) -> bool {
    // Ids are assigned in increasing order.
    match ids.binary_search(&id) {
        Ok(index) => {
            labels[index] = code;
            true
        }
        Err(_) => false,
    }
}

/// Samples accepted since the last refit
#[derive(Debug, Clone, Default)]
pub struct RecentStagingBuffer {
    features: Option<Array2<f64>>,
    ids: Vec<SampleId>,
    timestamps: Vec<f64>,
    labels: Vec<Option<LabelCode>>,
}

impl RecentStagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn width(&self) -> Option<usize> {
        self.features.as_ref().map(|f| f.ncols())
    }

    pub fn features(&self) -> Option<ArrayView2<'_, f64>> {
        self.features.as_ref().map(|f| f.view())
    }

    pub fn ids(&self) -> &[SampleId] {
        &self.ids
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn labels(&self) -> &[Option<LabelCode>] {
        &self.labels
    }

    pub fn check_width(&self, width: usize) -> Result<()> {
        check_width(self.width(), width, "staging buffer")
    }

    /// Check that `push` would accept these rows.
    pub fn check(
        &self,
        data: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> Result<()> {
        check_columns(data.nrows(), ids, timestamps, labels)?;
        check_width(self.width(), data.ncols(), "staging buffer")
    }

    pub fn push(
        &mut self,
        data: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> Result<()> {
        self.check(data, ids, timestamps, labels)?;
        match self.features.as_mut() {
            Some(features) => features.append(Axis(0), data)?,
            None => self.features = Some(data.to_owned()),
        }
        self.ids.extend_from_slice(ids);
        self.timestamps.extend_from_slice(timestamps);
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    /// Rewrite the label of a staged sample. Returns false if absent.
    pub fn set_label(&mut self, id: SampleId, code: Option<LabelCode>) -> bool {
        relabel(&self.ids, &mut self.labels, id, code)
    }
}

/// Every sample folded into a refit, in arrival order
///
/// Append-only apart from label corrections. The feature matrix sits behind
/// an `Arc` so readers can take a snapshot without copying it.
#[derive(Debug, Clone)]
pub struct HistoricalDataset {
    features: Arc<Array2<f64>>,
    ids: Vec<SampleId>,
    timestamps: Vec<f64>,
    labels: Vec<Option<LabelCode>>,
}

impl Default for HistoricalDataset {
    fn default() -> Self {
        Self {
            features: Arc::new(Array2::zeros((0, 0))),
            ids: Vec::new(),
            timestamps: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl HistoricalDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn width(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.features.ncols())
    }

    pub fn features(&self) -> &Arc<Array2<f64>> {
        &self.features
    }

    pub fn ids(&self) -> &[SampleId] {
        &self.ids
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn labels(&self) -> &[Option<LabelCode>] {
        &self.labels
    }

    /// Reject rows that could never be merged into this history.
    pub fn check_width(&self, width: usize) -> Result<()> {
        check_width(self.width(), width, "historic dataset")
    }

    /// Move every staged sample to the end of the history.
    ///
    /// Returns the number of samples moved. An empty staging buffer leaves
    /// the history untouched; a width mismatch leaves both untouched.
    pub fn merge(&mut self, staging: &mut RecentStagingBuffer) -> Result<usize> {
        if staging.is_empty() {
            return Ok(0);
        }
        if let Some(width) = staging.width() {
            check_width(self.width(), width, "historic dataset")?;
        }

        let staged = std::mem::take(staging);
        let moved = staged.ids.len();
        if let Some(features) = staged.features {
            let merged = if self.is_empty() {
                features
            } else {
                concatenate(Axis(0), &[self.features.view(), features.view()])?
            };
            self.features = Arc::new(merged);
        }
        self.ids.extend(staged.ids);
        self.timestamps.extend(staged.timestamps);
        self.labels.extend(staged.labels);
        Ok(moved)
    }

    /// Rewrite the label of a historic sample. Returns false if absent.
    pub fn set_label(&mut self, id: SampleId, code: Option<LabelCode>) -> bool {
        relabel(&self.ids, &mut self.labels, id, code)
    }
}

/// Embeddings of historic-then-staged samples, by position
#[derive(Debug, Clone, Default)]
pub struct ProjectionCache {
    embedding: Option<Array2<f64>>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.embedding.as_ref().map_or(0, |e| e.nrows())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> Option<usize> {
        self.embedding.as_ref().map(|e| e.ncols())
    }

    pub fn view(&self) -> Option<ArrayView2<'_, f64>> {
        self.embedding.as_ref().map(|e| e.view())
    }

    /// Copy of the first `rows` rows, or of everything if the cache is shorter.
    pub fn prefix(&self, rows: usize) -> Option<Array2<f64>> {
        self.embedding.as_ref().map(|e| {
            let end = rows.min(e.nrows());
            e.slice(s![..end, ..]).to_owned()
        })
    }

    /// Check that `append` would accept these rows.
    pub fn check(&self, rows: ArrayView2<'_, f64>) -> Result<()> {
        check_width(self.width(), rows.ncols(), "projection cache")
    }

    pub fn append(&mut self, rows: ArrayView2<'_, f64>) -> Result<()> {
        self.check(rows)?;
        match self.embedding.as_mut() {
            Some(embedding) => embedding.append(Axis(0), rows)?,
            None => self.embedding = Some(rows.to_owned()),
        }
        Ok(())
    }

    /// Fold a freshly computed embedding of the first `N` samples in.
    ///
    /// A cache no longer than `N` is replaced. A longer one keeps its rows
    /// past `N`, which were appended while the embedding was computed, and
    /// has its first `N` rows overwritten.
    pub fn reconcile(&mut self, fresh: Array2<f64>) -> Result<()> {
        match self.embedding.as_mut() {
            Some(embedding) if embedding.nrows() > fresh.nrows() => {
                if embedding.ncols() != fresh.ncols() {
                    return Err(DriftmapError::Shape(format!(
                        "projection cache has {} columns, new embedding has {}",
                        embedding.ncols(),
                        fresh.ncols()
                    )));
                }
                embedding
                    .slice_mut(s![..fresh.nrows(), ..])
                    .assign(&fresh);
            }
            _ => self.embedding = Some(fresh),
        }
        Ok(())
    }
}
