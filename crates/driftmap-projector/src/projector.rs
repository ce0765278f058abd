use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use driftmap_core::{
    observe, DriftmapError, Label, LabelCode, PlotSink, ProjectionModel, ProjectorConfig, Result,
    SampleId,
};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dataset::{HistoricalDataset, ProjectionCache, RecentStagingBuffer};
use crate::labels::LabelMap;

/// Result of one `update_model` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefitOutcome {
    /// Fewer historic samples than the configured minimum; nothing was fit
    Skipped { samples: usize },
    /// The latest model was refit on `samples` samples
    Fitted { samples: usize, promoted: bool },
}

/// Everything guarded by the projector lock
#[derive(Debug, Default)]
struct ProjectorState {
    staging: RecentStagingBuffer,
    history: HistoricalDataset,
    cache: ProjectionCache,
}

/// Copy of the historic dataset taken under the lock
struct Snapshot {
    features: Arc<Array2<f64>>,
    ids: Vec<SampleId>,
    timestamps: Vec<f64>,
    labels: Vec<Option<LabelCode>>,
}

impl Snapshot {
    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Embedding of new samples plus any samples the cache was missing
struct Embedded {
    /// Cache length the backlog starts at
    start: usize,
    /// Leading rows of `embedding` that belong to the backlog
    backlog: usize,
    embedding: Array2<f64>,
}

impl ProjectorState {
    fn total(&self) -> usize {
        self.history.len() + self.staging.len()
    }

    /// Rows of another width could never be merged into the history.
    fn check_width(&self, width: usize) -> Result<()> {
        self.history.check_width(width)?;
        self.staging.check_width(width)
    }

    fn check_batch(
        &self,
        data: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> Result<()> {
        self.history.check_width(data.ncols())?;
        self.staging.check(data, ids, timestamps, labels)
    }

    fn merge_staging(&mut self) -> Result<usize> {
        self.history.merge(&mut self.staging)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            features: Arc::clone(self.history.features()),
            ids: self.history.ids().to_vec(),
            timestamps: self.history.timestamps().to_vec(),
            labels: self.history.labels().to_vec(),
        }
    }

    /// Features of samples `start..total`, historic rows first.
    fn rows_from(&self, start: usize) -> Result<Option<Array2<f64>>> {
        if start >= self.total() {
            return Ok(None);
        }
        let historic = self.history.len();
        let mut parts: Vec<ArrayView2<'_, f64>> = Vec::with_capacity(2);
        if start < historic {
            parts.push(self.history.features().slice(s![start.., ..]));
        }
        if let Some(staged) = self.staging.features() {
            parts.push(staged.slice_move(s![start.saturating_sub(historic).., ..]));
        }
        Ok(Some(concatenate(Axis(0), &parts)?))
    }
}

/// Online projector over a pluggable `ProjectionModel`
///
/// Two loops drive it concurrently: a projecting loop calling
/// [`project_new_data`](Self::project_new_data) and a refit loop calling
/// [`update_model`](Self::update_model). Staged samples, historic samples
/// and the projection cache share one lock; model fits and projections run
/// outside it and may see a slightly stale model or history.
///
/// Lock order: `latest`, then the data lock, then `current`.
pub struct Projector<M: ProjectionModel, P: PlotSink> {
    id: String,
    config: ProjectorConfig,
    label_map: LabelMap,
    plot: Arc<P>,
    state: Mutex<ProjectorState>,
    latest: Mutex<M>,
    current: RwLock<Option<Arc<M>>>,
    next_sample_id: AtomicU64,
    update_count: AtomicU64,
    promoted_update: AtomicU64,
}

impl<M: ProjectionModel, P: PlotSink> Projector<M, P> {
    /// Create a projector. `model` becomes the first "latest" instance.
    pub fn new(config: ProjectorConfig, model: M, plot: Arc<P>) -> Result<Self> {
        config.validate()?;
        let id = format!("{}_{}", config.projection_method, Uuid::new_v4());
        info!(projector = %id, "Creating projector");

        Ok(Self {
            id,
            label_map: LabelMap::from_config(&config),
            config,
            plot,
            state: Mutex::new(ProjectorState::default()),
            latest: Mutex::new(model),
            current: RwLock::new(None),
            next_sample_id: AtomicU64::new(1),
            update_count: AtomicU64::new(0),
            promoted_update: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn plot(&self) -> &Arc<P> {
        &self.plot
    }

    /// Number of successful refits
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Refit number the serving model came from, 0 before the first promotion
    pub fn promoted_update(&self) -> u64 {
        self.promoted_update.load(Ordering::SeqCst)
    }

    pub fn has_current_model(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn history_len(&self) -> usize {
        self.lock_state().history.len()
    }

    pub fn staged_len(&self) -> usize {
        self.lock_state().staging.len()
    }

    pub fn cache_len(&self) -> usize {
        self.lock_state().cache.len()
    }

    /// Copy of the projection cache
    pub fn projection_cache(&self) -> Option<Array2<f64>> {
        self.lock_state().cache.view().map(|v| v.to_owned())
    }

    fn lock_state(&self) -> MutexGuard<'_, ProjectorState> {
        let start = Instant::now();
        let guard = self.state.lock();
        observe::record_lock_wait(start.elapsed());
        guard
    }

    // -------------------------------- projecting --------------------------------

    /// Accept new samples.
    ///
    /// When a serving model exists the samples are embedded right away,
    /// outside the lock, and handed to the plot sink. Returns the embedding
    /// of `data`, or `None` if there was no serving model or no data.
    pub fn project_new_data(
        &self,
        data: Array2<f64>,
        timestamps: Vec<f64>,
        labels: Option<Vec<Label>>,
    ) -> Result<Option<Array2<f64>>> {
        let rows = data.nrows();
        if rows == 0 {
            return Ok(None);
        }
        if timestamps.len() != rows {
            return Err(DriftmapError::Shape(format!(
                "{} samples with {} timestamps",
                rows,
                timestamps.len()
            )));
        }
        let codes: Vec<Option<LabelCode>> = match &labels {
            Some(labels) if labels.len() != rows => {
                return Err(DriftmapError::Shape(format!(
                    "{} samples with {} labels",
                    rows,
                    labels.len()
                )))
            }
            Some(labels) => labels.iter().map(|l| self.label_map.resolve(l)).collect(),
            None => vec![None; rows],
        };

        self.lock_state().check_width(data.ncols())?;

        let first = self.next_sample_id.fetch_add(rows as u64, Ordering::SeqCst);
        let ids: Vec<SampleId> = (first..first + rows as u64).collect();

        let current = self.current.read().clone();
        let embedded = match current {
            Some(model) => Some(self.embed_with_backlog(&model, data.view())?),
            None => None,
        };
        let embedding = embedded
            .as_ref()
            .map(|e| e.embedding.slice(s![e.backlog.., ..]).to_owned());

        if let Some(embedding) = &embedding {
            debug!(samples = rows, last_id = first + rows as u64 - 1, "Plotting new projections");
            if let Err(e) = self.plot.plot(embedding.view(), &ids, &timestamps, &codes) {
                warn!(error = %e, "Plot sink rejected new projections");
            }
        }

        {
            let mut state = self.lock_state();
            state.check_batch(data.view(), &ids, &timestamps, &codes)?;
            let total = state.total();
            let extend_cache = match &embedded {
                Some(e) => {
                    state.cache.check(e.embedding.view())?;
                    let aligned = state.cache.len() == e.start && e.start + e.backlog == total;
                    if !aligned {
                        debug!(
                            cache = state.cache.len(),
                            samples = total,
                            "Projection cache moved while embedding, deferring to the next pass"
                        );
                    }
                    aligned
                }
                None => false,
            };

            state.staging.push(data.view(), &ids, &timestamps, &codes)?;
            if let (true, Some(e)) = (extend_cache, &embedded) {
                state.cache.append(e.embedding.view())?;
            }
        }

        observe::record_projection(rows, embedding.is_some());
        Ok(embedding)
    }

    /// Embed `data` together with any samples the cache is missing, so the
    /// cache catches up after a promotion raced with new samples.
    fn embed_with_backlog(&self, model: &M, data: ArrayView2<'_, f64>) -> Result<Embedded> {
        let (existing, start, backlog) = {
            let state = self.lock_state();
            let existing =
                (!state.history.is_empty()).then(|| Arc::clone(state.history.features()));
            let start = state.cache.len();
            (existing, start, state.rows_from(start)?)
        };
        let existing = existing.as_ref().map(|e| e.view());

        let (embedding, backlog) = match backlog {
            Some(backlog) => {
                debug!(samples = backlog.nrows(), "Embedding samples missing from the cache");
                let input = concatenate(Axis(0), &[backlog.view(), data.view()])?;
                (model.project(input.view(), existing)?, backlog.nrows())
            }
            None => (model.project(data, existing)?, 0),
        };

        let expected = backlog + data.nrows();
        if embedding.nrows() != expected {
            return Err(DriftmapError::Shape(format!(
                "model returned {} embeddings for {} samples",
                embedding.nrows(),
                expected
            )));
        }
        Ok(Embedded {
            start,
            backlog,
            embedding,
        })
    }

    // -------------------------------- refitting --------------------------------

    /// Fold staged samples into the history and refit the latest model on it.
    ///
    /// The first successful fit is promoted immediately.
    pub fn update_model(&self) -> Result<RefitOutcome> {
        let started = Instant::now();
        let mut latest = self.latest.lock();

        let (snapshot, prior) = {
            let mut state = self.lock_state();
            let moved = state.merge_staging()?;
            if moved > 0 {
                debug!(moved, historic = state.history.len(), "Merged staged samples");
            }
            let prior = if self.config.align_projections {
                state.cache.prefix(state.history.len()).filter(|p| p.nrows() > 0)
            } else {
                None
            };
            (state.snapshot(), prior)
        };

        let samples = snapshot.len();
        if samples == 0 || samples < self.config.min_training_samples {
            debug!(
                samples,
                min_training_samples = self.config.min_training_samples,
                "Not enough samples to fit a model"
            );
            observe::record_refit(started.elapsed(), samples, "skipped");
            return Ok(RefitOutcome::Skipped { samples });
        }

        let mut batch = samples;
        if let Some(prior) = &prior {
            if samples > prior.nrows() {
                warn!(
                    samples,
                    projections = prior.nrows(),
                    "More samples than projections to align with, truncating the update batch"
                );
                batch = prior.nrows();
            }
        }

        let data = snapshot.features.slice(s![..batch, ..]);
        let labels = &snapshot.labels[..batch];
        let timestamps = &snapshot.timestamps[..batch];
        let hint = prior.as_ref().map(|p| p.view());

        info!(samples = batch, "Fitting new model");
        let mut model = latest.clone();
        if let Err(e) = self.fit(&mut model, data, labels, timestamps, hint) {
            observe::record_refit(started.elapsed(), batch, "fail");
            return Err(e);
        }
        *latest = model;

        let update = self.update_count.fetch_add(1, Ordering::SeqCst) + 1;
        observe::record_refit(started.elapsed(), batch, "fit");
        info!(
            update,
            samples = batch,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fitted new model"
        );

        let promoted = !self.has_current_model();
        if promoted {
            self.activate_with(&latest)?;
        }
        Ok(RefitOutcome::Fitted {
            samples: batch,
            promoted,
        })
    }

    fn fit(
        &self,
        model: &mut M,
        data: ArrayView2<'_, f64>,
        labels: &[Option<LabelCode>],
        timestamps: &[f64],
        prior: Option<ArrayView2<'_, f64>>,
    ) -> Result<()> {
        let labeled = labels.iter().filter(|l| l.is_some()).count();
        let has_unlabeled = labeled < labels.len();

        if self.config.hybrid_training && labeled > 0 && has_unlabeled {
            if labeled >= 2 {
                return fit_hybrid(model, data, labels, timestamps, prior);
            }
            debug!(labeled, "Too few labeled samples for a hybrid fit, fitting unsupervised");
        }

        if has_unlabeled {
            model.fit_new(data, None, Some(timestamps), prior)
        } else {
            let codes: Vec<LabelCode> = labels.iter().flatten().copied().collect();
            model.fit_new(data, Some(&codes), Some(timestamps), prior)
        }
    }

    // -------------------------------- promotion --------------------------------

    /// Promote the latest model: re-embed the full history with it, reconcile
    /// the projection cache and replace the serving model.
    pub fn activate_latest(&self) -> Result<()> {
        if self.update_count() == 0 {
            return Err(DriftmapError::InvalidState(
                "no model has been fitted yet".into(),
            ));
        }
        let latest = self.latest.lock();
        self.activate_with(&latest)
    }

    fn activate_with(&self, model: &M) -> Result<()> {
        let snapshot = {
            let mut state = self.lock_state();
            state.merge_staging()?;
            state.snapshot()
        };

        let embedding = if snapshot.len() == 0 {
            None
        } else {
            let features = snapshot.features.view();
            let embedding = model.project(features, Some(features))?;
            if embedding.nrows() != snapshot.len() {
                return Err(DriftmapError::Shape(format!(
                    "model returned {} embeddings for {} historic samples",
                    embedding.nrows(),
                    snapshot.len()
                )));
            }
            Some(embedding)
        };

        {
            let mut state = self.lock_state();
            if let Some(embedding) = &embedding {
                state.cache.reconcile(embedding.clone())?;
            }
            *self.current.write() = Some(Arc::new(model.clone()));
            self.promoted_update
                .store(self.update_count.load(Ordering::SeqCst), Ordering::SeqCst);
            observe::record_promotion(state.cache.len());
        }
        info!(samples = snapshot.len(), "Promoted latest model");

        if let Some(embedding) = embedding {
            if let Err(e) = self.plot.update_plot(
                embedding.view(),
                &snapshot.ids,
                &snapshot.timestamps,
                &snapshot.labels,
            ) {
                error!(error = %e, "Plot sink failed to refresh after promotion");
            }
        }
        Ok(())
    }

    // -------------------------------- labels --------------------------------

    /// Correct the label of one sample, wherever it currently resides.
    pub fn update_label(&self, id: SampleId, label: &str) -> Result<()> {
        let code = self.label_map.lookup(label)?;
        let mut state = self.lock_state();
        if state.staging.set_label(id, code) || state.history.set_label(id, code) {
            debug!(id, label, "Updated label");
            Ok(())
        } else {
            Err(DriftmapError::NotFound(format!("sample {}", id)))
        }
    }
}

/// Supervised fit on the labeled rows, then an update with the rest.
fn fit_hybrid<M: ProjectionModel>(
    model: &mut M,
    data: ArrayView2<'_, f64>,
    labels: &[Option<LabelCode>],
    timestamps: &[f64],
    prior: Option<ArrayView2<'_, f64>>,
) -> Result<()> {
    let (labeled, unlabeled): (Vec<usize>, Vec<usize>) =
        (0..labels.len()).partition(|row| labels[*row].is_some());
    let codes: Vec<LabelCode> = labeled.iter().filter_map(|row| labels[*row]).collect();
    let labeled_timestamps: Vec<f64> = labeled.iter().map(|row| timestamps[*row]).collect();
    let unlabeled_timestamps: Vec<f64> = unlabeled.iter().map(|row| timestamps[*row]).collect();
    let labeled_prior = prior.map(|p| p.select(Axis(0), &labeled));

    debug!(
        labeled = labeled.len(),
        unlabeled = unlabeled.len(),
        "Fitting hybrid model"
    );
    model.fit_new(
        data.select(Axis(0), &labeled).view(),
        Some(&codes),
        Some(&labeled_timestamps),
        labeled_prior.as_ref().map(|p| p.view()),
    )?;
    model.fit_update(
        data.select(Axis(0), &unlabeled).view(),
        Some(&unlabeled_timestamps),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LinearProjection;

    struct NullPlot;

    impl PlotSink for NullPlot {
        fn plot(
            &self,
            _embedding: ArrayView2<'_, f64>,
            _ids: &[SampleId],
            _timestamps: &[f64],
            _labels: &[Option<LabelCode>],
        ) -> Result<()> {
            Ok(())
        }

        fn update_plot(
            &self,
            _embedding: ArrayView2<'_, f64>,
            _ids: &[SampleId],
            _timestamps: &[f64],
            _labels: &[Option<LabelCode>],
        ) -> Result<()> {
            Ok(())
        }
    }

    fn rows(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(r, c)| (r * 3 + c) as f64)
    }

    fn fitted_projector(align: bool) -> Projector<LinearProjection, NullPlot> {
        let config = ProjectorConfig::new()
            .with_min_training_samples(2)
            .with_align_projections(align);
        let projector =
            Projector::new(config, LinearProjection::default(), Arc::new(NullPlot)).unwrap();
        projector
            .project_new_data(rows(4), vec![0.0; 4], None)
            .unwrap();
        projector.update_model().unwrap();
        projector
    }

    /// Stage samples the way a projection that raced a promotion would:
    /// without cache rows.
    fn stage_without_embedding(projector: &Projector<LinearProjection, NullPlot>, n: usize) {
        let first = projector.next_sample_id.fetch_add(n as u64, Ordering::SeqCst);
        let ids: Vec<SampleId> = (first..first + n as u64).collect();
        projector
            .lock_state()
            .staging
            .push(rows(n).view(), &ids, &vec![1.0; n], &vec![None; n])
            .unwrap();
    }

    #[test]
    fn test_projector_id_names_method() {
        let projector = fitted_projector(false);
        assert!(projector.id().starts_with("linear_"));
        assert_eq!(projector.id().len(), "linear_".len() + 36);
    }

    #[test]
    fn test_alignment_truncates_batch_to_cache_length() {
        let projector = fitted_projector(true);
        assert_eq!(projector.cache_len(), 4);
        stage_without_embedding(&projector, 3);

        let outcome = projector.update_model().unwrap();
        assert_eq!(
            outcome,
            RefitOutcome::Fitted {
                samples: 4,
                promoted: false
            }
        );
        assert_eq!(projector.history_len(), 7);
    }

    #[test]
    fn test_no_truncation_without_alignment() {
        let projector = fitted_projector(false);
        stage_without_embedding(&projector, 3);

        let outcome = projector.update_model().unwrap();
        assert_eq!(
            outcome,
            RefitOutcome::Fitted {
                samples: 7,
                promoted: false
            }
        );
    }

    #[test]
    fn test_projection_fills_cache_backlog() {
        let projector = fitted_projector(false);
        stage_without_embedding(&projector, 3);
        assert_eq!(projector.cache_len(), 4);

        let embedding = projector
            .project_new_data(rows(2), vec![2.0; 2], None)
            .unwrap()
            .unwrap();
        assert_eq!(embedding.nrows(), 2);
        assert_eq!(projector.cache_len(), 9);
        assert_eq!(projector.staged_len(), 5);
    }

    #[test]
    fn test_rows_from_spans_history_and_staging() {
        let projector = fitted_projector(false);
        stage_without_embedding(&projector, 2);

        let state = projector.lock_state();
        let tail = state.rows_from(3).unwrap().unwrap();
        assert_eq!(tail.nrows(), 3);
        assert_eq!(tail.row(0), rows(4).row(3));
        assert_eq!(tail.row(1), rows(2).row(0));
        assert!(state.rows_from(6).unwrap().is_none());
    }
}
