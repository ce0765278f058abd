//! Projector update protocol: refit, promotion, cache reconciliation

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use driftmap_core::{
    DriftmapError, Label, LabelCode, PlotSink, ProjectionModel, ProjectorConfig, Result, SampleId,
};
use driftmap_projector::{LinearProjection, Projector, RefitOutcome};
use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;

#[derive(Default)]
struct RecordingPlot {
    plotted: AtomicUsize,
    refreshed: Mutex<Vec<usize>>,
    fail: AtomicBool,
}

impl PlotSink for RecordingPlot {
    fn plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        _ids: &[SampleId],
        _timestamps: &[f64],
        _labels: &[Option<LabelCode>],
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DriftmapError::Plot("display closed".into()));
        }
        self.plotted.fetch_add(embedding.nrows(), Ordering::SeqCst);
        Ok(())
    }

    fn update_plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        _timestamps: &[f64],
        _labels: &[Option<LabelCode>],
    ) -> Result<()> {
        assert_eq!(embedding.nrows(), ids.len());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DriftmapError::Plot("display closed".into()));
        }
        self.refreshed.lock().push(embedding.nrows());
        Ok(())
    }
}

/// Embeds every row as `[fit_new calls, fit_update calls, labels in last fit]`,
/// with -1 for an unsupervised fit
#[derive(Clone, Default)]
struct CountingModel {
    fits: usize,
    updates: usize,
    last_labels: Option<usize>,
}

impl ProjectionModel for CountingModel {
    fn fit_new(
        &mut self,
        data: ArrayView2<'_, f64>,
        labels: Option<&[LabelCode]>,
        _timestamps: Option<&[f64]>,
        prior_embedding: Option<ArrayView2<'_, f64>>,
    ) -> Result<()> {
        if let Some(prior) = prior_embedding {
            assert!(prior.nrows() <= data.nrows());
        }
        self.fits += 1;
        self.last_labels = labels.map(|l| l.len());
        Ok(())
    }

    fn fit_update(&mut self, _data: ArrayView2<'_, f64>, _timestamps: Option<&[f64]>) -> Result<()> {
        self.updates += 1;
        Ok(())
    }

    fn project(
        &self,
        data: ArrayView2<'_, f64>,
        _existing_data: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>> {
        let labels = self.last_labels.map_or(-1.0, |n| n as f64);
        Ok(Array2::from_shape_fn((data.nrows(), 3), |(_, c)| match c {
            0 => self.fits as f64,
            1 => self.updates as f64,
            _ => labels,
        }))
    }
}

fn samples(rows: usize, offset: f64) -> (Array2<f64>, Vec<f64>) {
    let data = Array2::from_shape_fn((rows, 3), |(r, c)| offset + r as f64 + c as f64 * 0.1);
    let timestamps = (0..rows).map(|r| offset + r as f64 * 0.01).collect();
    (data, timestamps)
}

fn counting_projector(config: ProjectorConfig) -> Projector<CountingModel, RecordingPlot> {
    Projector::new(config, CountingModel::default(), Arc::new(RecordingPlot::default())).unwrap()
}

#[test]
fn test_first_fit_promotes_and_enables_projection() {
    let projector = Projector::new(
        ProjectorConfig::new().with_min_training_samples(5),
        LinearProjection::default(),
        Arc::new(RecordingPlot::default()),
    )
    .unwrap();

    let (data, ts) = samples(20, 0.0);
    assert!(projector.project_new_data(data, ts, None).unwrap().is_none());
    assert!(!projector.has_current_model());

    let outcome = projector.update_model().unwrap();
    assert_eq!(
        outcome,
        RefitOutcome::Fitted {
            samples: 20,
            promoted: true
        }
    );
    assert!(projector.has_current_model());
    assert_eq!(projector.update_count(), 1);
    assert_eq!(projector.cache_len(), 20);
    assert_eq!(projector.plot().refreshed.lock().as_slice(), &[20]);

    let (data, ts) = samples(5, 100.0);
    let embedding = projector.project_new_data(data, ts, None).unwrap().unwrap();
    assert_eq!(embedding.dim(), (5, 2));
    assert_eq!(projector.update_count(), 1);
    assert_eq!(projector.cache_len(), 25);
    assert_eq!(projector.staged_len(), 5);
    assert_eq!(projector.plot().plotted.load(Ordering::SeqCst), 5);
}

#[test]
fn test_refit_below_minimum_is_skipped_but_history_kept() {
    let projector = counting_projector(ProjectorConfig::new().with_min_training_samples(10));
    let (data, ts) = samples(4, 0.0);
    projector.project_new_data(data, ts, None).unwrap();

    let outcome = projector.update_model().unwrap();
    assert_eq!(outcome, RefitOutcome::Skipped { samples: 4 });
    assert_eq!(projector.history_len(), 4);
    assert_eq!(projector.staged_len(), 0);
    assert_eq!(projector.update_count(), 0);
    assert!(!projector.has_current_model());
}

#[test]
fn test_empty_input_is_noop() {
    let projector = counting_projector(ProjectorConfig::new());
    let result = projector
        .project_new_data(Array2::zeros((0, 3)), Vec::new(), None)
        .unwrap();
    assert!(result.is_none());
    assert_eq!(projector.staged_len(), 0);
}

#[test]
fn test_later_refits_do_not_promote() {
    let projector = counting_projector(ProjectorConfig::new().with_min_training_samples(2));
    let (data, ts) = samples(4, 0.0);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_model().unwrap();

    let (data, ts) = samples(3, 10.0);
    let first = projector.project_new_data(data, ts, None).unwrap().unwrap();
    // Serving model is the one from the first fit.
    assert!(first.column(0).iter().all(|v| *v == 1.0));

    let outcome = projector.update_model().unwrap();
    assert_eq!(
        outcome,
        RefitOutcome::Fitted {
            samples: 7,
            promoted: false
        }
    );
    assert_eq!(projector.update_count(), 2);
    assert_eq!(projector.promoted_update(), 1);

    projector.activate_latest().unwrap();
    assert_eq!(projector.promoted_update(), 2);
    let cache = projector.projection_cache().unwrap();
    assert_eq!(cache.nrows(), 7);
    assert!(cache.column(0).iter().all(|v| *v == 2.0));
}

#[test]
fn test_activate_before_any_fit_is_invalid() {
    let projector = counting_projector(ProjectorConfig::new());
    assert!(matches!(
        projector.activate_latest(),
        Err(DriftmapError::InvalidState(_))
    ));
}

#[test]
fn test_plot_failures_do_not_roll_back() {
    let projector = counting_projector(ProjectorConfig::new().with_min_training_samples(2));
    projector.plot().fail.store(true, Ordering::SeqCst);

    let (data, ts) = samples(3, 0.0);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_model().unwrap();
    assert!(projector.has_current_model());
    assert_eq!(projector.cache_len(), 3);

    let (data, ts) = samples(2, 5.0);
    assert!(projector.project_new_data(data, ts, None).unwrap().is_some());
    assert_eq!(projector.staged_len(), 2);
    assert_eq!(projector.cache_len(), 5);
}

#[test]
fn test_alignment_without_truncation_when_cache_covers_history() {
    let projector = counting_projector(
        ProjectorConfig::new()
            .with_min_training_samples(2)
            .with_align_projections(true),
    );
    let (data, ts) = samples(4, 0.0);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_model().unwrap();
    assert_eq!(projector.cache_len(), 4);

    // Staged after promotion, so the cache already covers them.
    let (data, ts) = samples(3, 10.0);
    projector.project_new_data(data, ts, None).unwrap();
    assert_eq!(projector.cache_len(), 7);

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
fn test_label_classification() {
    let config = ProjectorConfig::new()
        .with_min_training_samples(2)
        .with_label("rest", 0)
        .with_label("task", 1);
    let projector = counting_projector(config);

    let (data, ts) = samples(2, 0.0);
    projector
        .project_new_data(data, ts, Some(vec![Label::from("rest"), Label::Code(1)]))
        .unwrap();
    projector.update_model().unwrap();
    let cache = projector.projection_cache().unwrap();
    assert!(cache.column(2).iter().all(|v| *v == 2.0), "all labeled is supervised");

    let (data, ts) = samples(1, 5.0);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_model().unwrap();
    projector.activate_latest().unwrap();
    let cache = projector.projection_cache().unwrap();
    assert!(cache.column(2).iter().all(|v| *v == -1.0), "any unlabeled is unsupervised");
    assert!(cache.column(1).iter().all(|v| *v == 0.0));
}

#[test]
fn test_hybrid_training_splits_mixed_batches() {
    let config = ProjectorConfig::new()
        .with_min_training_samples(2)
        .with_hybrid_training(true);
    let projector = counting_projector(config);

    let (data, ts) = samples(5, 0.0);
    let labels = vec![
        Label::Code(0),
        Label::Unclassified,
        Label::Code(1),
        Label::Unclassified,
        Label::Unclassified,
    ];
    projector.project_new_data(data, ts, Some(labels)).unwrap();
    projector.update_model().unwrap();

    let cache = projector.projection_cache().unwrap();
    assert!(cache.column(0).iter().all(|v| *v == 1.0));
    assert!(cache.column(1).iter().all(|v| *v == 1.0));
    assert!(cache.column(2).iter().all(|v| *v == 2.0));
}

#[test]
fn test_hybrid_training_needs_two_labeled_rows() {
    let config = ProjectorConfig::new()
        .with_min_training_samples(2)
        .with_hybrid_training(true);
    let projector = counting_projector(config);

    let (data, ts) = samples(3, 0.0);
    let labels = vec![Label::Code(0), Label::Unclassified, Label::Unclassified];
    projector.project_new_data(data, ts, Some(labels)).unwrap();
    projector.update_model().unwrap();

    let cache = projector.projection_cache().unwrap();
    assert!(cache.column(1).iter().all(|v| *v == 0.0));
    assert!(cache.column(2).iter().all(|v| *v == -1.0));
}

#[test]
fn test_update_label_staged_and_historic() {
    let projector = counting_projector(
        ProjectorConfig::new()
            .with_min_training_samples(100)
            .with_label("task", 1),
    );
    let (data, ts) = samples(3, 0.0);
    projector.project_new_data(data, ts, None).unwrap();

    projector.update_label(2, "task").unwrap();
    projector.update_model().unwrap();
    assert_eq!(projector.history_len(), 3);

    let (data, ts) = samples(2, 5.0);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_label(1, "task").unwrap();
    projector.update_label(5, "unclassified").unwrap();

    assert!(matches!(
        projector.update_label(99, "task"),
        Err(DriftmapError::NotFound(_))
    ));
    assert!(matches!(
        projector.update_label(1, "nonexistent"),
        Err(DriftmapError::NotFound(_))
    ));
}

#[test]
fn test_mismatched_timestamps_rejected() {
    let projector = counting_projector(ProjectorConfig::new());
    let (data, _) = samples(3, 0.0);
    let result = projector.project_new_data(data, vec![0.0], None);
    assert!(matches!(result, Err(DriftmapError::Shape(_))));
    assert_eq!(projector.staged_len(), 0);
}

#[test]
fn test_concurrent_projecting_and_refitting() {
    let projector = Arc::new(counting_projector(
        ProjectorConfig::new().with_min_training_samples(5),
    ));
    let barrier = Arc::new(Barrier::new(2));
    let batches = 50;
    let rows_per_batch = 4;

    let producer = {
        let projector = Arc::clone(&projector);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..batches {
                let (data, ts) = samples(rows_per_batch, i as f64);
                projector.project_new_data(data, ts, None).unwrap();
            }
        })
    };
    let refitter = {
        let projector = Arc::clone(&projector);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..20 {
                projector.update_model().unwrap();
                if i % 5 == 4 && projector.update_count() > 0 {
                    projector.activate_latest().unwrap();
                }
            }
        })
    };

    producer.join().unwrap();
    refitter.join().unwrap();

    projector.update_model().unwrap();
    projector.activate_latest().unwrap();
    assert_eq!(projector.history_len(), batches * rows_per_batch);
    assert_eq!(projector.staged_len(), 0);
    assert_eq!(projector.cache_len(), batches * rows_per_batch);

    // The final promotion re-embedded every historic row with one model.
    let cache = projector.projection_cache().unwrap();
    let fits = projector.update_count() as f64;
    assert!(cache.column(0).iter().all(|v| *v == fits));
}

#[test]
fn test_width_change_after_merge_rejected() {
    let projector = counting_projector(ProjectorConfig::new().with_min_training_samples(100));
    let (data, ts) = samples(20, 0.0);
    projector.project_new_data(data, ts, None).unwrap();
    assert_eq!(
        projector.update_model().unwrap(),
        RefitOutcome::Skipped { samples: 20 }
    );
    assert_eq!(projector.staged_len(), 0);

    let wider = Array2::zeros((2, 4));
    let result = projector.project_new_data(wider, vec![1.0, 2.0], None);
    assert!(matches!(result, Err(DriftmapError::Shape(_))));
    assert_eq!(projector.staged_len(), 0);

    // The history stays usable for rows of its own width.
    let (data, ts) = samples(3, 50.0);
    projector.project_new_data(data, ts, None).unwrap();
    assert_eq!(
        projector.update_model().unwrap(),
        RefitOutcome::Skipped { samples: 23 }
    );
}

/// Embeds each row as `[first feature * generation, first feature]`.
///
/// `generation` counts fits. Once armed, the next `project` call parks
/// between two barriers so a test can interleave other work with it.
#[derive(Clone)]
struct GatedModel {
    generation: usize,
    armed: Arc<AtomicBool>,
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl GatedModel {
    fn new() -> Self {
        Self {
            generation: 0,
            armed: Arc::new(AtomicBool::new(false)),
            entered: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
        }
    }
}

impl ProjectionModel for GatedModel {
    fn fit_new(
        &mut self,
        _data: ArrayView2<'_, f64>,
        _labels: Option<&[LabelCode]>,
        _timestamps: Option<&[f64]>,
        _prior_embedding: Option<ArrayView2<'_, f64>>,
    ) -> Result<()> {
        self.generation += 1;
        Ok(())
    }

    fn fit_update(&mut self, _data: ArrayView2<'_, f64>, _timestamps: Option<&[f64]>) -> Result<()> {
        Ok(())
    }

    fn project(
        &self,
        data: ArrayView2<'_, f64>,
        _existing_data: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        let generation = self.generation as f64;
        Ok(Array2::from_shape_fn((data.nrows(), 2), |(r, c)| match c {
            0 => data[[r, 0]] * generation,
            _ => data[[r, 0]],
        }))
    }
}

/// Rows whose first feature is the sample's ordinal, starting at `first`.
fn ordinals(first: usize, rows: usize) -> (Array2<f64>, Vec<f64>) {
    let data = Array2::from_shape_fn((rows, 3), |(r, _)| (first + r) as f64);
    let timestamps = (0..rows).map(|r| (first + r) as f64).collect();
    (data, timestamps)
}

#[test]
fn test_projection_during_promotion_keeps_cache_order() {
    let model = GatedModel::new();
    let (armed, entered, release) = (
        Arc::clone(&model.armed),
        Arc::clone(&model.entered),
        Arc::clone(&model.release),
    );
    let projector = Arc::new(
        Projector::new(
            ProjectorConfig::new().with_min_training_samples(5),
            model,
            Arc::new(RecordingPlot::default()),
        )
        .unwrap(),
    );

    // Generation 1 serves samples 1..=13.
    let (data, ts) = ordinals(1, 10);
    projector.project_new_data(data, ts, None).unwrap();
    projector.update_model().unwrap();
    let (data, ts) = ordinals(11, 3);
    projector.project_new_data(data, ts, None).unwrap();

    // Generation 2 is trained on all 13 but not serving yet.
    assert_eq!(
        projector.update_model().unwrap(),
        RefitOutcome::Fitted {
            samples: 13,
            promoted: false
        }
    );

    armed.store(true, Ordering::SeqCst);
    let activation = {
        let projector = Arc::clone(&projector);
        thread::spawn(move || projector.activate_latest())
    };

    // The promotion has taken its snapshot and is embedding it.
    entered.wait();
    let (data, ts) = ordinals(14, 2);
    let served = projector.project_new_data(data, ts, None).unwrap().unwrap();
    assert_eq!(served.column(0).to_vec(), vec![14.0, 15.0]);
    assert_eq!(projector.cache_len(), 15);
    release.wait();

    activation.join().unwrap().unwrap();
    assert_eq!(projector.promoted_update(), 2);

    let cache = projector.projection_cache().unwrap();
    assert_eq!(cache.nrows(), 15);
    let order: Vec<f64> = cache.column(1).to_vec();
    let expected: Vec<f64> = (1..=15).map(|i| i as f64).collect();
    assert_eq!(order, expected);

    // Snapshot rows carry the promoted generation; later rows keep theirs.
    let values: Vec<f64> = cache.column(0).to_vec();
    let mut expected: Vec<f64> = (1..=13).map(|i| i as f64 * 2.0).collect();
    expected.extend([14.0, 15.0]);
    assert_eq!(values, expected);

    // Folding the racing samples in keeps history and cache aligned.
    projector.update_model().unwrap();
    assert_eq!(projector.history_len(), 15);
    assert_eq!(projector.cache_len(), 15);
}
