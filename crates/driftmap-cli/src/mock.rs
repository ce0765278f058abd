//! Mock sample feed
//!
//! Produces samples from three normal distributions, one class per sample,
//! shaped to the configured stream layouts so the full read path (id
//! column, sections, label interpretation, matching) is exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use driftmap_core::{IdColumn, LabelInterpretation, StreamLayout, StreamSettings};
use driftmap_stream::SourceInlet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::MockConfig;

/// (mean, standard deviation) of each class
const CLASSES: [(f64, f64); 3] = [(1.0, 1.5), (2.5, 0.5), (3.0, 2.8)];

/// Column placement of one mocked stream
#[derive(Debug, Clone)]
pub struct RowShape {
    body_width: usize,
    id_column: Option<IdColumn>,
    label: Option<(usize, usize)>,
    interpretation: LabelInterpretation,
}

impl RowShape {
    /// Shape of the feature stream.
    pub fn features(settings: &StreamSettings, feature_dim: usize) -> Result<Self> {
        let layout = &settings.feature_layout;
        let label = if settings.reads_feature_labels() {
            label_range(settings, layout)?
        } else {
            None
        };
        Ok(Self::new(layout, feature_dim, label, settings.label_interpretation))
    }

    /// Shape of the auxiliary stream.
    pub fn auxiliary(settings: &StreamSettings) -> Result<Self> {
        let layout = &settings.auxiliary_layout;
        let label = label_range(settings, layout)?;
        Ok(Self::new(layout, 1, label, settings.label_interpretation))
    }

    fn new(
        layout: &StreamLayout,
        default_width: usize,
        label: Option<(usize, usize)>,
        interpretation: LabelInterpretation,
    ) -> Self {
        let body_width = if layout.sections.is_empty() {
            default_width
        } else {
            layout.sections_width()
        };
        Self {
            body_width,
            id_column: layout.id_column,
            label,
            interpretation,
        }
    }

    /// Full row width, id column included.
    pub fn width(&self) -> usize {
        self.body_width + usize::from(self.id_column.is_some())
    }

    /// Build one row: `body` values, the encoded class, then the id.
    fn build(&self, mut body: Vec<f64>, class: usize, id: u64) -> Vec<f64> {
        body.resize(self.body_width, 0.0);
        if let Some((offset, length)) = self.label {
            let section = &mut body[offset..offset + length];
            encode_class(section, class, self.interpretation);
        }
        match self.id_column {
            None => body,
            Some(IdColumn::First) => {
                body.insert(0, id as f64);
                body
            }
            Some(IdColumn::Last) => {
                body.push(id as f64);
                body
            }
            Some(IdColumn::Index(index)) => {
                body.insert(index.min(body.len()), id as f64);
                body
            }
        }
    }
}

fn label_range(settings: &StreamSettings, layout: &StreamLayout) -> Result<Option<(usize, usize)>> {
    match settings.label_section.as_deref() {
        Some(name) => Ok(Some(layout.section_range(name)?)),
        None => Ok(None),
    }
}

fn encode_class(section: &mut [f64], class: usize, interpretation: LabelInterpretation) {
    match interpretation {
        LabelInterpretation::OneToOne => {
            section.fill(0.0);
            section[0] = class as f64;
        }
        LabelInterpretation::IndexOfHighest => {
            section.fill(0.0);
            section[class % section.len()] = 1.0;
        }
        LabelInterpretation::IndexOfLowest => {
            section.fill(1.0);
            section[class % section.len()] = 0.0;
        }
    }
}

/// Pushes mock samples into the feature and auxiliary inlets
pub struct MockFeed {
    rate_hz: f64,
    features: (SourceInlet, RowShape),
    auxiliary: Option<(SourceInlet, RowShape)>,
    rng: StdRng,
    next_id: u64,
}

impl MockFeed {
    pub fn new(
        config: &MockConfig,
        features: (SourceInlet, RowShape),
        auxiliary: Option<(SourceInlet, RowShape)>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rate_hz: config.sampling_rate_hz,
            features,
            auxiliary,
            rng,
            next_id: 0,
        }
    }

    /// Push one sample to every stream.
    pub fn push_sample(&mut self) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let timestamp = id as f64 / self.rate_hz;

        let class = self.rng.gen_range(0..CLASSES.len());
        let (mean, std) = CLASSES[class];

        let (inlet, shape) = &self.features;
        let body: Vec<f64> = (0..shape.body_width)
            .map(|_| mean + std * standard_normal(&mut self.rng))
            .collect();
        inlet.push(shape.build(body, class, id), timestamp)?;

        if let Some((inlet, shape)) = &self.auxiliary {
            inlet.push(shape.build(Vec::new(), class, id), timestamp)?;
        }
        Ok(())
    }

    /// Push samples at the configured rate until `shutdown` is set.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.rate_hz));
        info!(rate_hz = self.rate_hz, "Mock feed started");

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if let Err(e) = self.push_sample() {
                warn!(error = %e, "Mock feed failed to push a sample");
            }
        }

        debug!(samples = self.next_id, "Mock feed stopped");
    }
}

/// Box-Muller transform
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftmap_core::{Label, StreamSource};
    use driftmap_stream::{DualStreamReader, RingBufferSource};

    fn shape(layout: StreamLayout, label: Option<(usize, usize)>, interpretation: LabelInterpretation) -> RowShape {
        RowShape::new(&layout, 4, label, interpretation)
    }

    #[test]
    fn test_row_layout_places_id_and_label() {
        let shape = shape(
            StreamLayout::new()
                .with_id_column(IdColumn::First)
                .with_section("channels", 2)
                .with_section("class", 3),
            Some((2, 3)),
            LabelInterpretation::IndexOfHighest,
        );
        assert_eq!(shape.width(), 6);

        let row = shape.build(vec![0.5, 0.7], 1, 42);
        assert_eq!(row, vec![42.0, 0.5, 0.7, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_index_of_lowest_encoding() {
        let shape = shape(
            StreamLayout::new()
                .with_id_column(IdColumn::Last)
                .with_section("class", 3),
            Some((0, 3)),
            LabelInterpretation::IndexOfLowest,
        );
        assert_eq!(shape.build(Vec::new(), 2, 9), vec![1.0, 1.0, 0.0, 9.0]);
    }

    #[test]
    fn test_no_sections_uses_default_width() {
        let shape = shape(StreamLayout::new(), None, LabelInterpretation::OneToOne);
        assert_eq!(shape.width(), 4);
        assert_eq!(shape.build(vec![1.0; 4], 0, 0).len(), 4);
    }

    #[test]
    fn test_feed_rows_read_back_with_labels() {
        let settings = StreamSettings::new("features")
            .with_auxiliary_stream("markers")
            .with_label_section("class", LabelInterpretation::OneToOne)
            .with_auxiliary_layout(StreamLayout::new().with_section("class", 1));
        let config = MockConfig {
            feature_dim: 3,
            seed: Some(1),
            ..MockConfig::default()
        };

        let feature_shape = RowShape::features(&settings, config.feature_dim).unwrap();
        let auxiliary_shape = RowShape::auxiliary(&settings).unwrap();
        let features = RingBufferSource::new("features", 32, feature_shape.width());
        let auxiliary = RingBufferSource::new("markers", 32, auxiliary_shape.width());

        let mut feed = MockFeed::new(
            &config,
            (features.inlet(), feature_shape),
            Some((auxiliary.inlet(), auxiliary_shape)),
        );
        for _ in 0..10 {
            feed.push_sample().unwrap();
        }

        let mut reader = DualStreamReader::new(settings, features, Some(auxiliary)).unwrap();
        let batch = reader.read().unwrap().expect("a matched batch");
        assert_eq!(batch.features.ncols(), 3);
        assert_eq!(batch.len(), 10);
        let labels = batch.labels.unwrap();
        assert!(labels
            .iter()
            .all(|l| matches!(l, Label::Code(c) if (0..3).contains(c))));
        assert_eq!(reader.feature_source().cursor().unread(), 0);
    }
}
