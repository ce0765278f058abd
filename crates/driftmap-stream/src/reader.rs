//! Reading aligned batches from a feature stream and an optional label stream

use driftmap_core::{DriftmapError, Label, Result, StreamSettings, StreamSource};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use tracing::{debug, trace};

use crate::interpreter::{InterpretedChunk, StreamInterpreter, StreamRole};
use crate::matcher::StreamMatcher;

/// One aligned batch, one row per sample
#[derive(Debug, Clone)]
pub struct ReadBatch {
    pub features: Array2<f64>,
    pub timestamps: Vec<f64>,
    /// Present when labels are watched
    pub labels: Option<Vec<Label>>,
}

impl ReadBatch {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }
}

/// Reads the feature stream and, when labels come from there, the auxiliary
/// stream, and aligns them
///
/// The reader owns both sources, so filling, copying the unread window and
/// advancing a cursor never interleave with another reader.
pub struct DualStreamReader<F: StreamSource, A: StreamSource = F> {
    settings: StreamSettings,
    features: F,
    auxiliary: Option<A>,
    feature_interpreter: StreamInterpreter,
    auxiliary_interpreter: Option<StreamInterpreter>,
    matcher: StreamMatcher,
}

impl<F: StreamSource, A: StreamSource> DualStreamReader<F, A> {
    pub fn new(settings: StreamSettings, features: F, auxiliary: Option<A>) -> Result<Self> {
        settings.validate()?;

        let feature_interpreter = StreamInterpreter::new(&settings, StreamRole::Features)?;
        let auxiliary_interpreter = if settings.reads_auxiliary_labels() {
            if auxiliary.is_none() {
                return Err(DriftmapError::Config(format!(
                    "labels are read from the auxiliary stream '{}' but no source was given",
                    settings.auxiliary_stream.as_deref().unwrap_or_default()
                )));
            }
            Some(StreamInterpreter::new(&settings, StreamRole::Auxiliary)?)
        } else {
            None
        };
        let matcher = StreamMatcher::new(&settings);

        Ok(Self {
            settings,
            features,
            auxiliary,
            feature_interpreter,
            auxiliary_interpreter,
            matcher,
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn feature_source(&self) -> &F {
        &self.features
    }

    pub fn auxiliary_source(&self) -> Option<&A> {
        self.auxiliary.as_ref()
    }

    /// Read one aligned batch.
    ///
    /// Returns `None` when the feature stream has nothing unread, when the
    /// auxiliary stream has nothing unread, or when no rows could be matched.
    /// Cursors only move when a batch is returned.
    pub fn read(&mut self) -> Result<Option<ReadBatch>> {
        self.features.fill()?;
        let (raw, timestamps) = unread_window(&self.features)?;
        if raw.nrows() == 0 {
            return Ok(None);
        }

        let mut chunk = self.feature_interpreter.interpret(raw.view())?;

        let (auxiliary, auxiliary_interpreter) =
            match (self.auxiliary.as_mut(), self.auxiliary_interpreter.as_ref()) {
                (Some(source), Some(interpreter)) => (source, interpreter),
                _ => {
                    let consumed = raw.nrows();
                    self.features.cursor_mut().advance(consumed);
                    trace!(stream = %self.features.name(), consumed, "Read feature chunk");
                    return Ok(Some(ReadBatch {
                        features: take_features(chunk.features)?,
                        timestamps,
                        labels: chunk.labels,
                    }));
                }
            };

        auxiliary.fill()?;
        let (auxiliary_raw, auxiliary_timestamps) = unread_window(&*auxiliary)?;
        if auxiliary_raw.nrows() == 0 {
            return Ok(None);
        }
        let auxiliary_chunk = auxiliary_interpreter.interpret(auxiliary_raw.view())?;

        let features = take_features(chunk.features.take())?;
        let labels = auxiliary_chunk.labels.as_deref().ok_or_else(|| {
            DriftmapError::Interpretation("auxiliary chunk produced no labels".into())
        })?;

        let matched = if self.settings.match_by_id {
            let feature_ids = ids_of(&chunk, "feature")?;
            let auxiliary_ids = ids_of(&auxiliary_chunk, "auxiliary")?;
            self.matcher
                .match_by_id(features.view(), &timestamps, labels, feature_ids, auxiliary_ids)?
        } else {
            self.matcher.match_by_timestamp(
                features.view(),
                &timestamps,
                labels,
                &auxiliary_timestamps,
            )?
        };

        let Some(batch) = matched else {
            debug!(
                features = features.nrows(),
                auxiliary = labels.len(),
                "No feature rows matched the auxiliary chunk"
            );
            return Ok(None);
        };

        self.features.cursor_mut().advance(batch.features_consumed);
        auxiliary.cursor_mut().advance(batch.auxiliary_consumed);

        Ok(Some(ReadBatch {
            features: batch.features,
            timestamps: batch.timestamps,
            labels: Some(batch.labels),
        }))
    }
}

/// Copy the unread rows of a source in read order.
fn unread_window<S: StreamSource>(source: &S) -> Result<(Array2<f64>, Vec<f64>)> {
    let (head, tail) = source.cursor().unread_segments();
    let buffer: ArrayView2<'_, f64> = source.buffer();
    let stamps = source.timestamps();

    match tail {
        None => Ok((
            buffer.slice(s![head.clone(), ..]).to_owned(),
            stamps[head].to_vec(),
        )),
        Some(tail) => {
            let rows = concatenate(
                Axis(0),
                &[
                    buffer.slice(s![head.clone(), ..]),
                    buffer.slice(s![tail.clone(), ..]),
                ],
            )?;
            let mut timestamps = stamps[head].to_vec();
            timestamps.extend_from_slice(&stamps[tail]);
            Ok((rows, timestamps))
        }
    }
}

fn take_features(features: Option<Array2<f64>>) -> Result<Array2<f64>> {
    features.ok_or_else(|| DriftmapError::Interpretation("feature chunk produced no features".into()))
}

fn ids_of<'a>(chunk: &'a InterpretedChunk, stream: &str) -> Result<&'a [i64]> {
    chunk.ids.as_deref().ok_or_else(|| {
        DriftmapError::Interpretation(format!(
            "matching by id, but the {} stream has no id column",
            stream
        ))
    })
}
