//! Aligning feature rows with auxiliary rows
//!
//! Two chunks arrive per read cycle, one from each stream, and neither
//! stream waits for the other. The matcher pairs them either by sample id or
//! by timestamp and reports, per side, how far into the chunk it consumed.
//! Callers must advance each cursor by that high-water mark rather than by
//! the number of pairs: one auxiliary row can label many feature rows and
//! rows present on only one side are skipped.

use driftmap_core::{observe, DriftmapError, Label, MatchingScheme, Result, StreamSettings};
use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

/// Output of one matching pass, ordered by feature arrival
#[derive(Debug, Clone)]
pub struct MatchedBatch {
    pub features: Array2<f64>,
    pub timestamps: Vec<f64>,
    pub labels: Vec<Label>,
    /// Highest consumed feature index + 1
    pub features_consumed: usize,
    /// Highest consumed auxiliary index + 1; 0 when only a carried label was used
    pub auxiliary_consumed: usize,
}

impl MatchedBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Source of the label a feature row was paired with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuxRef {
    /// Label carried over from the previous call
    Carried,
    /// Row of the current auxiliary chunk
    Row(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pair {
    feature: usize,
    auxiliary: AuxRef,
}

/// Stateful matcher for one feature/auxiliary stream pair
///
/// The last matched label and its id or timestamp are carried across calls
/// so `until-next` can label feature rows that precede the first auxiliary
/// row of a chunk.
#[derive(Debug, Clone)]
pub struct StreamMatcher {
    scheme: MatchingScheme,
    drift_offset_s: f64,
    tolerance_s: Option<f64>,
    window: Option<usize>,
    last_label: Option<Label>,
    last_id: Option<i64>,
    last_timestamp: Option<f64>,
}

impl StreamMatcher {
    pub fn new(settings: &StreamSettings) -> Self {
        Self {
            scheme: settings.matching_scheme,
            drift_offset_s: settings.drift_offset_s(),
            tolerance_s: settings.drift_tolerance_s(),
            window: settings.match_window,
            last_label: None,
            last_id: None,
            last_timestamp: None,
        }
    }

    pub fn scheme(&self) -> MatchingScheme {
        self.scheme
    }

    /// Label carried into the next call, if any
    pub fn carried_label(&self) -> Option<&Label> {
        self.last_label.as_ref()
    }

    /// Forget the carried label.
    pub fn reset(&mut self) {
        self.last_label = None;
        self.last_id = None;
        self.last_timestamp = None;
    }

    // -------------------------------- id matching --------------------------------

    /// Pair rows by sample id.
    ///
    /// Returns `None` when nothing matched; no carried state changes then.
    pub fn match_by_id(
        &mut self,
        features: ArrayView2<'_, f64>,
        timestamps: &[f64],
        labels: &[Label],
        feature_ids: &[i64],
        auxiliary_ids: &[i64],
    ) -> Result<Option<MatchedBatch>> {
        check_feature_lengths(features, timestamps, feature_ids.len())?;
        check_auxiliary_lengths(labels, auxiliary_ids.len())?;

        let pairs = match self.scheme {
            MatchingScheme::MatchSamples => match_ids_match_samples(feature_ids, auxiliary_ids),
            MatchingScheme::UntilNext => {
                until_next(feature_ids, auxiliary_ids, self.carried_id(), |_, _| true)
            }
            MatchingScheme::FromPrevious => return Err(unsupported(self.scheme, "entry id")),
        };

        let batch = self.assemble(&pairs, features, timestamps, labels);
        if let Some(last) = pairs.last() {
            if let AuxRef::Row(row) = last.auxiliary {
                self.last_id = Some(auxiliary_ids[row]);
            }
        }
        Ok(batch)
    }

    fn carried_id(&self) -> Option<i64> {
        self.last_label.as_ref().and(self.last_id)
    }

    // -------------------------------- time matching --------------------------------

    /// Pair rows by timestamp after shifting auxiliary timestamps by the
    /// configured drift offset.
    ///
    /// Under `match-samples` the optional match window limits each
    /// auxiliary row to the next `match_window` unconsumed feature rows.
    ///
    /// Returns `None` when nothing matched; no carried state changes then.
    pub fn match_by_timestamp(
        &mut self,
        features: ArrayView2<'_, f64>,
        feature_timestamps: &[f64],
        labels: &[Label],
        auxiliary_timestamps: &[f64],
    ) -> Result<Option<MatchedBatch>> {
        check_feature_lengths(features, feature_timestamps, feature_timestamps.len())?;
        check_auxiliary_lengths(labels, auxiliary_timestamps.len())?;

        let shifted: Vec<f64> = auxiliary_timestamps
            .iter()
            .map(|t| t - self.drift_offset_s)
            .collect();
        let tolerance = self.tolerance_s;

        let pairs = match self.scheme {
            MatchingScheme::MatchSamples => {
                nearest_timestamps(feature_timestamps, &shifted, tolerance, self.window)
            }
            MatchingScheme::UntilNext => {
                let carried = self.last_label.as_ref().and(self.last_timestamp);
                until_next(feature_timestamps, &shifted, carried, |feature, label| {
                    tolerance.map_or(true, |t| feature - label <= t)
                })
            }
            MatchingScheme::FromPrevious => return Err(unsupported(self.scheme, "timestamp")),
        };

        let batch = self.assemble(&pairs, features, feature_timestamps, labels);
        if let Some(last) = pairs.last() {
            if let AuxRef::Row(row) = last.auxiliary {
                self.last_timestamp = Some(shifted[row]);
            }
        }
        Ok(batch)
    }

    // -------------------------------- output --------------------------------

    fn assemble(
        &mut self,
        pairs: &[Pair],
        features: ArrayView2<'_, f64>,
        timestamps: &[f64],
        labels: &[Label],
    ) -> Option<MatchedBatch> {
        let last = pairs.last()?;

        let rows: Vec<usize> = pairs.iter().map(|p| p.feature).collect();
        let matched_labels: Vec<Label> = pairs
            .iter()
            .map(|p| match p.auxiliary {
                AuxRef::Row(row) => labels[row].clone(),
                AuxRef::Carried => self.last_label.clone().unwrap_or(Label::Unclassified),
            })
            .collect();

        let features_consumed = rows.iter().max().map_or(0, |max| max + 1);
        let auxiliary_consumed = pairs
            .iter()
            .filter_map(|p| match p.auxiliary {
                AuxRef::Row(row) => Some(row + 1),
                AuxRef::Carried => None,
            })
            .max()
            .unwrap_or(0);

        if let AuxRef::Row(row) = last.auxiliary {
            self.last_label = Some(labels[row].clone());
        }

        debug!(
            scheme = %self.scheme,
            pairs = pairs.len(),
            features_consumed,
            auxiliary_consumed,
            "Matched stream chunks"
        );
        observe::record_matched(pairs.len());

        Some(MatchedBatch {
            features: features.select(Axis(0), &rows),
            timestamps: rows.iter().map(|r| timestamps[*r]).collect(),
            labels: matched_labels,
            features_consumed,
            auxiliary_consumed,
        })
    }
}

/// Every auxiliary id labels all feature rows with exactly that id.
/// Result is ordered by feature row.
fn match_ids_match_samples(feature_ids: &[i64], auxiliary_ids: &[i64]) -> Vec<Pair> {
    let mut pairs = Vec::new();
    for (aux_row, aux_id) in auxiliary_ids.iter().enumerate() {
        for (feature_row, feature_id) in feature_ids.iter().enumerate() {
            if feature_id == aux_id {
                pairs.push(Pair {
                    feature: feature_row,
                    auxiliary: AuxRef::Row(aux_row),
                });
            }
        }
    }
    // Stable: rows sharing a feature keep auxiliary order.
    pairs.sort_by_key(|p| p.feature);
    pairs
}

/// Every feature row takes the most recent auxiliary row whose key is
/// `<=` its own key. Rows before the first such auxiliary row (and before
/// any carried key) are dropped; rows past the last auxiliary row inherit
/// it. `accept(feature_key, label_key)` can still reject a pair.
fn until_next<K, F>(
    feature_keys: &[K],
    auxiliary_keys: &[K],
    carried: Option<K>,
    accept: F,
) -> Vec<Pair>
where
    K: PartialOrd + Copy,
    F: Fn(K, K) -> bool,
{
    let mut pairs = Vec::with_capacity(feature_keys.len());
    let mut current: Option<(AuxRef, K)> = None;
    let mut carried = carried;
    let mut next = 0;

    for (feature_row, feature_key) in feature_keys.iter().copied().enumerate() {
        if let Some(key) = carried {
            if key <= feature_key {
                current = Some((AuxRef::Carried, key));
                carried = None;
            }
        }
        while next < auxiliary_keys.len() && auxiliary_keys[next] <= feature_key {
            current = Some((AuxRef::Row(next), auxiliary_keys[next]));
            carried = None;
            next += 1;
        }
        if let Some((auxiliary, label_key)) = current {
            if accept(feature_key, label_key) {
                pairs.push(Pair {
                    feature: feature_row,
                    auxiliary,
                });
            }
        }
    }
    pairs
}

/// For each auxiliary timestamp in order, scan forward from the last
/// consumed feature row and take the nearest feature timestamp. Scanning
/// stops once the distance grows, assuming monotonic timestamps. Pairs
/// farther apart than `tolerance` are dropped without consuming the
/// feature row.
///
/// The window is forward-only: it covers `window` rows starting at the
/// first unconsumed row and never reaches back past it. A row before that
/// point already belongs to an earlier auxiliary row, and with monotonic
/// timestamps the nearest row always sits next to the first row at or
/// after the auxiliary time, so a window centered there would bound
/// nothing.
fn nearest_timestamps(
    feature_timestamps: &[f64],
    auxiliary_timestamps: &[f64],
    tolerance: Option<f64>,
    window: Option<usize>,
) -> Vec<Pair> {
    let n_features = feature_timestamps.len();
    let mut pairs = Vec::new();
    let mut start = 0;

    for (aux_row, aux_time) in auxiliary_timestamps.iter().copied().enumerate() {
        if start >= n_features {
            break;
        }
        let end = window.map_or(n_features, |w| (start + w).min(n_features));

        let mut best_row = start;
        let mut best_distance = f64::INFINITY;
        for (row, feature_time) in feature_timestamps[start..end].iter().enumerate() {
            let distance = (aux_time - feature_time).abs();
            if distance > best_distance {
                break;
            }
            best_distance = distance;
            best_row = start + row;
        }

        if tolerance.map_or(true, |t| best_distance <= t) {
            pairs.push(Pair {
                feature: best_row,
                auxiliary: AuxRef::Row(aux_row),
            });
            start = best_row + 1;
        }
    }
    pairs
}

fn check_feature_lengths(
    features: ArrayView2<'_, f64>,
    timestamps: &[f64],
    keys: usize,
) -> Result<()> {
    if features.nrows() != timestamps.len() || features.nrows() != keys {
        return Err(DriftmapError::Shape(format!(
            "feature chunk has {} rows, {} timestamps and {} keys",
            features.nrows(),
            timestamps.len(),
            keys
        )));
    }
    Ok(())
}

fn check_auxiliary_lengths(labels: &[Label], keys: usize) -> Result<()> {
    if labels.len() != keys {
        return Err(DriftmapError::Shape(format!(
            "auxiliary chunk has {} labels and {} keys",
            labels.len(),
            keys
        )));
    }
    Ok(())
}

fn unsupported(scheme: MatchingScheme, by: &str) -> DriftmapError {
    DriftmapError::UnsupportedMatchingScheme(format!(
        "matching features and labels by {} using '{}' is not supported",
        by, scheme
    ))
}
