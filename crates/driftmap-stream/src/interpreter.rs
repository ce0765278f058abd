//! Slicing raw stream chunks into ids, features and labels

use driftmap_core::{
    DriftmapError, IdColumn, Label, LabelInterpretation, Result, StreamLayout, StreamSettings,
};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};

/// Which stream an interpreter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Features,
    Auxiliary,
}

/// One chunk split into its parts
#[derive(Debug, Clone, Default)]
pub struct InterpretedChunk {
    /// Sample ids, when the layout has an id column
    pub ids: Option<Vec<i64>>,
    /// Feature matrix, for the feature stream
    pub features: Option<Array2<f64>>,
    /// One label per row, when this stream carries the labels
    pub labels: Option<Vec<Label>>,
}

impl InterpretedChunk {
    pub fn len(&self) -> usize {
        if let Some(features) = &self.features {
            features.nrows()
        } else if let Some(labels) = &self.labels {
            labels.len()
        } else {
            self.ids.as_ref().map_or(0, Vec::len)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct LabelSlice {
    offset: usize,
    length: usize,
    method: LabelInterpretation,
}

/// Interprets chunks of one stream according to its static layout
#[derive(Debug, Clone)]
pub struct StreamInterpreter {
    role: StreamRole,
    id_column: Option<IdColumn>,
    feature_slice: Option<(usize, usize)>,
    label_slice: Option<LabelSlice>,
}

impl StreamInterpreter {
    pub fn new(settings: &StreamSettings, role: StreamRole) -> Result<Self> {
        let layout: &StreamLayout = match role {
            StreamRole::Features => &settings.feature_layout,
            StreamRole::Auxiliary => &settings.auxiliary_layout,
        };
        layout.validate()?;

        let feature_slice = match (role, settings.feature_section.as_deref()) {
            (StreamRole::Features, Some(section)) => Some(layout.section_range(section)?),
            _ => None,
        };

        let interprets_labels = match role {
            StreamRole::Features => settings.reads_feature_labels(),
            StreamRole::Auxiliary => settings.reads_auxiliary_labels(),
        };
        let label_slice = if interprets_labels {
            let section = settings.label_section.as_deref().ok_or_else(|| {
                DriftmapError::Config("labels are watched but no label section is set".into())
            })?;
            let (offset, length) = layout.section_range(section)?;
            Some(LabelSlice {
                offset,
                length,
                method: settings.label_interpretation,
            })
        } else {
            None
        };

        Ok(Self {
            role,
            id_column: layout.id_column,
            feature_slice,
            label_slice,
        })
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    pub fn has_id_column(&self) -> bool {
        self.id_column.is_some()
    }

    pub fn interprets_labels(&self) -> bool {
        self.label_slice.is_some()
    }

    /// Split a raw chunk. An empty chunk yields an empty result.
    pub fn interpret(&self, chunk: ArrayView2<'_, f64>) -> Result<InterpretedChunk> {
        if chunk.nrows() == 0 {
            return Ok(InterpretedChunk::default());
        }

        let (ids, data) = match self.id_column {
            Some(column) => {
                let index = column.resolve(chunk.ncols())?;
                let ids = parse_ids(chunk.column(index))?;
                let keep: Vec<usize> = (0..chunk.ncols()).filter(|c| *c != index).collect();
                (Some(ids), chunk.select(Axis(1), &keep))
            }
            None => (None, chunk.to_owned()),
        };

        let features = match self.role {
            StreamRole::Features => Some(match self.feature_slice {
                Some((offset, length)) => slice_columns(data.view(), offset, length)?.to_owned(),
                None => data.clone(),
            }),
            StreamRole::Auxiliary => None,
        };

        let labels = match self.label_slice {
            Some(slice) => {
                let section = slice_columns(data.view(), slice.offset, slice.length)?;
                Some(interpret_labels(section, slice.method)?)
            }
            None => None,
        };

        Ok(InterpretedChunk {
            ids,
            features,
            labels,
        })
    }
}

/// Id columns must hold whole numbers; a fractional or NaN id would alias
/// another sample after truncation.
fn parse_ids(column: ArrayView1<'_, f64>) -> Result<Vec<i64>> {
    column
        .iter()
        .enumerate()
        .map(|(row, value)| {
            let in_range = value.is_finite()
                && value.fract() == 0.0
                && *value >= i64::MIN as f64
                && *value < i64::MAX as f64;
            if in_range {
                Ok(*value as i64)
            } else {
                Err(DriftmapError::Shape(format!(
                    "id column value {} in row {} is not an integer",
                    value, row
                )))
            }
        })
        .collect()
}

fn slice_columns(
    data: ArrayView2<'_, f64>,
    offset: usize,
    length: usize,
) -> Result<ArrayView2<'_, f64>> {
    if offset + length > data.ncols() {
        return Err(DriftmapError::Interpretation(format!(
            "section [{}, {}) exceeds the {} data columns of the stream",
            offset,
            offset + length,
            data.ncols()
        )));
    }
    Ok(data.slice_move(s![.., offset..offset + length]))
}

/// Collapse a label section into one label per row.
pub fn interpret_labels(
    section: ArrayView2<'_, f64>,
    method: LabelInterpretation,
) -> Result<Vec<Label>> {
    match method {
        LabelInterpretation::OneToOne => {
            if section.ncols() > 1 {
                return Err(DriftmapError::Interpretation(format!(
                    "'one-to-one' mapping not possible, the label section has {} columns",
                    section.ncols()
                )));
            }
            Ok(section.column(0).iter().map(|v| Label::from_value(*v)).collect())
        }
        LabelInterpretation::IndexOfHighest => Ok(section
            .rows()
            .into_iter()
            .map(|row| select_index(row, |candidate, best| candidate > best))
            .collect()),
        LabelInterpretation::IndexOfLowest => Ok(section
            .rows()
            .into_iter()
            .map(|row| select_index(row, |candidate, best| candidate < best))
            .collect()),
    }
}

// Strict comparison keeps the first column on ties. NaN never wins.
fn select_index(row: ArrayView1<'_, f64>, better: impl Fn(f64, f64) -> bool) -> Label {
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in row.iter().copied().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if !better(value, current) => {}
            _ => best = Some((index, value)),
        }
    }
    match best {
        Some((index, _)) => Label::Code(index as i64),
        None => Label::Unclassified,
    }
}
