use crate::error::{DriftmapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Position of the sample-id column inside a raw stream row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdColumnRepr", into = "IdColumnRepr")]
pub enum IdColumn {
    First,
    Last,
    Index(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IdColumnRepr {
    Named(String),
    Index(usize),
}

impl TryFrom<IdColumnRepr> for IdColumn {
    type Error = DriftmapError;

    fn try_from(repr: IdColumnRepr) -> Result<Self> {
        match repr {
            IdColumnRepr::Index(index) => Ok(IdColumn::Index(index)),
            IdColumnRepr::Named(name) => name.parse(),
        }
    }
}

impl From<IdColumn> for IdColumnRepr {
    fn from(column: IdColumn) -> Self {
        match column {
            IdColumn::First => IdColumnRepr::Named("first".to_string()),
            IdColumn::Last => IdColumnRepr::Named("last".to_string()),
            IdColumn::Index(index) => IdColumnRepr::Index(index),
        }
    }
}

impl FromStr for IdColumn {
    type Err = DriftmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(IdColumn::First),
            "last" => Ok(IdColumn::Last),
            other => other.parse::<usize>().map(IdColumn::Index).map_err(|_| {
                DriftmapError::Config(format!(
                    "id column must be 'first', 'last' or a column index, got '{}'",
                    s
                ))
            }),
        }
    }
}

impl IdColumn {
    /// Resolve to a concrete column index for a row of `width` columns.
    pub fn resolve(&self, width: usize) -> Result<usize> {
        let index = match self {
            IdColumn::First => 0,
            IdColumn::Last => width.checked_sub(1).ok_or_else(|| {
                DriftmapError::Interpretation("cannot take the last column of an empty row".into())
            })?,
            IdColumn::Index(index) => *index,
        };
        if index >= width {
            return Err(DriftmapError::Interpretation(format!(
                "id column {} is out of range for rows of width {}",
                index, width
            )));
        }
        Ok(index)
    }
}

/// How a label section's columns collapse into one label per row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelInterpretation {
    /// Single-column passthrough
    OneToOne,
    /// Row-wise argmax, ties resolve to the lowest column
    #[serde(alias = "index of highest")]
    IndexOfHighest,
    /// Row-wise argmin, ties resolve to the lowest column
    #[serde(alias = "index of lowest")]
    IndexOfLowest,
}

impl Default for LabelInterpretation {
    fn default() -> Self {
        LabelInterpretation::OneToOne
    }
}

impl FromStr for LabelInterpretation {
    type Err = DriftmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(' ', "-").as_str() {
            "one-to-one" => Ok(LabelInterpretation::OneToOne),
            "index-of-highest" => Ok(LabelInterpretation::IndexOfHighest),
            "index-of-lowest" => Ok(LabelInterpretation::IndexOfLowest),
            _ => Err(DriftmapError::Config(format!(
                "unknown label interpretation method '{}'",
                s
            ))),
        }
    }
}

/// Strategy used to pair feature rows with auxiliary rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchingScheme {
    /// Pair rows that share an id, or the nearest timestamp
    MatchSamples,
    /// Every feature row inherits the most recent auxiliary label
    UntilNext,
    /// Reserved; always rejected at match time
    FromPrevious,
}

impl Default for MatchingScheme {
    fn default() -> Self {
        MatchingScheme::MatchSamples
    }
}

impl fmt::Display for MatchingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchingScheme::MatchSamples => "match-samples",
            MatchingScheme::UntilNext => "until-next",
            MatchingScheme::FromPrevious => "from-previous",
        };
        f.write_str(name)
    }
}

impl FromStr for MatchingScheme {
    type Err = DriftmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "match-samples" => Ok(MatchingScheme::MatchSamples),
            "until-next" => Ok(MatchingScheme::UntilNext),
            "from-previous" => Ok(MatchingScheme::FromPrevious),
            _ => Err(DriftmapError::Config(format!("unknown matching scheme '{}'", s))),
        }
    }
}

/// A named, contiguous run of columns in a stream row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSection {
    pub name: String,
    pub length: usize,
}

impl StreamSection {
    pub fn new(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Static column schema of one stream
///
/// The id column (if any) is removed first; the remaining columns are
/// partitioned by `sections` in order, so a section's offset is the sum of
/// the lengths before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLayout {
    #[serde(default)]
    pub id_column: Option<IdColumn>,

    #[serde(default)]
    pub sections: Vec<StreamSection>,
}

impl StreamLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_column(mut self, column: IdColumn) -> Self {
        self.id_column = Some(column);
        self
    }

    pub fn with_section(mut self, name: impl Into<String>, length: usize) -> Self {
        self.sections.push(StreamSection::new(name, length));
        self
    }

    /// Column offset and length of a named section.
    pub fn section_range(&self, name: &str) -> Result<(usize, usize)> {
        let mut offset = 0;
        for section in &self.sections {
            if section.name == name {
                return Ok((offset, section.length));
            }
            offset += section.length;
        }
        Err(DriftmapError::Interpretation(format!(
            "stream layout has no section named '{}'",
            name
        )))
    }

    /// Total columns covered by the sections (id column excluded).
    pub fn sections_width(&self) -> usize {
        self.sections.iter().map(|s| s.length).sum()
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for section in &self.sections {
            if section.name.is_empty() {
                return Err(DriftmapError::Config("stream section name is empty".into()));
            }
            if section.length == 0 {
                return Err(DriftmapError::Config(format!(
                    "stream section '{}' has zero length",
                    section.name
                )));
            }
            if !names.insert(section.name.as_str()) {
                return Err(DriftmapError::Config(format!(
                    "stream section '{}' is declared twice",
                    section.name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of the feature stream, the optional auxiliary stream and
/// how the two are aligned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Name of the feature stream
    pub feature_stream: String,

    /// Name of the auxiliary (label) stream
    #[serde(default)]
    pub auxiliary_stream: Option<String>,

    /// Ring buffer size in seconds
    /// Default: 1.0
    #[serde(default = "default_buffer_size_s")]
    pub buffer_size_s: f64,

    /// Section of the feature layout holding the features.
    /// All non-id columns when absent.
    #[serde(default)]
    pub feature_section: Option<String>,

    /// Whether labels are read at all
    /// Default: true
    #[serde(default = "default_true")]
    pub watch_labels: bool,

    /// Section holding the label columns
    #[serde(default)]
    pub label_section: Option<String>,

    /// Labels come from the auxiliary stream instead of the feature stream
    #[serde(default)]
    pub labels_from_auxiliary_stream: bool,

    #[serde(default)]
    pub label_interpretation: LabelInterpretation,

    /// Align by id column instead of timestamp
    #[serde(default)]
    pub match_by_id: bool,

    #[serde(default)]
    pub matching_scheme: MatchingScheme,

    /// Fixed clock offset subtracted from auxiliary timestamps
    #[serde(default)]
    pub drift_offset_ms: f64,

    /// Maximum time distance for a timestamp pair to count as one event
    #[serde(default)]
    pub drift_tolerance_ms: Option<f64>,

    /// Maximum feature rows scanned per auxiliary sample when matching by time.
    /// The scan runs forward from the first unconsumed feature row.
    #[serde(default)]
    pub match_window: Option<usize>,

    #[serde(default)]
    pub feature_layout: StreamLayout,

    #[serde(default)]
    pub auxiliary_layout: StreamLayout,
}

fn default_buffer_size_s() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl StreamSettings {
    pub fn new(feature_stream: impl Into<String>) -> Self {
        Self {
            feature_stream: feature_stream.into(),
            auxiliary_stream: None,
            buffer_size_s: default_buffer_size_s(),
            feature_section: None,
            watch_labels: default_true(),
            label_section: None,
            labels_from_auxiliary_stream: false,
            label_interpretation: LabelInterpretation::default(),
            match_by_id: false,
            matching_scheme: MatchingScheme::default(),
            drift_offset_ms: 0.0,
            drift_tolerance_ms: None,
            match_window: None,
            feature_layout: StreamLayout::default(),
            auxiliary_layout: StreamLayout::default(),
        }
    }

    pub fn with_auxiliary_stream(mut self, name: impl Into<String>) -> Self {
        self.auxiliary_stream = Some(name.into());
        self.watch_labels = true;
        self.labels_from_auxiliary_stream = true;
        self
    }

    /// Read features only.
    pub fn without_labels(mut self) -> Self {
        self.watch_labels = false;
        self.labels_from_auxiliary_stream = false;
        self
    }

    pub fn with_buffer_size_s(mut self, seconds: f64) -> Self {
        self.buffer_size_s = seconds;
        self
    }

    pub fn with_feature_section(mut self, name: impl Into<String>) -> Self {
        self.feature_section = Some(name.into());
        self
    }

    pub fn with_label_section(
        mut self,
        name: impl Into<String>,
        interpretation: LabelInterpretation,
    ) -> Self {
        self.watch_labels = true;
        self.label_section = Some(name.into());
        self.label_interpretation = interpretation;
        self
    }

    pub fn with_matching(mut self, scheme: MatchingScheme, by_id: bool) -> Self {
        self.matching_scheme = scheme;
        self.match_by_id = by_id;
        self
    }

    pub fn with_drift(mut self, offset_ms: f64, tolerance_ms: Option<f64>) -> Self {
        self.drift_offset_ms = offset_ms;
        self.drift_tolerance_ms = tolerance_ms;
        self
    }

    pub fn with_match_window(mut self, rows: usize) -> Self {
        self.match_window = Some(rows);
        self
    }

    pub fn with_feature_layout(mut self, layout: StreamLayout) -> Self {
        self.feature_layout = layout;
        self
    }

    pub fn with_auxiliary_layout(mut self, layout: StreamLayout) -> Self {
        self.auxiliary_layout = layout;
        self
    }

    /// Labels are read from the auxiliary stream and must be matched.
    pub fn reads_auxiliary_labels(&self) -> bool {
        self.watch_labels && self.labels_from_auxiliary_stream
    }

    /// Labels are read from the feature stream itself.
    pub fn reads_feature_labels(&self) -> bool {
        self.watch_labels && !self.labels_from_auxiliary_stream
    }

    pub fn drift_offset_s(&self) -> f64 {
        self.drift_offset_ms / 1000.0
    }

    pub fn drift_tolerance_s(&self) -> Option<f64> {
        self.drift_tolerance_ms.map(|ms| ms / 1000.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feature_stream.trim().is_empty() {
            return Err(DriftmapError::Config("the feature stream name is empty".into()));
        }
        if !(self.buffer_size_s.is_finite() && self.buffer_size_s > 0.0) {
            return Err(DriftmapError::Config(format!(
                "stream buffer size must be positive, got {}",
                self.buffer_size_s
            )));
        }

        self.feature_layout.validate()?;
        if let Some(section) = &self.feature_section {
            self.feature_layout
                .section_range(section)
                .map_err(|_| config_missing_section("feature", section))?;
        }

        if self.watch_labels {
            let label_section = match self.label_section.as_deref() {
                Some(name) if !name.is_empty() => name,
                _ => {
                    return Err(DriftmapError::Config(
                        "asked to watch for labels, but no label section is specified".into(),
                    ))
                }
            };
            let layout = if self.labels_from_auxiliary_stream {
                &self.auxiliary_layout
            } else {
                &self.feature_layout
            };
            layout
                .section_range(label_section)
                .map_err(|_| config_missing_section("label", label_section))?;
        }

        if self.reads_auxiliary_labels() {
            match self.auxiliary_stream.as_deref() {
                Some(name) if !name.trim().is_empty() => {}
                _ => {
                    return Err(DriftmapError::Config(
                        "asked to read labels from the auxiliary stream, but its name is empty"
                            .into(),
                    ))
                }
            }
            self.auxiliary_layout.validate()?;

            if self.match_by_id {
                if self.feature_layout.id_column.is_none() {
                    return Err(DriftmapError::Config(
                        "matching by id requires an id column in the feature stream layout".into(),
                    ));
                }
                if self.auxiliary_layout.id_column.is_none() {
                    return Err(DriftmapError::Config(
                        "matching by id requires an id column in the auxiliary stream layout"
                            .into(),
                    ));
                }
            }
        }

        if let Some(tolerance) = self.drift_tolerance_ms {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(DriftmapError::Config(format!(
                    "drift tolerance must be a non-negative number of milliseconds, got {}",
                    tolerance
                )));
            }
        }
        if !self.drift_offset_ms.is_finite() {
            return Err(DriftmapError::Config("drift offset must be finite".into()));
        }
        if self.match_window == Some(0) {
            return Err(DriftmapError::Config("match window must be at least one row".into()));
        }

        Ok(())
    }
}

fn config_missing_section(kind: &str, name: &str) -> DriftmapError {
    DriftmapError::Config(format!(
        "{} section '{}' is not declared in the stream layout",
        kind, name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled_settings() -> StreamSettings {
        StreamSettings::new("eeg")
            .with_auxiliary_stream("markers")
            .with_label_section("class", LabelInterpretation::OneToOne)
            .with_feature_layout(StreamLayout::new().with_section("channels", 4))
            .with_auxiliary_layout(StreamLayout::new().with_section("class", 1))
    }

    #[test]
    fn test_section_offsets_sum_preceding_lengths() {
        let layout = StreamLayout::new()
            .with_section("a", 2)
            .with_section("b", 3)
            .with_section("c", 1);
        assert_eq!(layout.section_range("a").unwrap(), (0, 2));
        assert_eq!(layout.section_range("b").unwrap(), (2, 3));
        assert_eq!(layout.section_range("c").unwrap(), (5, 1));
        assert_eq!(layout.sections_width(), 6);
        assert!(matches!(
            layout.section_range("missing"),
            Err(DriftmapError::Interpretation(_))
        ));
    }

    #[test]
    fn test_validate_accepts_labeled_settings() {
        labeled_settings().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_label_section() {
        let mut settings = labeled_settings();
        settings.label_section = None;
        assert!(matches!(settings.validate(), Err(DriftmapError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_id_matching_without_id_columns() {
        let settings = labeled_settings().with_matching(MatchingScheme::MatchSamples, true);
        assert!(matches!(settings.validate(), Err(DriftmapError::Config(_))));
    }

    #[test]
    fn test_new_matches_deserialized_defaults() {
        let parsed: StreamSettings = toml::from_str(r#"feature_stream = "eeg""#).unwrap();
        let built = StreamSettings::new("eeg");
        assert!(built.watch_labels);
        assert_eq!(built.watch_labels, parsed.watch_labels);
        assert_eq!(
            built.labels_from_auxiliary_stream,
            parsed.labels_from_auxiliary_stream
        );
        assert_eq!(built.buffer_size_s, parsed.buffer_size_s);

        // Watching labels needs a label section.
        assert!(matches!(built.validate(), Err(DriftmapError::Config(_))));
        StreamSettings::new("eeg").without_labels().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_sections() {
        let layout = StreamLayout::new().with_section("a", 1).with_section("a", 2);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_id_column_parsing() {
        assert_eq!("First".parse::<IdColumn>().unwrap(), IdColumn::First);
        assert_eq!("last".parse::<IdColumn>().unwrap(), IdColumn::Last);
        assert_eq!("3".parse::<IdColumn>().unwrap(), IdColumn::Index(3));
        assert!("middle".parse::<IdColumn>().is_err());
        assert_eq!(IdColumn::Last.resolve(4).unwrap(), 3);
        assert!(IdColumn::Index(4).resolve(4).is_err());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let settings: StreamSettings = toml::from_str(
            r#"
            feature_stream = "eeg"
            auxiliary_stream = "markers"
            labels_from_auxiliary_stream = true
            label_section = "class"
            label_interpretation = "index of highest"
            matching_scheme = "until-next"
            match_by_id = true

            [feature_layout]
            id_column = "first"
            sections = [{ name = "channels", length = 8 }]

            [auxiliary_layout]
            id_column = 0
            sections = [{ name = "class", length = 3 }]
            "#,
        )
        .unwrap();

        assert_eq!(settings.label_interpretation, LabelInterpretation::IndexOfHighest);
        assert_eq!(settings.matching_scheme, MatchingScheme::UntilNext);
        assert_eq!(settings.feature_layout.id_column, Some(IdColumn::First));
        assert_eq!(settings.auxiliary_layout.id_column, Some(IdColumn::Index(0)));
        assert!(settings.watch_labels);
        settings.validate().unwrap();
    }
}
