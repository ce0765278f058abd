//! Shared value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the projector assigns to every accepted sample.
pub type SampleId = u64;

/// Integer class code a label resolves to.
pub type LabelCode = i64;

/// A label as delivered by a stream or an operator.
///
/// Numeric labels come straight from stream interpretation; named labels
/// come from operator corrections or string-typed streams and are resolved
/// through the projector's label map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Code(LabelCode),
    Name(String),
    Unclassified,
}

impl Label {
    /// Convert a raw stream value into a label.
    ///
    /// Non-finite values carry no class information.
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() {
            Label::Code(value as LabelCode)
        } else {
            Label::Unclassified
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Label::Unclassified)
    }
}

impl From<LabelCode> for Label {
    fn from(code: LabelCode) -> Self {
        Label::Code(code)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::Name(name.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Code(code) => write!(f, "{}", code),
            Label::Name(name) => write!(f, "{}", name),
            Label::Unclassified => write!(f, "unclassified"),
        }
    }
}
