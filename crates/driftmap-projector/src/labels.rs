use std::collections::BTreeMap;

use driftmap_core::{DriftmapError, Label, LabelCode, ProjectorConfig, Result};
use tracing::debug;

/// Resolves label names to class codes
///
/// Stored label columns use `None` for unclassified samples.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    codes: BTreeMap<String, LabelCode>,
    unclassified: String,
}

impl LabelMap {
    pub fn new(codes: BTreeMap<String, LabelCode>, unclassified: impl Into<String>) -> Self {
        Self {
            codes,
            unclassified: unclassified.into(),
        }
    }

    pub fn from_config(config: &ProjectorConfig) -> Self {
        Self::new(config.labels.clone(), config.unclassified_label.clone())
    }

    /// Resolve a streamed label. Unknown names count as unclassified.
    pub fn resolve(&self, label: &Label) -> Option<LabelCode> {
        match label {
            Label::Code(code) => Some(*code),
            Label::Unclassified => None,
            Label::Name(name) => {
                let code = self.code_of(name);
                if code.is_none() && *name != self.unclassified {
                    debug!(label = %name, "Unknown label name, treating as unclassified");
                }
                code
            }
        }
    }

    /// Resolve an operator-supplied name.
    ///
    /// The unclassified name maps to `None`; integer strings are taken as
    /// codes; anything else must be in the table.
    pub fn lookup(&self, name: &str) -> Result<Option<LabelCode>> {
        if name == self.unclassified {
            return Ok(None);
        }
        if let Some(code) = self.code_of(name) {
            return Ok(Some(code));
        }
        name.trim()
            .parse::<LabelCode>()
            .map(Some)
            .map_err(|_| DriftmapError::NotFound(format!("label '{}'", name)))
    }

    /// Name of a class code, for display.
    pub fn name_of(&self, code: Option<LabelCode>) -> Option<&str> {
        match code {
            None => Some(self.unclassified.as_str()),
            Some(code) => self
                .codes
                .iter()
                .find(|(_, c)| **c == code)
                .map(|(name, _)| name.as_str()),
        }
    }

    fn code_of(&self, name: &str) -> Option<LabelCode> {
        self.codes.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> LabelMap {
        LabelMap::from_config(
            &ProjectorConfig::new()
                .with_label("rest", 0)
                .with_label("task", 1),
        )
    }

    #[test]
    fn test_resolve() {
        let map = map();
        assert_eq!(map.resolve(&Label::Code(7)), Some(7));
        assert_eq!(map.resolve(&Label::from("task")), Some(1));
        assert_eq!(map.resolve(&Label::from("unclassified")), None);
        assert_eq!(map.resolve(&Label::from("bogus")), None);
        assert_eq!(map.resolve(&Label::Unclassified), None);
    }

    #[test]
    fn test_lookup() {
        let map = map();
        assert_eq!(map.lookup("rest").unwrap(), Some(0));
        assert_eq!(map.lookup("unclassified").unwrap(), None);
        assert_eq!(map.lookup("3").unwrap(), Some(3));
        assert!(matches!(map.lookup("bogus"), Err(DriftmapError::NotFound(_))));
    }

    #[test]
    fn test_name_of() {
        let map = map();
        assert_eq!(map.name_of(Some(1)), Some("task"));
        assert_eq!(map.name_of(None), Some("unclassified"));
        assert_eq!(map.name_of(Some(9)), None);
    }
}
