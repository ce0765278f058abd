use crate::error::{DriftmapError, Result};
use crate::types::LabelCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for the projector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Name of the projection model implementation
    /// Default: "linear"
    #[serde(default = "default_projection_method")]
    pub projection_method: String,

    /// Initialize every refit from the previous embedding
    /// Default: false
    #[serde(default)]
    pub align_projections: bool,

    /// Minimum number of historic samples before a model is fit
    /// Default: 5
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Projecting loop frequency (Hz)
    /// Default: 1.0
    #[serde(default = "default_frequency_hz")]
    pub sampling_frequency_hz: f64,

    /// Refit loop frequency (Hz)
    /// Default: 1.0
    #[serde(default = "default_frequency_hz")]
    pub model_update_frequency_hz: f64,

    /// Split mixed batches into a supervised fit plus an unsupervised update.
    /// Default: false
    #[serde(default)]
    pub hybrid_training: bool,

    /// Label name to class code
    #[serde(default)]
    pub labels: BTreeMap<String, LabelCode>,

    /// Name operators use for samples without a class
    /// Default: "unclassified"
    #[serde(default = "default_unclassified_label")]
    pub unclassified_label: String,

    /// Model-specific parameters, passed through untouched
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
}

fn default_projection_method() -> String {
    "linear".to_string()
}

fn default_min_training_samples() -> usize {
    5
}

fn default_frequency_hz() -> f64 {
    1.0
}

fn default_unclassified_label() -> String {
    "unclassified".to_string()
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            projection_method: default_projection_method(),
            align_projections: false,
            min_training_samples: default_min_training_samples(),
            sampling_frequency_hz: default_frequency_hz(),
            model_update_frequency_hz: default_frequency_hz(),
            hybrid_training: false,
            labels: BTreeMap::new(),
            unclassified_label: default_unclassified_label(),
            hyperparameters: BTreeMap::new(),
        }
    }
}

impl ProjectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection_method(mut self, method: impl Into<String>) -> Self {
        self.projection_method = method.into();
        self
    }

    pub fn with_align_projections(mut self, align: bool) -> Self {
        self.align_projections = align;
        self
    }

    pub fn with_min_training_samples(mut self, min: usize) -> Self {
        self.min_training_samples = min;
        self
    }

    pub fn with_frequencies(mut self, sampling_hz: f64, model_update_hz: f64) -> Self {
        self.sampling_frequency_hz = sampling_hz;
        self.model_update_frequency_hz = model_update_hz;
        self
    }

    pub fn with_hybrid_training(mut self, enabled: bool) -> Self {
        self.hybrid_training = enabled;
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, code: LabelCode) -> Self {
        self.labels.insert(name.into(), code);
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.hyperparameters.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.projection_method.trim().is_empty() {
            return Err(DriftmapError::Config("projection method is empty".into()));
        }
        for (name, hz) in [
            ("sampling", self.sampling_frequency_hz),
            ("model update", self.model_update_frequency_hz),
        ] {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(DriftmapError::Config(format!(
                    "{} frequency must be positive, got {}",
                    name, hz
                )));
            }
        }
        if self.labels.contains_key(&self.unclassified_label) {
            return Err(DriftmapError::Config(format!(
                "label '{}' is reserved for unclassified samples",
                self.unclassified_label
            )));
        }
        Ok(())
    }
}
