//! Application configuration file

use anyhow::{Context, Result};
use driftmap_core::{ProjectorConfig, StreamSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level TOML document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub stream: StreamSettings,

    #[serde(default)]
    pub projector: ProjectorConfig,

    #[serde(default)]
    pub mock: MockConfig,
}

/// Mock feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Samples pushed per second
    /// Default: 20.0
    #[serde(default = "default_sampling_rate_hz")]
    pub sampling_rate_hz: f64,

    /// Feature columns when the feature layout declares no sections
    /// Default: 16
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,

    /// Fixed RNG seed; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sampling_rate_hz() -> f64 {
    20.0
}

fn default_feature_dim() -> usize {
    16
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: default_sampling_rate_hz(),
            feature_dim: default_feature_dim(),
            seed: None,
        }
    }
}

impl MockConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            anyhow::bail!(
                "mock sampling rate must be positive, got {}",
                self.sampling_rate_hz
            );
        }
        if self.feature_dim == 0 {
            anyhow::bail!("mock feature dimension must be positive");
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.stream.validate().context("Invalid [stream] section")?;
        self.projector
            .validate()
            .context("Invalid [projector] section")?;
        self.mock.validate().context("Invalid [mock] section")?;
        Ok(())
    }
}
