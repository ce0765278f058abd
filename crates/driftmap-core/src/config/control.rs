use crate::error::{DriftmapError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one periodic control loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Loop name, used for flags and logging
    pub name: String,

    /// Target execution frequency (Hz)
    pub frequency_hz: f64,
}

impl LoopConfig {
    pub fn new(name: impl Into<String>, frequency_hz: f64) -> Self {
        Self {
            name: name.into(),
            frequency_hz,
        }
    }

    /// Target period between two executions.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DriftmapError::Config("loop name is empty".into()));
        }
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(DriftmapError::Config(format!(
                "loop '{}' frequency must be positive, got {}",
                self.name, self.frequency_hz
            )));
        }
        Ok(())
    }
}
