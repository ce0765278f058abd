//! Seeded random linear projection
//!
//! A reference `ProjectionModel` with no learning beyond centering: fitting
//! draws a fixed random projection matrix from the configured seed. It keeps
//! the pipeline exercisable without a dimensionality-reduction library.

use std::collections::BTreeMap;

use driftmap_core::{DriftmapError, LabelCode, ProjectionModel, ProjectorConfig, Result};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// Configuration name of this model
pub const LINEAR_METHOD: &str = "linear";

const DEFAULT_SEED: u64 = 42;
const DEFAULT_COMPONENTS: usize = 2;

#[derive(Debug, Clone)]
pub struct LinearProjection {
    seed: u64,
    n_components: usize,
    mean: Option<Array1<f64>>,
    weights: Option<Array2<f64>>,
}

impl LinearProjection {
    pub fn new(seed: u64, n_components: usize) -> Self {
        Self {
            seed,
            n_components,
            mean: None,
            weights: None,
        }
    }

    /// Build from the `seed` and `n_components` hyperparameters.
    pub fn from_hyperparameters(params: &BTreeMap<String, Value>) -> Result<Self> {
        let seed = match params.get("seed") {
            None => DEFAULT_SEED,
            Some(value) => value.as_u64().ok_or_else(|| {
                DriftmapError::Config(format!(
                    "hyperparameter 'seed' must be an unsigned integer, got {}",
                    value
                ))
            })?,
        };
        let n_components = match params.get("n_components") {
            None => DEFAULT_COMPONENTS,
            Some(value) => value
                .as_u64()
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .ok_or_else(|| {
                    DriftmapError::Config(format!(
                        "hyperparameter 'n_components' must be a positive integer, got {}",
                        value
                    ))
                })?,
        };
        Ok(Self::new(seed, n_components))
    }

    /// Build from a projector configuration naming this model.
    pub fn from_config(config: &ProjectorConfig) -> Result<Self> {
        if config.projection_method != LINEAR_METHOD {
            return Err(DriftmapError::Config(format!(
                "projection method '{}' is not supported",
                config.projection_method
            )));
        }
        Self::from_hyperparameters(&config.hyperparameters)
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn is_fitted(&self) -> bool {
        self.weights.is_some()
    }

    fn embed(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let (mean, weights) = match (&self.mean, &self.weights) {
            (Some(mean), Some(weights)) => (mean, weights),
            _ => return Err(DriftmapError::Projection("linear projection is not fitted".into())),
        };
        if data.ncols() != mean.len() {
            return Err(DriftmapError::Shape(format!(
                "model was fitted on {} features, got {}",
                mean.len(),
                data.ncols()
            )));
        }
        Ok((&data - mean).dot(weights))
    }
}

impl Default for LinearProjection {
    fn default() -> Self {
        Self::new(DEFAULT_SEED, DEFAULT_COMPONENTS)
    }
}

impl ProjectionModel for LinearProjection {
    fn fit_new(
        &mut self,
        data: ArrayView2<'_, f64>,
        _labels: Option<&[LabelCode]>,
        _timestamps: Option<&[f64]>,
        prior_embedding: Option<ArrayView2<'_, f64>>,
    ) -> Result<()> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| DriftmapError::Projection("cannot fit on an empty dataset".into()))?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let weights =
            Array2::from_shape_fn((data.ncols(), self.n_components), |_| rng.gen_range(-1.0..=1.0));

        self.mean = Some(mean);
        self.weights = Some(weights);

        if let Some(prior) = prior_embedding {
            self.align_to(data, prior)?;
        }
        Ok(())
    }

    fn fit_update(&mut self, _data: ArrayView2<'_, f64>, _timestamps: Option<&[f64]>) -> Result<()> {
        Err(DriftmapError::Projection(
            "linear projection does not support incremental updates".into(),
        ))
    }

    fn project(
        &self,
        data: ArrayView2<'_, f64>,
        _existing_data: Option<ArrayView2<'_, f64>>,
    ) -> Result<Array2<f64>> {
        self.embed(data)
    }
}

impl LinearProjection {
    /// Flip components that anti-correlate with the prior embedding of the
    /// first rows of `data`.
    fn align_to(&mut self, data: ArrayView2<'_, f64>, prior: ArrayView2<'_, f64>) -> Result<()> {
        if prior.nrows() > data.nrows() {
            return Err(DriftmapError::Shape(format!(
                "prior embedding has {} rows for {} samples",
                prior.nrows(),
                data.nrows()
            )));
        }
        let embedding = self.embed(data.slice(s![..prior.nrows(), ..]))?;
        let Some(weights) = self.weights.as_mut() else {
            return Ok(());
        };

        let components = embedding.ncols().min(prior.ncols());
        for c in 0..components {
            let agreement: f64 = embedding
                .column(c)
                .iter()
                .zip(prior.column(c))
                .filter(|(a, b)| a.is_finite() && b.is_finite())
                .map(|(a, b)| a * b)
                .sum();
            if agreement < 0.0 {
                weights.column_mut(c).mapv_inplace(|w| -w);
            }
        }
        Ok(())
    }
}
