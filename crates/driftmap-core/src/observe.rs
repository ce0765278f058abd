//! Optional metrics instrumentation for driftmap.
//!
//! When the `observe` feature is enabled, key operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

use std::time::Duration;

/// Record a batch of newly projected samples.
///
/// - `driftmap.projector.samples_total` – counter of accepted samples
/// - `driftmap.projector.embedded_total` – counter of samples embedded on arrival
#[inline]
pub fn record_projection(samples: usize, embedded: bool) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("driftmap.projector.samples_total").increment(samples as u64);
        if embedded {
            metrics::counter!("driftmap.projector.embedded_total").increment(samples as u64);
        }
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (samples, embedded);
    }
}

/// Record a model refit.
///
/// - `driftmap.refit.total` – counter with `outcome` label (`fit` / `skipped` / `fail`)
/// - `driftmap.refit.duration_seconds` – histogram
/// - `driftmap.refit.samples` – gauge of the batch size
#[inline]
pub fn record_refit(duration: Duration, samples: usize, outcome: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("driftmap.refit.total", "outcome" => outcome).increment(1);
        metrics::histogram!("driftmap.refit.duration_seconds").record(duration.as_secs_f64());
        metrics::gauge!("driftmap.refit.samples").set(samples as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, samples, outcome);
    }
}

/// Record a promotion of the latest model.
///
/// - `driftmap.promotion.total` – counter
/// - `driftmap.projection_cache.size` – gauge
#[inline]
pub fn record_promotion(cache_len: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("driftmap.promotion.total").increment(1);
        metrics::gauge!("driftmap.projection_cache.size").set(cache_len as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = cache_len;
    }
}

/// Record how long a caller waited for the projector data lock.
///
/// - `driftmap.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("driftmap.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a failed control-loop iteration.
///
/// - `driftmap.loop.errors_total` – counter with `loop` label
#[inline]
pub fn record_loop_error(loop_name: &str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("driftmap.loop.errors_total", "loop" => loop_name.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = loop_name;
    }
}

/// Record matched pairs produced by one read cycle.
///
/// - `driftmap.stream.matched_total` – counter
#[inline]
pub fn record_matched(pairs: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("driftmap.stream.matched_total").increment(pairs as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = pairs;
    }
}
