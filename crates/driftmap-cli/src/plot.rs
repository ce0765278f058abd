//! Plot sinks for the CLI
//!
//! The dashboard is an external collaborator; the CLI either logs plot
//! traffic or records every point as one JSON line for offline viewing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use driftmap_core::{DriftmapError, LabelCode, PlotSink, SampleId};
use ndarray::ArrayView2;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// Plot sink selected on the command line
pub enum AppPlot {
    Log(LogPlotSink),
    JsonLines(JsonLinesPlotSink),
}

impl AppPlot {
    pub fn from_output(output: Option<&Path>) -> Result<Self> {
        match output {
            Some(path) => Ok(AppPlot::JsonLines(JsonLinesPlotSink::create(path)?)),
            None => Ok(AppPlot::Log(LogPlotSink)),
        }
    }

    fn sink(&self) -> &dyn PlotSink {
        match self {
            AppPlot::Log(sink) => sink,
            AppPlot::JsonLines(sink) => sink,
        }
    }
}

impl PlotSink for AppPlot {
    fn plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        self.sink().plot(embedding, ids, timestamps, labels)
    }

    fn update_plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        self.sink().update_plot(embedding, ids, timestamps, labels)
    }
}

/// Logs a summary of every plot call
pub struct LogPlotSink;

impl PlotSink for LogPlotSink {
    fn plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        _timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        debug!(
            points = embedding.nrows(),
            first_id = ids.first().copied().unwrap_or_default(),
            labeled = labels.iter().filter(|l| l.is_some()).count(),
            "Plotted new points"
        );
        Ok(())
    }

    fn update_plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        _ids: &[SampleId],
        _timestamps: &[f64],
        _labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        info!(points = embedding.nrows(), "Redrew plot with the promoted model");
        Ok(())
    }
}

#[derive(Serialize)]
struct PointRecord<'a> {
    kind: &'a str,
    id: SampleId,
    timestamp: f64,
    label: Option<LabelCode>,
    coordinates: Vec<f64>,
}

/// Writes one JSON object per plotted point
///
/// A `refresh` record opens every full redraw, so a reader replaying the
/// file drops earlier points when it sees one.
pub struct JsonLinesPlotSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesPlotSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create plot output {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_points(
        &self,
        kind: &str,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        if ids.len() != embedding.nrows()
            || timestamps.len() != embedding.nrows()
            || labels.len() != embedding.nrows()
        {
            return Err(DriftmapError::Plot(format!(
                "{} points with {} ids, {} timestamps and {} labels",
                embedding.nrows(),
                ids.len(),
                timestamps.len(),
                labels.len()
            )));
        }

        let mut writer = self.writer.lock();
        for (row, ((id, timestamp), label)) in embedding
            .rows()
            .into_iter()
            .zip(ids.iter().zip(timestamps).zip(labels))
        {
            let record = PointRecord {
                kind,
                id: *id,
                timestamp: *timestamp,
                label: *label,
                coordinates: row.to_vec(),
            };
            serde_json::to_writer(&mut *writer, &record)
                .map_err(|e| DriftmapError::Plot(e.to_string()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl PlotSink for JsonLinesPlotSink {
    fn plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        self.write_points("point", embedding, ids, timestamps, labels)
    }

    fn update_plot(
        &self,
        embedding: ArrayView2<'_, f64>,
        ids: &[SampleId],
        timestamps: &[f64],
        labels: &[Option<LabelCode>],
    ) -> driftmap_core::Result<()> {
        {
            let mut writer = self.writer.lock();
            writer.write_all(b"{\"kind\":\"refresh\"}\n")?;
        }
        self.write_points("redraw", embedding, ids, timestamps, labels)
    }
}
