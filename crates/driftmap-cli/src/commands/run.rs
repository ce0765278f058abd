//! Run command implementation

use anyhow::{Context, Result};
use driftmap_core::LoopConfig;
use driftmap_projector::{LinearProjection, Projector, RefitOutcome};
use driftmap_stream::{DualStreamReader, RingBufferSource};
use driftmap_supervisor::{ProcessSupervisor, PROJECTING_LOOP, UPDATING_LOOP};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::console::{Console, Flow};
use crate::mock::{MockFeed, RowShape};
use crate::plot::AppPlot;

pub async fn execute(
    config_path: PathBuf,
    plot_output: Option<PathBuf>,
    duration: Option<u64>,
) -> Result<()> {
    let config = AppConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        feature_stream = %config.stream.feature_stream,
        "Starting driftmap"
    );

    // Projector
    let plot = Arc::new(AppPlot::from_output(plot_output.as_deref())?);
    let model = LinearProjection::from_config(&config.projector)
        .context("Failed to build the projection model")?;
    let projector = Arc::new(
        Projector::new(config.projector.clone(), model, plot)
            .context("Failed to create projector")?,
    );

    // Streams
    let stream = &config.stream;
    let rate = config.mock.sampling_rate_hz;
    let feature_shape = RowShape::features(stream, config.mock.feature_dim)?;
    let features = RingBufferSource::with_buffer_seconds(
        &stream.feature_stream,
        stream.buffer_size_s,
        rate,
        feature_shape.width(),
    );
    let mut feed_auxiliary = None;
    let auxiliary = if stream.reads_auxiliary_labels() {
        let shape = RowShape::auxiliary(stream)?;
        let source = RingBufferSource::with_buffer_seconds(
            stream.auxiliary_stream.as_deref().unwrap_or("auxiliary"),
            stream.buffer_size_s,
            rate,
            shape.width(),
        );
        feed_auxiliary = Some((source.inlet(), shape));
        Some(source)
    } else {
        None
    };
    let feed = MockFeed::new(
        &config.mock,
        (features.inlet(), feature_shape),
        feed_auxiliary,
    );
    let mut reader = DualStreamReader::new(stream.clone(), features, auxiliary)
        .context("Failed to create stream reader")?;

    // Loops
    let supervisor = Arc::new(ProcessSupervisor::new());
    {
        let projector = projector.clone();
        supervisor.register(
            LoopConfig::new(PROJECTING_LOOP, config.projector.sampling_frequency_hz),
            move || {
                if let Some(batch) = reader.read()? {
                    projector.project_new_data(batch.features, batch.timestamps, batch.labels)?;
                }
                Ok(())
            },
        )?;
    }
    {
        let projector = projector.clone();
        supervisor.register(
            LoopConfig::new(UPDATING_LOOP, config.projector.model_update_frequency_hz),
            move || {
                if let RefitOutcome::Fitted { samples, promoted } = projector.update_model()? {
                    tracing::debug!(samples, promoted, "Refit finished");
                }
                Ok(())
            },
        )?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let feed_task = tokio::spawn(feed.run(shutdown.clone()));
    supervisor.start_all()?;

    println!("driftmap running, type 'help' for commands");
    let console = Console::new(supervisor.clone(), projector.clone());
    run_console(&console, duration).await?;

    // Shutdown
    shutdown.store(true, Ordering::SeqCst);
    let stopping = supervisor.clone();
    let stats = tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("Supervisor shutdown task failed")?;
    feed_task.await.context("Mock feed task failed")?;

    for (name, loop_stats) in stats {
        tracing::info!(
            loop_name = %name,
            iterations = loop_stats.iterations,
            errors = loop_stats.errors,
            "Loop finished"
        );
    }
    println!(
        "Stopped after {} refits, {} samples in history",
        projector.update_count(),
        projector.history_len()
    );
    Ok(())
}

/// Read console lines until `exit`, Ctrl-C, or the duration elapses.
async fn run_console<M, P>(console: &Console<M, P>, duration: Option<u64>) -> Result<()>
where
    M: driftmap_core::ProjectionModel,
    P: driftmap_core::PlotSink + 'static,
{
    let mut lines = spawn_stdin_reader()?;
    let mut stdin_open = true;

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            line = lines.recv(), if stdin_open => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match console.dispatch(line).await {
                    Ok((Flow::Exit, _)) => break,
                    Ok((Flow::Continue, reply)) => println!("{}", reply),
                    Err(e) => println!("error: {:#}", e),
                },
                None => {
                    tracing::debug!("stdin closed, console input disabled");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("Run duration elapsed, shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Forward stdin lines from a detached thread.
///
/// A blocking stdin read cannot be cancelled, so it must not run on the
/// runtime's blocking pool or shutdown would wait for the next line.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read from stdin");
                        break;
                    }
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn the console reader")?;
    Ok(rx)
}
