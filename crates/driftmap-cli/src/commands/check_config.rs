//! Check-config command implementation

use anyhow::{Context, Result};
use driftmap_projector::LinearProjection;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::mock::RowShape;

pub fn execute(config_path: PathBuf) -> Result<()> {
    tracing::info!("Checking configuration: {}", config_path.display());

    let config = AppConfig::load(&config_path)?;
    let model = LinearProjection::from_config(&config.projector)
        .context("Unsupported projection model")?;
    let feature_shape = RowShape::features(&config.stream, config.mock.feature_dim)?;

    let stream = &config.stream;
    println!("\nConfiguration");
    println!("{}", "=".repeat(60));
    println!("Path: {}", config_path.display());

    println!("\nStreams:");
    println!("  Feature stream: {}", stream.feature_stream);
    println!("  Feature row width: {}", feature_shape.width());
    match (&stream.auxiliary_stream, stream.reads_auxiliary_labels()) {
        (Some(name), true) => {
            println!("  Labels: auxiliary stream '{}'", name);
            println!(
                "  Matching: {} by {}",
                stream.matching_scheme,
                if stream.match_by_id { "id" } else { "timestamp" }
            );
        }
        _ if stream.reads_feature_labels() => println!("  Labels: feature stream"),
        _ => println!("  Labels: not watched"),
    }

    let projector = &config.projector;
    println!("\nProjector:");
    println!(
        "  Method: {} ({} components)",
        projector.projection_method,
        model.n_components()
    );
    println!("  Minimum training samples: {}", projector.min_training_samples);
    println!(
        "  Loops: projecting {} Hz, refitting {} Hz",
        projector.sampling_frequency_hz, projector.model_update_frequency_hz
    );
    println!("  Known labels: {}", projector.labels.len());

    println!("\n✓ Configuration is valid");
    Ok(())
}
