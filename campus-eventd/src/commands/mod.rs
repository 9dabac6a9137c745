use anyhow::{Context, Result};
use campus_events::prelude::*;
use std::path::PathBuf;

pub mod archive;
pub mod config;
pub mod flush;
pub mod serve;
pub mod verify;

const SERVICE_NAME: &str = "campus-eventd";

/// Load configuration from `path`, or from the standard search path
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load_for_service(SERVICE_NAME).context("Failed to load configuration"),
    }
}

/// Connect the configured backends and assemble the pipeline
pub async fn connect(config: Config) -> Result<EventPipeline> {
    let pipeline = EventPipeline::builder(config)
        .with_configured_backends()
        .await
        .context("Failed to connect pipeline backends")?
        .build()?;
    tracing::info!(
        service = %pipeline.config().service.name,
        audit_enabled = pipeline.config().audit.enabled,
        "Pipeline assembled"
    );
    Ok(pipeline)
}
