use anyhow::{Context, Result};
use campus_events::prelude::*;
use colored::Colorize;
use std::path::PathBuf;

pub async fn execute(path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(path)?;
    init_tracing(&config)?;
    let pipeline = super::connect(config).await?;

    println!("{}", "Flushing hot cache...".bold());
    let report = pipeline
        .flush_worker()
        .run_once()
        .await
        .context("Flush run aborted")?;

    println!("  Scanned:    {}", report.scanned);
    println!("  Committed:  {}", report.committed.to_string().green());
    println!("  Duplicates: {}", report.duplicates);
    println!("  Expired:    {}", report.expired);
    println!("  Malformed:  {}", report.malformed);
    if report.tampered > 0 {
        println!("  Tampered:   {}", report.tampered.to_string().red().bold());
    }
    if report.failed > 0 {
        println!("  Failed:     {}", report.failed.to_string().yellow());
    }
    Ok(())
}
