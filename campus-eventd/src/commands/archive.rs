use anyhow::{Context, Result};
use campus_events::prelude::*;
use colored::Colorize;
use std::path::PathBuf;

pub async fn execute(path: Option<PathBuf>, list: bool, limit: usize) -> Result<()> {
    let config = super::load_config(path)?;
    init_tracing(&config)?;
    let pipeline = super::connect(config).await?;

    if list {
        return list_runs(&pipeline, limit).await;
    }

    println!("{}", "Archiving aged records...".bold());
    let report = pipeline
        .archive_worker()
        .run_once()
        .await
        .context("Archive run aborted")?;

    let Some(descriptor) = report.descriptor else {
        if report.tampered > 0 {
            println!(
                "{} {} record(s) failed integrity checks and were retained",
                "✗".red().bold(),
                report.tampered
            );
        } else {
            println!("  Nothing due for archival");
        }
        return Ok(());
    };

    match descriptor.status {
        ArchiveStatus::Completed => println!(
            "{} {} archived {} record(s), deleted {}",
            "✓".green().bold(),
            descriptor.file_name,
            report.archived,
            report.deleted
        ),
        _ => println!(
            "{} {} {}: {}",
            "✗".red().bold(),
            descriptor.file_name,
            descriptor.status,
            descriptor.error.as_deref().unwrap_or("unknown error")
        ),
    }
    if report.tampered > 0 {
        println!("  Retained {} tampered record(s)", report.tampered.to_string().red());
    }
    Ok(())
}

async fn list_runs(pipeline: &EventPipeline, limit: usize) -> Result<()> {
    let runs = pipeline.catalog().recent(limit).await?;
    if runs.is_empty() {
        println!("No archive runs recorded");
        return Ok(());
    }

    for run in runs {
        let status = match run.status {
            ArchiveStatus::Completed => run.status.to_string().green(),
            ArchiveStatus::Pending => run.status.to_string().yellow(),
            ArchiveStatus::Failed => run.status.to_string().red(),
        };
        println!(
            "{}  {:<10} {:>8} records  {:>10} bytes  {} .. {}",
            run.file_name,
            status,
            run.record_count,
            run.byte_size,
            run.range_start.format("%Y-%m-%d %H:%M"),
            run.range_end.format("%Y-%m-%d %H:%M"),
        );
        if let Some(error) = run.error {
            println!("    {}", error.dimmed());
        }
    }
    Ok(())
}
