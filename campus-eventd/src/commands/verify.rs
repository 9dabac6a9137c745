use anyhow::Result;
use campus_events::{audit::verify_all, prelude::*};
use chrono::{Duration, Utc};
use colored::Colorize;
use std::path::PathBuf;

pub async fn execute(path: Option<PathBuf>, limit: usize) -> Result<()> {
    let config = super::load_config(path)?;
    init_tracing(&config)?;
    let pipeline = super::connect(config).await?;

    println!("{}", "Verifying stored audit records...".bold());
    let records = pipeline
        .store()
        .older_than(Utc::now() + Duration::seconds(1), 0, limit)
        .await?;
    let violations = verify_all(&records);

    let quarantined = pipeline.store().quarantined(limit).await?;

    println!("  Checked: {}", records.len());
    if !quarantined.is_empty() {
        println!("  {} {} staged payload(s) held in quarantine", "!".yellow().bold(), quarantined.len());
        for entry in &quarantined {
            println!("    {} {} ({})", entry.quarantined_at, entry.source_key, entry.reason);
        }
    }
    if violations.is_empty() {
        println!("{} all digests match", "✓".green().bold());
        return Ok(());
    }

    for violation in &violations {
        println!(
            "  {} {} stored={} computed={}",
            "✗".red().bold(),
            violation.record_id,
            violation.stored,
            violation.computed
        );
    }
    anyhow::bail!("{} record(s) failed integrity verification", violations.len())
}
