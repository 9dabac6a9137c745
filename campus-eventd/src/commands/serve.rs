use anyhow::Result;
use campus_events::prelude::*;
use colored::Colorize;
use std::path::PathBuf;

pub async fn execute(path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(path)?;
    init_tracing(&config)?;

    let pipeline = super::connect(config).await?;
    let report = Server::new(pipeline).serve(Router::new()).await?;

    if report.drained {
        println!("{} pending audit records drained", "✓".green().bold());
    } else {
        println!(
            "{} audit queue did not drain before timeout; see the log for dropped records",
            "!".yellow().bold()
        );
    }
    println!("  Closed {} push connection(s)", report.closed_connections);
    Ok(())
}
