use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

/// campus-eventd - push hub and audit pipeline daemon
#[derive(Parser)]
#[command(name = "campus-eventd")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: search cwd, XDG and /etc)
    #[arg(long, short, global = true, env = "CAMPUS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the push hub, audit capture and background workers
    Serve,
    /// Move due records from the hot cache into the persistent store once
    Flush,
    /// Archive records past the retention threshold once
    Archive {
        /// List recent archive runs instead of running one
        #[arg(long)]
        list: bool,

        /// Number of runs to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Recompute digests of stored records and report mismatches
    Verify {
        /// Maximum number of records to check
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve => commands::serve::execute(cli.config).await,
        Commands::Flush => commands::flush::execute(cli.config).await,
        Commands::Archive { list, limit } => commands::archive::execute(cli.config, list, limit).await,
        Commands::Verify { limit } => commands::verify::execute(cli.config, limit).await,
        Commands::Config => commands::config::execute(cli.config),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}
