use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn execute(path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
