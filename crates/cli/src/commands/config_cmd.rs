//! `typeclaw config`: inspect or initialize the configuration file.

use anyhow::{Context, Result, bail};
use typeclaw_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

/// Print the effective configuration (file plus environment) with secrets masked.
pub fn show() -> Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }

    println!("# {}", AppConfig::config_path().display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(force: bool) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }

    std::fs::create_dir_all(AppConfig::config_dir())
        .with_context(|| format!("Failed to create {}", AppConfig::config_dir().display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
