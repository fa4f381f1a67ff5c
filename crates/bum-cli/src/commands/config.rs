//! Configuration commands.

use std::path::Path;

use crate::config::BumConfig;
use crate::error::{CliError, CliResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &BumConfig, path: &Path) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::Config(format!("failed to serialize config: {e}")))?;
    println!("# config.toml ({})", path.display());
    println!("{toml_str}");
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &BumConfig) -> CliResult<()> {
    config.validate()?;
    match config.server.media_root {
        Some(ref root) if !root.is_dir() => {
            return Err(CliError::Config(format!("media_root {} is not a directory", root.display())));
        }
        Some(_) => {}
        None => println!("No media_root set; pass the library to `bum serve`."),
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> CliResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
