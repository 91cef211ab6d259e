//! Configuration resolution: CLI arguments plus an optional TOML file.
//! Values in the file override CLI arguments.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Values parsed from the TOML configuration file. Every field is
/// optional; missing ones fall back to the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub recompute_timeout_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))
    }
}

/// Values coming from the command line.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub recompute_timeout_sec: u64,
}

/// The final resolved configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub recompute_timeout: Duration,
}

impl AppConfig {
    pub fn resolve(cli: &CliConfig, file: Option<FileConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();
        let config = AppConfig {
            db_path: file.db_path.unwrap_or_else(|| cli.db_path.clone()),
            port: file.port.unwrap_or(cli.port),
            batch_size: file.batch_size.unwrap_or(cli.batch_size),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(cli.poll_interval_ms),
            ),
            recompute_timeout: Duration::from_secs(
                file.recompute_timeout_sec
                    .unwrap_or(cli.recompute_timeout_sec),
            ),
        };
        if config.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        Ok(config)
    }
}
