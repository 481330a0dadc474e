//! Environment-driven configuration for the HTTP service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bundler_engine::EngineConfig;
use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub log_level: LevelFilter,
    pub log_to_file: bool,
    pub output_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind = match (lookup("BUNDLER_BIND"), lookup("PORT")) {
            (Some(bind), _) => bind
                .parse()
                .with_context(|| format!("BUNDLER_BIND is not a socket address: {bind}"))?,
            (None, Some(port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("PORT is not a port number: {port}"))?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            (None, None) => SocketAddr::from(([0, 0, 0, 0], 5000)),
        };

        let retention_secs = match lookup("BUNDLER_RETENTION_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("BUNDLER_RETENTION_SECS is not a number: {raw}"))?,
            None => 300,
        };

        let log_level = lookup("BUNDLER_LOG_LEVEL")
            .map(|raw| bundle_logging::parse_level(&raw, LevelFilter::Info))
            .unwrap_or(LevelFilter::Info);

        Ok(Self {
            bind,
            retention: Duration::from_secs(retention_secs),
            sweep_interval: Duration::from_secs(30),
            log_level,
            log_to_file: lookup("BUNDLER_LOG_FILE").is_some_and(|v| v == "1"),
            output_dir: lookup("BUNDLER_OUTPUT_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retention: self.retention,
            output_dir: self.output_dir.clone(),
            ..EngineConfig::default()
        }
    }
}
