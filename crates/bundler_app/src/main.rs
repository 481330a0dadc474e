mod config;
mod logging;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bundle_logging::{bundle_debug, bundle_info};
use bundler_engine::{EngineHandle, NullHistoryStore, ProgressRegistry};
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::logging::LogDestination;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    logging::initialize(
        LogDestination::from_flag(config.log_to_file),
        config.log_level,
    );

    let engine = EngineHandle::with_reqwest(
        config.engine_config(),
        Arc::new(ProgressRegistry::new()),
        Arc::new(NullHistoryStore),
    )
    .context("failed to build the http client")?;

    spawn_sweeper(engine.clone(), config.sweep_interval);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    bundle_info!("Bundler listening on {}", config.bind);

    axum::serve(listener, routes::create_router(engine))
        .await
        .context("http server stopped")?;
    Ok(())
}

fn spawn_sweeper(engine: EngineHandle, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = engine.sweep();
            if removed > 0 {
                bundle_debug!("Swept {} expired tasks", removed);
            }
        }
    });
}
