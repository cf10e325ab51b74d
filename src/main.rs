//! The pipehub device-data ingestion hub.

mod app;
mod config;
mod database;
mod describe;
#[cfg(test)]
mod describe_test;
mod endpoint;
mod engine;
mod error;
#[cfg(test)]
mod fixtures;
mod listener;
mod message;
mod registry;
mod runtime;
mod store;
#[cfg(test)]
mod store_test;
mod utils;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        storage_data_path = %cfg.storage_data_path,
        engine_timeout_seconds = %cfg.engine_timeout_seconds,
        "starting pipehub",
    );
    if let Err(err) = App::new(cfg)
        .await?
        .spawn()
        .await
        .context("error joining application task")
        .and_then(|res| res)
    {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
