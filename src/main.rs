//! Chainkit cache inspector
//!
//! Opens the persisted cache for the configured namespace and prints its
//! statistics (`stats`, the default) or empties it (`clear`).

use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainkit::{Cache, Config, FileStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "stats".to_string());

    let config = Config::from_env();
    info!(
        "Configuration loaded: namespace={}, capacity={}, ttl={}ms, policy={}, dir={}",
        config.cache_namespace,
        config.cache_capacity,
        config.cache_ttl_ms,
        config.cache_policy,
        config.storage_dir.display()
    );

    let storage = Arc::new(FileStorage::new(config.storage_dir.clone()));
    let cache = Cache::<Value>::open(config.cache_options(), storage)
        .await
        .context("failed to open cache")?;

    match command.as_str() {
        "stats" => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "clear" => {
            let removed = cache.len().await;
            cache.clear().await;
            info!("Cleared {} entries from namespace {}", removed, cache.namespace());
        }
        other => bail!("unknown command '{}', expected 'stats' or 'clear'", other),
    }

    Ok(())
}
