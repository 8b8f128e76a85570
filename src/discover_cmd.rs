use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use title_chain_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::discovery::{self, DiscoveryEngine};
use crate::gate::{ProviderGate, ThrottleGate};
use crate::migrate;
use crate::provider;
use crate::report;
use crate::seed;
use crate::sqlite_store::SqliteStore;

/// Run discovery for every seed file, `discovery.pool_size` properties at a
/// time, and print one summary row per property.
pub async fn run_discover(config: &Config, seed_paths: &[PathBuf], json: bool) -> Result<()> {
    if !config.provider.is_enabled() {
        bail!("Search provider is disabled. Set [provider] kind in config.");
    }
    if seed_paths.is_empty() {
        bail!("No seed files given.");
    }

    let seeds = seed_paths
        .iter()
        .map(|p| seed::load_seed(p))
        .collect::<Result<Vec<_>>>()?;

    let provider = provider::build_provider(&config.provider)?;
    let gate: Arc<dyn ProviderGate> = Arc::new(ThrottleGate::new(
        config.provider.max_concurrency,
        Duration::from_millis(config.provider.min_interval_ms),
    ));

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));

    tracing::info!(
        properties = seeds.len(),
        provider = provider.name(),
        pool_size = config.discovery.pool_size,
        "starting discovery"
    );

    let engine = Arc::new(DiscoveryEngine::from_config(config, store, provider, gate));
    let results = discovery::discover_many(engine, seeds, config.discovery.pool_size).await;

    if json {
        report::print_discovery_json(&results)?;
    } else {
        report::print_discovery(&results);
    }

    pool.close().await;
    Ok(())
}
