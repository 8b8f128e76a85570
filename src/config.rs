use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use title_chain_core::chain::ChainSettings;
use title_chain_core::names::NameMatcher;
use title_chain_core::queue::QueueSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub names: NamesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_gap_passes")]
    pub gap_passes: usize,
    #[serde(default = "default_gap_iterations")]
    pub gap_iterations: usize,
    #[serde(default = "default_adjacent_span")]
    pub adjacent_span: u64,
    #[serde(default = "default_mrta_years")]
    pub mrta_years: f64,
    #[serde(default = "default_anchor_gap_days")]
    pub anchor_gap_days: i64,
    #[serde(default = "default_name_threshold")]
    pub name_threshold: f64,
    #[serde(default = "default_legal_threshold")]
    pub legal_threshold: f64,
    #[serde(default = "default_short_period_days")]
    pub short_period_days: i64,
    #[serde(default = "default_max_permutations")]
    pub max_permutations: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_documents: default_max_documents(),
            gap_passes: default_gap_passes(),
            gap_iterations: default_gap_iterations(),
            adjacent_span: default_adjacent_span(),
            mrta_years: default_mrta_years(),
            anchor_gap_days: default_anchor_gap_days(),
            name_threshold: default_name_threshold(),
            legal_threshold: default_legal_threshold(),
            short_period_days: default_short_period_days(),
            max_permutations: default_max_permutations(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_max_iterations() -> usize {
    50
}
fn default_max_documents() -> usize {
    250
}
fn default_gap_passes() -> usize {
    2
}
fn default_gap_iterations() -> usize {
    15
}
fn default_adjacent_span() -> u64 {
    2
}
fn default_mrta_years() -> f64 {
    30.0
}
fn default_anchor_gap_days() -> i64 {
    730
}
fn default_name_threshold() -> f64 {
    0.85
}
fn default_legal_threshold() -> f64 {
    0.80
}
fn default_short_period_days() -> i64 {
    90
}
fn default_max_permutations() -> usize {
    12
}
fn default_pool_size() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_max_queue_size() -> usize {
    400
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: None,
            fixture_path: None,
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

fn default_provider_kind() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    2
}
fn default_min_interval_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NamesConfig {
    /// Appended to the built-in generic-name dictionary.
    #[serde(default)]
    pub generic: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults everywhere except the database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            discovery: DiscoveryConfig::default(),
            queue: QueueConfig::default(),
            provider: ProviderConfig::default(),
            names: NamesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_queue_size: self.queue.max_queue_size,
            max_attempts: self.queue.max_attempts,
            backoff: chrono::Duration::seconds(self.queue.backoff_secs as i64),
        }
    }

    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            mrta_years: self.discovery.mrta_years,
            anchor_gap_days: self.discovery.anchor_gap_days,
            short_period_days: self.discovery.short_period_days,
        }
    }

    pub fn name_matcher(&self) -> NameMatcher {
        NameMatcher::new(self.discovery.name_threshold).with_generic_names(self.names.generic.iter())
    }
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let d = &config.discovery;

    // Thresholds
    if !(d.name_threshold > 0.0 && d.name_threshold <= 1.0) {
        anyhow::bail!("discovery.name_threshold must be in (0.0, 1.0]");
    }
    if !(d.legal_threshold > 0.0 && d.legal_threshold <= 1.0) {
        anyhow::bail!("discovery.legal_threshold must be in (0.0, 1.0]");
    }
    if d.mrta_years <= 0.0 {
        anyhow::bail!("discovery.mrta_years must be > 0");
    }

    // Budgets
    if d.max_iterations == 0 {
        anyhow::bail!("discovery.max_iterations must be > 0");
    }
    if d.max_documents == 0 {
        anyhow::bail!("discovery.max_documents must be > 0");
    }
    if d.max_permutations == 0 {
        anyhow::bail!("discovery.max_permutations must be > 0");
    }
    if d.pool_size == 0 {
        anyhow::bail!("discovery.pool_size must be > 0");
    }
    if d.anchor_gap_days < 0 {
        anyhow::bail!("discovery.anchor_gap_days must be >= 0");
    }

    // Queue
    if config.queue.max_queue_size == 0 {
        anyhow::bail!("queue.max_queue_size must be > 0");
    }
    if config.queue.max_attempts < 1 {
        anyhow::bail!("queue.max_attempts must be >= 1");
    }

    // Provider
    let p = &config.provider;
    if p.max_concurrency == 0 {
        anyhow::bail!("provider.max_concurrency must be > 0");
    }
    match p.kind.as_str() {
        "disabled" => {}
        "http" => {
            if p.base_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                anyhow::bail!("provider.base_url must be specified when kind is 'http'");
            }
        }
        "fixture" => {
            if p.fixture_path.is_none() {
                anyhow::bail!("provider.fixture_path must be specified when kind is 'fixture'");
            }
        }
        other => anyhow::bail!(
            "Unknown provider kind: '{}'. Must be disabled, http, or fixture.",
            other
        ),
    }

    Ok(())
}
