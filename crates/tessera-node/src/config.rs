use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_archive::ArchiveConfig;
use tessera_storage::{BackendType, RegistryConfig};
use tessera_storage_market::{
    DealManagerConfig, LedgerAddress, MarketConfig, OptimizerConfig, RenewalPolicy, RetryPolicy,
};

pub const DEFAULT_CONFIG_FILE: &str = "tessera-config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub archive: ArchiveConfig,
    pub optimizer: OptimizerConfig,
    pub deals: DealsConfig,
    pub retry: RetryConfig,
    pub registry: RegistrySettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/node.key`
    pub key_file: Option<PathBuf>,
    /// Pick chunk sizes from the dataset size
    pub adaptive_chunking: bool,
    /// 0 uses every core
    pub compute_threads: usize,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            key_file: None,
            adaptive_chunking: true,
            compute_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DealsConfig {
    pub min_replicas: usize,
    pub epoch_duration_secs: u64,
    pub inclusion_timeout_secs: u64,
    pub poll_base_interval_secs: u64,
    pub poll_max_interval_secs: u64,
    pub max_polls: u32,
    pub verification_interval_secs: u64,
    pub challenges_per_verification: u32,
    pub max_consecutive_failures: u32,
    pub expiring_window_secs: u64,
    pub min_renewal_epochs: u64,
    pub require_signed_proofs: bool,
    pub retrieval_spot_check: bool,
    pub ledger_address: String,
    pub event_buffer: usize,
    pub renewal_policy: RenewalPolicy,
}

impl Default for DealsConfig {
    fn default() -> Self {
        let defaults = DealManagerConfig::default();
        Self {
            min_replicas: 3,
            epoch_duration_secs: defaults.epoch_duration.as_secs(),
            inclusion_timeout_secs: defaults.inclusion_timeout.as_secs(),
            poll_base_interval_secs: defaults.poll_base_interval.as_secs(),
            poll_max_interval_secs: defaults.poll_max_interval.as_secs(),
            max_polls: defaults.max_polls,
            verification_interval_secs: defaults.verification_interval.as_secs(),
            challenges_per_verification: defaults.challenges_per_verification,
            max_consecutive_failures: defaults.max_consecutive_failures,
            expiring_window_secs: defaults.expiring_window.as_secs(),
            min_renewal_epochs: defaults.min_renewal_epochs,
            require_signed_proofs: defaults.require_signed_proofs,
            retrieval_spot_check: defaults.retrieval_spot_check,
            ledger_address: defaults.ledger_address.0,
            event_buffer: defaults.event_buffer,
            renewal_policy: defaults.renewal_policy,
        }
    }
}

impl DealsConfig {
    pub fn to_manager_config(&self, retry: RetryPolicy) -> DealManagerConfig {
        DealManagerConfig {
            epoch_duration: Duration::from_secs(self.epoch_duration_secs),
            inclusion_timeout: Duration::from_secs(self.inclusion_timeout_secs),
            poll_base_interval: Duration::from_secs(self.poll_base_interval_secs),
            poll_max_interval: Duration::from_secs(self.poll_max_interval_secs),
            max_polls: self.max_polls,
            verification_interval: Duration::from_secs(self.verification_interval_secs),
            challenges_per_verification: self.challenges_per_verification,
            max_consecutive_failures: self.max_consecutive_failures,
            expiring_window: Duration::from_secs(self.expiring_window_secs),
            renewal_policy: self.renewal_policy,
            min_renewal_epochs: self.min_renewal_epochs,
            require_signed_proofs: self.require_signed_proofs,
            retrieval_spot_check: self.retrieval_spot_check,
            ledger_address: LedgerAddress(self.ledger_address.clone()),
            retry,
            event_buffer: self.event_buffer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub per_call_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            per_call_timeout_secs: defaults.per_call_timeout.as_secs(),
            max_attempts: defaults.max_attempts,
            backoff_base_ms: defaults.backoff_base.as_millis() as u64,
            backoff_max_secs: defaults.backoff_max.as_secs(),
            jitter: defaults.jitter,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            per_call_timeout: Duration::from_secs(self.per_call_timeout_secs),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// "memory" or "rocksdb"
    pub backend: String,
    /// Defaults to `<data_dir>/registry`
    pub path: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty", "compact" or "json"
    pub format: String,
    pub file_output: Option<PathBuf>,
    pub module_filters: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            module_filters: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))?;
        // Env overrides are applied by the caller so precedence stays in main
        Ok(config)
    }

    /// Load `path`, or `./tessera-config.toml` when present, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = env::var("TESSERA_DATA_DIR") {
            if !data_dir.is_empty() {
                self.node.data_dir = PathBuf::from(data_dir);
            }
        }
        if let Ok(chunk_size) = env::var("TESSERA_CHUNK_SIZE") {
            if let Ok(size) = chunk_size.parse() {
                self.archive.chunk_size = size;
                // An explicit chunk size wins over adaptive selection
                self.node.adaptive_chunking = false;
            }
        }
        if let Ok(fanout) = env::var("TESSERA_FANOUT") {
            if let Ok(val) = fanout.parse() {
                self.archive.fanout = val;
            }
        }
        if let Ok(backend) = env::var("TESSERA_REGISTRY_BACKEND") {
            if !backend.is_empty() {
                self.registry.backend = backend.to_lowercase();
            }
        }
        if let Ok(level) = env::var("TESSERA_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(replicas) = env::var("TESSERA_MIN_REPLICAS") {
            if let Ok(val) = replicas.parse() {
                self.deals.min_replicas = val;
            }
        }
        if let Ok(interval) = env::var("TESSERA_VERIFICATION_INTERVAL_SECS") {
            if let Ok(val) = interval.parse() {
                self.deals.verification_interval_secs = val;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive.chunk_size == 0 {
            bail!("archive.chunk_size must be non-zero");
        }
        if self.archive.fanout < 2 {
            bail!("archive.fanout must be at least 2, got {}", self.archive.fanout);
        }
        if self.deals.min_replicas == 0 {
            bail!("deals.min_replicas must be at least 1");
        }
        if self.deals.epoch_duration_secs == 0 {
            bail!("deals.epoch_duration_secs must be non-zero");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be within 0.0..=1.0, got {}", self.retry.jitter);
        }
        match self.registry.backend.as_str() {
            "memory" | "rocksdb" => {}
            other => bail!("unknown registry backend '{}'", other),
        }
        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => bail!("unknown logging format '{}'", other),
        }
        Ok(())
    }

    pub fn key_path(&self) -> PathBuf {
        self.node
            .key_file
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("node.key"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("registry"))
    }

    pub fn registry_config(&self) -> Result<RegistryConfig> {
        let backend_type = match self.registry.backend.as_str() {
            "memory" => BackendType::Memory,
            #[cfg(feature = "rocksdb")]
            "rocksdb" => BackendType::RocksDB {
                path: self.registry_path().to_string_lossy().into_owned(),
            },
            #[cfg(not(feature = "rocksdb"))]
            "rocksdb" => bail!("registry backend 'rocksdb' requires the rocksdb feature"),
            other => bail!("unknown registry backend '{}'", other),
        };
        Ok(RegistryConfig { backend_type })
    }

    pub fn market_config(&self) -> MarketConfig {
        MarketConfig {
            archive: self.archive.clone(),
            optimizer: self.optimizer.clone(),
            deals: self.deals.to_manager_config(self.retry.to_policy()),
            adaptive_chunking: self.node.adaptive_chunking,
            compute_threads: self.node.compute_threads,
        }
    }
}
