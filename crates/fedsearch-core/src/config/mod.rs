//! Configuration management

use crate::error::{FedSearchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Deadline for the local phase (full-text + vector), in milliseconds
    #[serde(default = "default_phase1_timeout_ms")]
    pub phase1_timeout_ms: u64,

    /// Deadline for the remote provider phase, in milliseconds
    #[serde(default = "default_phase2_timeout_ms")]
    pub phase2_timeout_ms: u64,

    /// Limit used when a request asks for zero results
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound on any requested limit
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Minimum similarity for vector hits
    #[serde(default = "default_vector_min_score")]
    pub vector_min_score: f32,

    /// Rank fusion settings
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Rank fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Rank assigned to a result missing from a source
    #[serde(default = "default_rrf_missing_rank")]
    pub rrf_missing_rank: usize,

    /// Per-source weights for weighted-score fusion
    #[serde(default)]
    pub weights: SourceWeights,

    /// Recency boost factor applied after balanced/complete merges (0 disables)
    #[serde(default = "default_recency_boost")]
    pub recency_boost: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            rrf_missing_rank: default_rrf_missing_rank(),
            weights: SourceWeights::default(),
            recency_boost: default_recency_boost(),
        }
    }
}

/// Source weights for weighted-score fusion
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceWeights {
    pub text: f64,
    pub vector: f64,
    pub provider: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            text: 0.3,
            vector: 0.5,
            provider: 0.2,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached responses
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Period of the background expiry sweep, in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_phase1_timeout_ms() -> u64 {
    100
}

fn default_phase2_timeout_ms() -> u64 {
    2000
}

fn default_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    100
}

fn default_vector_min_score() -> f32 {
    0.3
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_rrf_missing_rank() -> usize {
    1000
}

fn default_recency_boost() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            phase1_timeout_ms: default_phase1_timeout_ms(),
            phase2_timeout_ms: default_phase2_timeout_ms(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            vector_min_score: default_vector_min_score(),
            fusion: FusionConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Load config from default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a YAML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SearchConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default path and apply `FEDSEARCH_*` overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CONFIG_DIR_NAME)
            .join("config.yml")
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FEDSEARCH_PHASE1_TIMEOUT_MS") {
            self.phase1_timeout_ms = parse_env("FEDSEARCH_PHASE1_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FEDSEARCH_PHASE2_TIMEOUT_MS") {
            self.phase2_timeout_ms = parse_env("FEDSEARCH_PHASE2_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FEDSEARCH_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("FEDSEARCH_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("FEDSEARCH_CACHE_DISABLED") {
            self.cache.enabled = !matches!(v.trim(), "1" | "true" | "yes");
        }
        self.validate()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.phase1_timeout_ms == 0 || self.phase2_timeout_ms == 0 {
            return Err(FedSearchError::Config(
                "phase timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_limit == 0 {
            return Err(FedSearchError::Config(
                "max_limit must be greater than zero".to_string(),
            ));
        }
        let w = &self.fusion.weights;
        if w.text < 0.0 || w.vector < 0.0 || w.provider < 0.0 {
            return Err(FedSearchError::Config(
                "source weights must not be negative".to_string(),
            ));
        }
        if self.fusion.rrf_k <= 0.0 {
            return Err(FedSearchError::Config("rrf_k must be positive".to_string()));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(FedSearchError::Config(
                "cache ttl must be greater than zero when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a requested limit into `1..=max_limit`, mapping zero to the default
    pub fn effective_limit(&self, requested: usize) -> usize {
        let limit = if requested == 0 {
            self.default_limit
        } else {
            requested
        };
        limit.clamp(1, self.max_limit)
    }

    pub fn phase1_timeout(&self) -> Duration {
        Duration::from_millis(self.phase1_timeout_ms)
    }

    pub fn phase2_timeout(&self) -> Duration {
        Duration::from_millis(self.phase2_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FedSearchError::Config(format!("invalid value for {}: {:?}", key, value)))
}
