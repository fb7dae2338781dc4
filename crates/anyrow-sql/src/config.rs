use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_LIMIT: i64 = 1000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 10 * 60;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    /// LIMIT applied to unkeyed fetches when the caller gives none.
    pub default_limit: i64,
    /// Schema used for unqualified table names.
    pub default_schema: String,
    pub query_timeout_ms: Option<u64>,
    /// Double precision magnitudes above this are returned as decimal text.
    pub demote_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_sweep_secs: DEFAULT_CACHE_SWEEP_SECS,
            default_limit: DEFAULT_LIMIT,
            default_schema: anyrow_core::DEFAULT_SCHEMA.to_string(),
            query_timeout_ms: None,
            demote_threshold: f32::MAX as f64,
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_limit <= 0 {
            return Err(anyhow::anyhow!("default_limit must be greater than zero"));
        }
        if self.default_schema.trim().is_empty() {
            return Err(anyhow::anyhow!("default_schema must not be empty"));
        }
        if self.cache_sweep_secs < self.cache_ttl_secs {
            return Err(anyhow::anyhow!(
                "cache_sweep_secs ({}) must not be shorter than cache_ttl_secs ({})",
                self.cache_sweep_secs,
                self.cache_ttl_secs
            ));
        }
        if self.demote_threshold.is_nan() || self.demote_threshold <= 0.0 {
            return Err(anyhow::anyhow!("demote_threshold must be positive"));
        }
        if self.query_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("query_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}
