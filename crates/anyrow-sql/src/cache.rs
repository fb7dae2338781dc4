use crate::config::EngineConfig;
use crate::introspect::resolve_table;
use anyrow_core::catalog::TableSchema;
use anyrow_core::error::FetchError;
use anyrow_core::querier::Querier;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
    schema: Arc<TableSchema>,
    expires_at: Instant,
}

/// Time-bounded table schemas keyed by a caller-chosen cache key.
///
/// Expiry is lazy: an expired entry is treated as a miss on lookup and only
/// dropped from memory by the periodic sweep, which also runs lazily on access.
#[derive(Debug)]
pub struct MetadataCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl MetadataCache {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_ttl(), config.cache_sweep_interval())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Arc<TableSchema>> {
        let now = Instant::now();
        self.maybe_sweep(now);
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.schema.clone())
    }

    /// Publishes `schema` under `key`. When a live entry already exists the
    /// first writer wins and the existing schema is returned.
    pub fn insert(&self, key: &str, schema: TableSchema) -> Arc<TableSchema> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key).filter(|e| e.expires_at > now) {
            return existing.schema.clone();
        }
        let schema = Arc::new(schema);
        entries.insert(
            key.to_string(),
            CacheEntry {
                schema: schema.clone(),
                expires_at: now + self.ttl,
            },
        );
        schema
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached schema for `cache_key`, introspecting `table_name` on a miss.
    /// Failed resolutions are never cached.
    pub async fn resolve(
        &self,
        conn: &dyn Querier,
        cache_key: &str,
        table_name: &str,
        default_schema: &str,
    ) -> Result<Arc<TableSchema>, FetchError> {
        if let Some(schema) = self.get(cache_key) {
            counter!("anyrow_metadata_cache_hit_total").increment(1);
            return Ok(schema);
        }
        counter!("anyrow_metadata_cache_miss_total").increment(1);
        debug!(cache_key, table = table_name, "metadata cache miss");
        let schema = resolve_table(conn, table_name, default_schema).await?;
        Ok(self.insert(cache_key, schema))
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.sweep_interval {
                return;
            }
            *last = now;
        }
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        if entries.len() != before {
            debug!(removed = before - entries.len(), "swept expired metadata");
        }
    }
}
