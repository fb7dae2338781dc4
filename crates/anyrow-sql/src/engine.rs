use crate::cache::MetadataCache;
use crate::collect::{ObjectCollector, RowCollector, RowSetCollector};
use crate::compose::{compose, ComposedQuery};
use crate::config::EngineConfig;
use crate::decode::DecodePolicy;
use crate::filter::{FilterSpec, KeySpec};
use crate::introspect::{self, COLUMNS_QUERY, SCHEMAS_QUERY, TABLES_QUERY};
use anyrow_core::catalog::{ColumnSchema, TableSchema};
use anyrow_core::error::{FetchError, FetchState, PartialFetch};
use anyrow_core::querier::Querier;
use anyrow_core::types::{NativeValue, Object};
use anyrow_protocol::messages::RowSet;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves table schemas, composes queries and decodes rows into collectors.
#[derive(Debug, Clone)]
pub struct FetchEngine {
    cache: Arc<MetadataCache>,
    config: EngineConfig,
    policy: DecodePolicy,
}

impl Default for FetchEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FetchEngine {
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(MetadataCache::from_config(&config));
        Self::with_cache(cache, config)
    }

    /// Engine sharing an existing cache, e.g. between several engines.
    pub fn with_cache(cache: Arc<MetadataCache>, config: EngineConfig) -> Self {
        let policy = DecodePolicy {
            demote_threshold: config.demote_threshold,
        };
        Self {
            cache,
            config,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Columns of `table_name`, read straight from the catalog.
    pub async fn resolve_columns(
        &self,
        conn: &dyn Querier,
        table_name: &str,
    ) -> Result<Vec<ColumnSchema>, FetchError> {
        let schema = self
            .bounded(
                COLUMNS_QUERY,
                introspect::resolve_table(conn, table_name, &self.config.default_schema),
            )
            .await?;
        Ok(schema.columns)
    }

    /// Cached schema for `cache_key`, resolving `table_name` on a miss.
    pub async fn table_schema(
        &self,
        conn: &dyn Querier,
        cache_key: &str,
        table_name: &str,
    ) -> Result<Arc<TableSchema>, FetchError> {
        trace!(state = ?FetchState::SchemaResolving, cache_key, "fetch");
        self.bounded(
            COLUMNS_QUERY,
            self.cache
                .resolve(conn, cache_key, table_name, &self.config.default_schema),
        )
        .await
        .map_err(failed)
    }

    /// Rows matching a free-form WHERE text. Blank text fetches everything;
    /// `limit` defaults to the configured limit. On failure the rows read so
    /// far come back in the error.
    pub async fn filter_objects(
        &self,
        conn: &dyn Querier,
        cache_key: &str,
        table_name: &str,
        where_text: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Object>, PartialFetch<Vec<Object>>> {
        let filter = FilterSpec::from_parts(Some(where_text), None, limit);
        filter.validate_limit().map_err(PartialFetch::empty)?;
        let schema = self
            .table_schema(conn, cache_key, table_name)
            .await
            .map_err(PartialFetch::empty)?;
        let mut collector = ObjectCollector::new();
        let result = self.fetch_into(conn, &schema, &filter, &mut collector).await;
        settle(result, collector.into_objects())
    }

    pub async fn fetch_objects(
        &self,
        conn: &dyn Querier,
        cache_key: &str,
        table_name: &str,
        keys: KeySpec,
    ) -> Result<Vec<Object>, PartialFetch<Vec<Object>>> {
        let filter = FilterSpec::keys(keys);
        let schema = self
            .table_schema(conn, cache_key, table_name)
            .await
            .map_err(PartialFetch::empty)?;
        let mut collector = ObjectCollector::new();
        let result = self.fetch_into(conn, &schema, &filter, &mut collector).await;
        settle(result, collector.into_objects())
    }

    /// Rows matching a key lookup, as a typed row set.
    pub async fn fetch_row_set(
        &self,
        conn: &dyn Querier,
        cache_key: &str,
        table_name: &str,
        keys: KeySpec,
    ) -> Result<RowSet, PartialFetch<RowSet>> {
        let filter = FilterSpec::keys(keys);
        let schema = self
            .table_schema(conn, cache_key, table_name)
            .await
            .map_err(PartialFetch::empty)?;
        let mut collector = RowSetCollector::for_table(&schema);
        let result = self.fetch_into(conn, &schema, &filter, &mut collector).await;
        settle(result, collector.into_row_set())
    }

    /// Runs one query for `schema` and feeds every decoded cell into
    /// `collector`. On error whatever was collected so far stays in the
    /// collector. Returns the number of rows read.
    pub async fn fetch_into<C: RowCollector>(
        &self,
        conn: &dyn Querier,
        schema: &TableSchema,
        filter: &FilterSpec,
        collector: &mut C,
    ) -> Result<usize, FetchError> {
        counter!("anyrow_fetch_total").increment(1);
        trace!(state = ?FetchState::QueryComposing, table = %schema.table_name, "fetch");
        let query = compose(schema, filter, self.config.default_limit).map_err(failed)?;
        debug!(sql = %query.sql, params = ?query.params, "fetch values");
        let rows = self
            .bounded(&query.sql, self.run(conn, schema, &query, collector))
            .await
            .map_err(failed)?;
        counter!("anyrow_fetch_rows_total").increment(rows as u64);
        trace!(state = ?FetchState::Done, rows, "fetch");
        Ok(rows)
    }

    async fn run<C: RowCollector>(
        &self,
        conn: &dyn Querier,
        schema: &TableSchema,
        query: &ComposedQuery,
        collector: &mut C,
    ) -> Result<usize, FetchError> {
        trace!(state = ?FetchState::Executing, "fetch");
        let mut rows = conn
            .query(&query.sql, &query.params)
            .await
            .map_err(|source| FetchError::Connectivity {
                sql: query.sql.clone(),
                params: query.params.clone(),
                source,
            })?;
        let mut count = 0;
        loop {
            let row = rows.next_row().await.map_err(|source| FetchError::RowRead {
                sql: query.sql.clone(),
                row: count,
                source,
            })?;
            let Some(values) = row else { break };
            if count == 0 {
                trace!(state = ?FetchState::RowDecoding, "fetch");
            }
            if values.len() > schema.columns.len() {
                return Err(FetchError::RowRead {
                    sql: query.sql.clone(),
                    row: count,
                    source: anyhow::anyhow!(
                        "row has {} values but {} has {} columns",
                        values.len(),
                        schema.qualified_name(),
                        schema.columns.len()
                    ),
                });
            }
            collector.begin_row(values.len());
            for (index, (value, column)) in values.iter().zip(&schema.columns).enumerate() {
                if matches!(value, NativeValue::Null) {
                    continue;
                }
                collector.store(index, column, self.policy.decode(value, column));
            }
            count += 1;
        }
        Ok(count)
    }

    pub async fn list_schemas(&self, conn: &dyn Querier) -> Result<Vec<String>, FetchError> {
        self.bounded(SCHEMAS_QUERY, introspect::list_schemas(conn))
            .await
    }

    pub async fn list_tables(
        &self,
        conn: &dyn Querier,
        schema: &str,
    ) -> Result<Vec<String>, FetchError> {
        self.bounded(TABLES_QUERY, introspect::list_tables(conn, schema))
            .await
    }

    /// Applies the configured query timeout. Dropping the future on expiry
    /// aborts the in-flight query.
    async fn bounded<T, F>(&self, sql: &str, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        match self.config.query_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| FetchError::Cancelled {
                    sql: sql.to_string(),
                    timeout,
                })?,
            None => fut.await,
        }
    }
}

fn settle<T>(result: Result<usize, FetchError>, collected: T) -> Result<T, PartialFetch<T>> {
    match result {
        Ok(_) => Ok(collected),
        Err(error) => Err(PartialFetch { collected, error }),
    }
}

fn failed(err: FetchError) -> FetchError {
    counter!("anyrow_fetch_errors_total").increment(1);
    debug!(state = ?err.state(), error = %err, "fetch failed");
    err
}
