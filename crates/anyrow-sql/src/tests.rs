#[cfg(test)]
mod tests {
    use crate::cache::MetadataCache;
    use crate::collect::ObjectCollector;
    use crate::compose::compose;
    use crate::config::EngineConfig;
    use crate::engine::FetchEngine;
    use crate::filter::{FilterSpec, KeySpec};
    use crate::introspect::{COLUMNS_QUERY, SCHEMAS_QUERY, TABLES_QUERY};
    use anyhow::Result;
    use anyrow_core::catalog::{ColumnSchema, TableSchema};
    use anyrow_core::error::{FetchError, FetchState};
    use anyrow_core::querier::{Querier, Rows, VecRows};
    use anyrow_core::types::{CanonicalValue, NativeValue, ParamValue};
    use anyrow_protocol::codec::{decode_row_set, encode_row_set};
    use anyrow_protocol::messages::CellValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct MockQuerier {
        catalog: HashMap<String, Vec<ColumnSchema>>,
        rows: Vec<Vec<NativeValue>>,
        row_error_after: Option<usize>,
        fail_queries: bool,
        delay: Option<Duration>,
        calls: Mutex<Vec<(String, Vec<ParamValue>)>>,
    }

    impl MockQuerier {
        fn with_table(mut self, schema: &str, table: &str, columns: Vec<ColumnSchema>) -> Self {
            self.catalog.insert(format!("{schema}.{table}"), columns);
            self
        }

        fn with_rows(mut self, rows: Vec<Vec<NativeValue>>) -> Self {
            self.rows = rows;
            self
        }

        fn calls(&self) -> Vec<(String, Vec<ParamValue>)> {
            self.calls.lock().unwrap().clone()
        }

        fn catalog_calls(&self) -> usize {
            self.calls().iter().filter(|(sql, _)| sql == COLUMNS_QUERY).count()
        }

        fn last_select(&self) -> Option<(String, Vec<ParamValue>)> {
            self.calls()
                .into_iter()
                .filter(|(sql, _)| sql.starts_with("SELECT \""))
                .last()
        }
    }

    fn text(param: &ParamValue) -> String {
        match param {
            ParamValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    #[async_trait]
    impl Querier for MockQuerier {
        async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<Box<dyn Rows>> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if sql == COLUMNS_QUERY {
                let key = format!("{}.{}", text(&params[1]), text(&params[0]));
                let rows = self
                    .catalog
                    .get(&key)
                    .map(|columns| {
                        columns
                            .iter()
                            .map(|c| {
                                vec![
                                    NativeValue::Text(c.name.clone()),
                                    NativeValue::Text(c.type_name.clone()),
                                    NativeValue::Text(if c.nullable { "YES" } else { "NO" }.into()),
                                    NativeValue::Bool(c.is_primary_key),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                return Ok(Box::new(VecRows::new(rows)));
            }
            if sql == SCHEMAS_QUERY {
                let mut schemas: Vec<String> = self
                    .catalog
                    .keys()
                    .filter_map(|k| k.split_once('.').map(|(s, _)| s.to_string()))
                    .collect();
                schemas.sort();
                schemas.dedup();
                let rows = schemas.into_iter().map(|s| vec![NativeValue::Text(s)]).collect();
                return Ok(Box::new(VecRows::new(rows)));
            }
            if sql == TABLES_QUERY {
                let schema = text(&params[0]);
                let mut tables: Vec<String> = self
                    .catalog
                    .keys()
                    .filter_map(|k| k.split_once('.'))
                    .filter(|(s, _)| *s == schema)
                    .map(|(_, t)| t.to_string())
                    .collect();
                tables.sort();
                let rows = tables.into_iter().map(|t| vec![NativeValue::Text(t)]).collect();
                return Ok(Box::new(VecRows::new(rows)));
            }
            if self.fail_queries {
                return Err(anyhow::anyhow!("connection refused"));
            }
            let mut rows = VecRows::default();
            for (i, row) in self.rows.iter().enumerate() {
                if self.row_error_after == Some(i) {
                    rows.push_error("server closed the connection unexpectedly");
                }
                rows.push_row(row.clone());
            }
            Ok(Box::new(rows))
        }
    }

    fn orders_columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", "integer").primary_key(),
            ColumnSchema::new("total", "double precision"),
            ColumnSchema::new("note", "text"),
        ]
    }

    fn orders_rows() -> Vec<Vec<NativeValue>> {
        vec![
            vec![
                NativeValue::Float64(7.0),
                NativeValue::Float64(12.5),
                NativeValue::Text("first".into()),
            ],
            vec![
                NativeValue::Int32(9),
                NativeValue::Float64(f64::MAX),
                NativeValue::Null,
            ],
        ]
    }

    fn orders_db() -> MockQuerier {
        MockQuerier::default()
            .with_table("public", "orders", orders_columns())
            .with_rows(orders_rows())
    }

    fn orders_schema() -> TableSchema {
        TableSchema::new("public", "orders", orders_columns())
    }

    #[tokio::test]
    async fn fetch_by_keys_composes_in_list_without_limit() {
        let engine = FetchEngine::default();
        let db = orders_db();
        let objects = engine
            .fetch_objects(&db, "orders", "orders", KeySpec::column_values("id", [7, 9]))
            .await
            .expect("fetch");
        let (sql, params) = db.last_select().expect("select issued");
        assert_eq!(
            sql,
            r#"SELECT "id","total","note" FROM public.orders WHERE id IN ($1,$2)"#
        );
        assert_eq!(params, vec![ParamValue::Int64(7), ParamValue::Int64(9)]);

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["id"], CanonicalValue::Int64(7));
        assert_eq!(objects[0]["total"], CanonicalValue::Float32(12.5));
        assert_eq!(objects[0]["note"], CanonicalValue::String("first".into()));
        assert_eq!(objects[1]["id"], CanonicalValue::Int64(9));
        assert!(matches!(objects[1]["total"], CanonicalValue::String(_)));
        assert!(!objects[1].contains_key("note"));
    }

    #[tokio::test]
    async fn empty_filter_fetches_with_default_limit() {
        let engine = FetchEngine::default();
        let db = orders_db();
        engine
            .filter_objects(&db, "orders", "orders", "", None)
            .await
            .expect("fetch");
        let (sql, params) = db.last_select().expect("select issued");
        assert!(sql.ends_with("WHERE true LIMIT 1000"), "{sql}");
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn where_text_with_caller_limit() {
        let engine = FetchEngine::default();
        let db = orders_db();
        engine
            .filter_objects(&db, "orders", "orders", "total > 10", Some(3))
            .await
            .expect("fetch");
        let (sql, _) = db.last_select().expect("select issued");
        assert_eq!(
            sql,
            r#"SELECT "id","total","note" FROM public.orders WHERE total > 10 LIMIT 3"#
        );
    }

    #[tokio::test]
    async fn where_text_keeps_its_ordering_before_the_limit() {
        let engine = FetchEngine::default();
        let db = orders_db();
        engine
            .filter_objects(&db, "orders", "orders", "total > 10 ORDER BY id DESC", Some(5))
            .await
            .expect("fetch");
        let (sql, _) = db.last_select().expect("select issued");
        assert_eq!(
            sql,
            r#"SELECT "id","total","note" FROM public.orders WHERE total > 10 ORDER BY id DESC LIMIT 5"#
        );
        let err = engine
            .filter_objects(
                &db,
                "orders",
                "orders",
                "total > 10 ORDER BY id; DROP TABLE orders",
                None,
            )
            .await
            .expect_err("stacked after ordering")
            .error;
        assert!(matches!(err, FetchError::InvalidFilter(_)));
    }

    #[test]
    fn pairs_compose_conjunction_in_order() {
        let schema = orders_schema();
        let filter = FilterSpec::keys(KeySpec::pairs([
            ("id", ParamValue::Int64(7)),
            ("note", ParamValue::Text("rush".into())),
        ]))
        .with_limit(50);
        let query = compose(&schema, &filter, 1000).expect("compose");
        assert_eq!(
            query.sql,
            r#"SELECT "id","total","note" FROM public.orders WHERE (id=$1 AND note=$2)"#
        );
        assert_eq!(
            query.params,
            vec![ParamValue::Int64(7), ParamValue::Text("rush".into())]
        );
    }

    #[test]
    fn single_column_lists_never_get_a_limit() {
        let schema = orders_schema();
        for n in 1..5usize {
            let values: Vec<i64> = (0..n as i64).collect();
            let filter = FilterSpec::keys(KeySpec::column_values("id", values)).with_limit(2);
            let query = compose(&schema, &filter, 1000).expect("compose");
            let expected: Vec<String> = (1..=n).map(|i| format!("${i}")).collect();
            assert!(query.sql.ends_with(&format!("WHERE id IN ({})", expected.join(","))));
            assert!(!query.sql.contains("LIMIT"));
            assert_eq!(query.params.len(), n);
        }
    }

    #[test]
    fn identifiers_are_quoted() {
        let schema = TableSchema::new(
            "sales",
            "weird",
            vec![ColumnSchema::new("select", "text"), ColumnSchema::new("Say \"hi\"", "text")],
        );
        let query = compose(&schema, &FilterSpec::all(), 10).expect("compose");
        assert_eq!(
            query.sql,
            r#"SELECT "select","Say ""hi""" FROM sales.weird WHERE true LIMIT 10"#
        );
    }

    #[tokio::test]
    async fn non_positive_limit_is_rejected_before_io() {
        let engine = FetchEngine::default();
        let db = orders_db();
        for limit in [0, -1] {
            let err = engine
                .filter_objects(&db, "orders", "orders", "", Some(limit))
                .await
                .expect_err("limit")
                .error;
            assert!(matches!(err, FetchError::InvalidFilter(_)));
            assert_eq!(err.state(), FetchState::QueryComposing);
        }
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_filters_never_reach_the_table() {
        let engine = FetchEngine::default();
        let db = orders_db();
        let err = engine
            .filter_objects(&db, "orders", "orders", "id = 1; DROP TABLE orders", None)
            .await
            .expect_err("stacked statement")
            .error;
        assert!(matches!(err, FetchError::InvalidFilter(_)));
        let err = engine
            .filter_objects(&db, "orders", "orders", "id = = 1", None)
            .await
            .expect_err("syntax")
            .error;
        assert!(matches!(err, FetchError::InvalidFilter(_)));
        let err = engine
            .fetch_objects(&db, "orders", "orders", KeySpec::column_values("missing", [1]))
            .await
            .expect_err("unknown column")
            .error;
        assert!(matches!(err, FetchError::InvalidFilter(_)));
        assert!(db.last_select().is_none());
    }

    #[tokio::test]
    async fn schema_is_cached_per_key() {
        let engine = FetchEngine::default();
        let db = orders_db();
        for _ in 0..3 {
            engine
                .filter_objects(&db, "orders", "orders", "", None)
                .await
                .expect("fetch");
        }
        assert_eq!(db.catalog_calls(), 1);
        engine
            .filter_objects(&db, "orders-alias", "orders", "", None)
            .await
            .expect("fetch");
        assert_eq!(db.catalog_calls(), 2);
        assert_eq!(engine.cache().len(), 2);
    }

    #[tokio::test]
    async fn failed_resolution_is_not_cached() {
        let engine = FetchEngine::default();
        let db = orders_db();
        let err = engine
            .filter_objects(&db, "nope", "nope", "", None)
            .await
            .expect_err("missing table")
            .error;
        assert!(matches!(err, FetchError::SchemaResolution { .. }));
        assert_eq!(err.state(), FetchState::SchemaResolving);
        assert!(engine.cache().is_empty());
        let _ = engine.filter_objects(&db, "nope", "nope", "", None).await;
        assert_eq!(db.catalog_calls(), 2);
    }

    #[tokio::test]
    async fn resolve_columns_reads_catalog_in_order() {
        let engine = FetchEngine::default();
        let db = MockQuerier::default().with_table("sales", "orders", orders_columns());
        let columns = engine
            .resolve_columns(&db, "sales.orders")
            .await
            .expect("columns");
        assert_eq!(columns, orders_columns());
        assert!(columns[0].is_primary_key);
        assert!(!columns[0].nullable);
        engine
            .resolve_columns(&db, "sales.orders")
            .await
            .expect("columns");
        assert_eq!(db.catalog_calls(), 2);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn row_set_is_fresh_and_survives_the_wire() {
        let engine = FetchEngine::default();
        let db = orders_db();
        let set = engine
            .fetch_row_set(&db, "orders", "orders", KeySpec::column_values("id", [7, 9]))
            .await
            .expect("fetch");
        assert_eq!(set.table_name, "orders");
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows[0].cells[0], Some(CellValue::Int64(7)));
        assert_eq!(set.rows[0].cells[1], Some(CellValue::Float32(12.5)));
        assert!(matches!(set.rows[1].cells[1], Some(CellValue::String(_))));
        assert_eq!(set.rows[1].cells[2], None);

        let cached = engine.cache().get("orders").expect("cached");
        assert_eq!(*cached, orders_schema());

        let again = engine
            .fetch_row_set(&db, "orders", "orders", KeySpec::column_values("id", [7]))
            .await
            .expect("fetch");
        assert_eq!(again.len(), 2);
        assert_eq!(set.len(), 2);

        let back = decode_row_set(&encode_row_set(&set).expect("encode")).expect("decode");
        assert_eq!(back, set);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_rows() {
        let engine = FetchEngine::default();
        let mut db = orders_db();
        db.row_error_after = Some(1);
        let schema = engine
            .table_schema(&db, "orders", "orders")
            .await
            .expect("schema");
        let mut collector = ObjectCollector::new();
        let err = engine
            .fetch_into(&db, &schema, &FilterSpec::all(), &mut collector)
            .await
            .expect_err("row error");
        assert!(matches!(err, FetchError::RowRead { row: 1, .. }));
        assert_eq!(err.state(), FetchState::RowDecoding);
        assert_eq!(collector.objects().len(), 1);
    }

    fn flaky_orders_db() -> MockQuerier {
        let mut rows = orders_rows();
        rows.push(vec![
            NativeValue::Int32(11),
            NativeValue::Float64(3.0),
            NativeValue::Text("late".into()),
        ]);
        let mut db = orders_db().with_rows(rows);
        db.row_error_after = Some(2);
        db
    }

    #[tokio::test]
    async fn filter_objects_returns_rows_read_before_a_failure() {
        let engine = FetchEngine::default();
        let db = flaky_orders_db();
        let partial = engine
            .filter_objects(&db, "orders", "orders", "", None)
            .await
            .expect_err("row error");
        assert!(matches!(partial.error, FetchError::RowRead { row: 2, .. }));
        assert_eq!(partial.state(), FetchState::RowDecoding);
        assert_eq!(partial.collected.len(), 2);
        assert_eq!(partial.collected[0]["id"], CanonicalValue::Int64(7));
        assert_eq!(partial.collected[1]["id"], CanonicalValue::Int64(9));
    }

    #[tokio::test]
    async fn fetch_objects_returns_rows_read_before_a_failure() {
        let engine = FetchEngine::default();
        let db = flaky_orders_db();
        let (objects, err) = engine
            .fetch_objects(&db, "orders", "orders", KeySpec::column_values("id", [7, 9, 11]))
            .await
            .expect_err("row error")
            .into_parts();
        assert!(matches!(err, FetchError::RowRead { row: 2, .. }));
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["note"], CanonicalValue::String("first".into()));
    }

    #[tokio::test]
    async fn fetch_row_set_returns_rows_read_before_a_failure() {
        let engine = FetchEngine::default();
        let db = flaky_orders_db();
        let partial = engine
            .fetch_row_set(&db, "orders", "orders", KeySpec::column_values("id", [7, 9, 11]))
            .await
            .expect_err("row error");
        assert!(matches!(partial.error, FetchError::RowRead { row: 2, .. }));
        let set = partial.collected;
        assert_eq!(set.table_name, "orders");
        assert_eq!(set.columns, orders_columns());
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows[1].cells[0], Some(CellValue::Int64(9)));
    }

    #[tokio::test]
    async fn failures_before_any_row_collect_nothing() {
        let engine = FetchEngine::default();
        let db = orders_db();
        let partial = engine
            .fetch_row_set(&db, "nope", "nope", KeySpec::column_values("id", [1]))
            .await
            .expect_err("missing table");
        assert!(matches!(partial.error, FetchError::SchemaResolution { .. }));
        assert!(partial.collected.is_empty());
    }

    #[tokio::test]
    async fn execution_errors_carry_sql_and_params() {
        let engine = FetchEngine::default();
        let mut db = orders_db();
        db.fail_queries = true;
        let err = engine
            .fetch_objects(&db, "orders", "orders", KeySpec::column_values("id", [42]))
            .await
            .expect_err("connectivity")
            .error;
        assert_eq!(err.state(), FetchState::Executing);
        let message = err.to_string();
        assert!(message.contains("connection refused"), "{message}");
        assert!(message.contains("WHERE id IN ($1)"), "{message}");
        assert!(message.contains("42"), "{message}");
    }

    #[tokio::test]
    async fn rows_wider_than_the_schema_are_rejected() {
        let engine = FetchEngine::default();
        let db = orders_db().with_rows(vec![vec![
            NativeValue::Int32(1),
            NativeValue::Float64(1.0),
            NativeValue::Text("a".into()),
            NativeValue::Text("extra".into()),
        ]]);
        let err = engine
            .filter_objects(&db, "orders", "orders", "", None)
            .await
            .expect_err("schema drift")
            .error;
        assert!(matches!(err, FetchError::RowRead { row: 0, .. }));
    }

    #[tokio::test]
    async fn slow_queries_are_cancelled() {
        let config = EngineConfig {
            query_timeout_ms: Some(20),
            ..EngineConfig::default()
        };
        let engine = FetchEngine::new(config);
        engine.cache().insert("orders", orders_schema());
        let mut db = orders_db();
        db.delay = Some(Duration::from_secs(5));
        let err = engine
            .filter_objects(&db, "orders", "orders", "", None)
            .await
            .expect_err("timeout")
            .error;
        assert!(matches!(err, FetchError::Cancelled { .. }));
        assert!(err.sql().is_some_and(|sql| sql.ends_with("LIMIT 1000")));
    }

    #[tokio::test]
    async fn lists_schemas_and_tables() {
        let engine = FetchEngine::default();
        let db = MockQuerier::default()
            .with_table("public", "orders", orders_columns())
            .with_table("public", "customers", orders_columns())
            .with_table("sales", "leads", orders_columns());
        let schemas = engine.list_schemas(&db).await.expect("schemas");
        assert_eq!(schemas, vec!["public".to_string(), "sales".to_string()]);
        let tables = engine.list_tables(&db, "public").await.expect("tables");
        assert_eq!(tables, vec!["customers".to_string(), "orders".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_cache() {
        let engine = Arc::new(FetchEngine::default());
        let db = Arc::new(orders_db());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .fetch_objects(&*db, "orders", "orders", KeySpec::column_values("id", [7]))
                    .await
                    .map(|objects| objects.len())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("join").expect("fetch"), 2);
        }
        assert_eq!(engine.cache().len(), 1);
        assert!(db.catalog_calls() >= 1);
    }

    #[test]
    fn cache_entries_expire_lazily_and_get_swept() {
        let cache = MetadataCache::new(Duration::from_millis(10), Duration::from_millis(10));
        let first = cache.insert("orders", orders_schema());
        let mut other = orders_schema();
        other.table_name = "other".into();
        let second = cache.insert("orders", other);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.get("orders").is_some());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("orders").is_none());
        assert!(cache.is_empty());

        let mut other = orders_schema();
        other.table_name = "other".into();
        let fresh = cache.insert("orders", other);
        assert_eq!(fresh.table_name, "other");
        assert!(cache.remove("orders"));
        assert!(!cache.remove("orders"));
    }
}
