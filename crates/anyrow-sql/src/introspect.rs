use anyrow_core::catalog::{split_table_name, ColumnSchema, TableSchema};
use anyrow_core::error::FetchError;
use anyrow_core::querier::Querier;
use anyrow_core::types::{NativeValue, ParamValue};
use tracing::debug;

pub const COLUMNS_QUERY: &str = "SELECT c.column_name, c.data_type, c.is_nullable, \
EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
ON tc.constraint_name = kcu.constraint_name \
AND tc.table_schema = kcu.table_schema \
AND tc.table_name = kcu.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
AND tc.table_schema = c.table_schema \
AND tc.table_name = c.table_name \
AND kcu.column_name = c.column_name) AS is_primary_key \
FROM information_schema.columns c \
WHERE c.table_name = $1 AND c.table_schema = $2 \
ORDER BY c.ordinal_position";

pub const TABLES_QUERY: &str = "SELECT table_name FROM information_schema.tables \
WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

pub const SCHEMAS_QUERY: &str = "SELECT DISTINCT table_schema FROM information_schema.tables \
WHERE table_schema NOT IN ('pg_catalog', 'information_schema') ORDER BY table_schema";

/// Builds the column layout of `table_name` from the information schema.
/// Column order is kept exactly as returned.
pub async fn resolve_table(
    conn: &dyn Querier,
    table_name: &str,
    default_schema: &str,
) -> Result<TableSchema, FetchError> {
    let (schema_name, table) = split_table_name(table_name, default_schema);
    let params = [
        ParamValue::Text(table.to_string()),
        ParamValue::Text(schema_name.to_string()),
    ];
    let failed = |reason: String| FetchError::SchemaResolution {
        table: table_name.to_string(),
        reason,
    };
    let mut rows = conn
        .query(COLUMNS_QUERY, &params)
        .await
        .map_err(|e| failed(format!("{e:#}")))?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next_row().await.map_err(|e| failed(format!("{e:#}")))? {
        columns.push(column_from_row(&row).map_err(failed)?);
    }
    if columns.is_empty() {
        return Err(failed(format!("table {schema_name}.{table} not found")));
    }
    debug!(table = table_name, columns = columns.len(), "resolved table columns");
    Ok(TableSchema::new(schema_name, table, columns))
}

fn column_from_row(row: &[NativeValue]) -> Result<ColumnSchema, String> {
    let name = text_at(row, 0, "column_name")?;
    let type_name = text_at(row, 1, "data_type")?;
    let nullable = text_at(row, 2, "is_nullable")?.eq_ignore_ascii_case("YES");
    let is_primary_key = match row.get(3) {
        Some(NativeValue::Bool(b)) => *b,
        Some(NativeValue::Text(t)) => t == "t" || t.eq_ignore_ascii_case("true"),
        Some(NativeValue::Null) | None => false,
        Some(other) => return Err(format!("unexpected is_primary_key value {}", other.kind())),
    };
    Ok(ColumnSchema {
        name,
        type_name: type_name.to_lowercase(),
        nullable,
        is_primary_key,
    })
}

fn text_at(row: &[NativeValue], index: usize, field: &str) -> Result<String, String> {
    match row.get(index) {
        Some(NativeValue::Text(s)) => Ok(s.clone()),
        Some(other) => Err(format!("{field}: expected text, got {}", other.kind())),
        None => Err(format!("{field}: missing from catalog row")),
    }
}

pub async fn list_schemas(conn: &dyn Querier) -> Result<Vec<String>, FetchError> {
    names(conn, SCHEMAS_QUERY, Vec::new()).await
}

/// Base tables of `schema`.
pub async fn list_tables(conn: &dyn Querier, schema: &str) -> Result<Vec<String>, FetchError> {
    names(conn, TABLES_QUERY, vec![ParamValue::Text(schema.to_string())]).await
}

async fn names(
    conn: &dyn Querier,
    sql: &str,
    params: Vec<ParamValue>,
) -> Result<Vec<String>, FetchError> {
    let mut rows = match conn.query(sql, &params).await {
        Ok(rows) => rows,
        Err(source) => {
            return Err(FetchError::Connectivity {
                sql: sql.to_string(),
                params,
                source,
            })
        }
    };
    let mut out = Vec::new();
    let mut index = 0;
    loop {
        let row = rows.next_row().await.map_err(|source| FetchError::RowRead {
            sql: sql.to_string(),
            row: index,
            source,
        })?;
        let Some(row) = row else { break };
        match row.first() {
            Some(NativeValue::Text(name)) => out.push(name.clone()),
            other => {
                return Err(FetchError::RowRead {
                    sql: sql.to_string(),
                    row: index,
                    source: anyhow::anyhow!(
                        "expected a text name, got {}",
                        other.map(|v| v.kind()).unwrap_or("nothing")
                    ),
                })
            }
        }
        index += 1;
    }
    Ok(out)
}
