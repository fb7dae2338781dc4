use crate::filter::{Filter, FilterSpec};
use crate::parser::parse_where;
use anyrow_core::catalog::TableSchema;
use anyrow_core::error::FetchError;
use anyrow_core::types::ParamValue;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
}

/// Builds the SELECT for `schema` restricted by `filter`. All validation
/// happens here, before anything is sent to the database.
pub fn compose(
    schema: &TableSchema,
    filter: &FilterSpec,
    default_limit: i64,
) -> Result<ComposedQuery, FetchError> {
    filter.validate_limit()?;
    if default_limit <= 0 {
        return Err(FetchError::InvalidFilter(format!(
            "default limit must be greater than zero, got {default_limit}"
        )));
    }
    if schema.columns.is_empty() {
        return Err(FetchError::SchemaResolution {
            table: schema.table_name.clone(),
            reason: "table has no columns".into(),
        });
    }
    let shape = filter.filter.clone().normalized();
    validate_filter(schema, &shape)?;

    let mut sql = String::from("SELECT ");
    for (i, column) in schema.columns.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&quote_ident(&column.name));
    }
    sql.push_str(" FROM ");
    sql.push_str(&schema.qualified_name());
    sql.push_str(" WHERE ");
    where_on(&shape, &mut sql);
    if let Some(limit) = filter.effective_limit(default_limit) {
        let _ = write!(sql, " LIMIT {limit}");
    }
    Ok(ComposedQuery {
        sql,
        params: shape.parameters(),
    })
}

fn where_on(filter: &Filter, out: &mut String) {
    match filter {
        Filter::In { column, values } => {
            let _ = write!(out, "{column} IN ({})", placeholders(1, values.len()));
        }
        Filter::Equals(pairs) => {
            out.push('(');
            for (i, (column, _)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push_str(" AND ");
                }
                let _ = write!(out, "{column}=${}", i + 1);
            }
            out.push(')');
        }
        Filter::Where(text) => out.push_str(text.trim()),
        Filter::All => out.push_str("true"),
    }
}

fn validate_filter(schema: &TableSchema, filter: &Filter) -> Result<(), FetchError> {
    let check_column = |column: &str| {
        if column.trim().is_empty() {
            return Err(FetchError::InvalidFilter("empty key column name".into()));
        }
        if schema.column(column).is_none() {
            return Err(FetchError::InvalidFilter(format!(
                "unknown column {column} in {}",
                schema.qualified_name()
            )));
        }
        Ok(())
    };
    match filter {
        Filter::In { column, .. } => check_column(column),
        Filter::Equals(pairs) => pairs.iter().try_for_each(|(c, _)| check_column(c)),
        Filter::Where(text) => parse_where(text).map(|_| ()),
        Filter::All => Ok(()),
    }
}

/// `$start,$start+1,..` for `count` parameters.
pub fn placeholders(start: usize, count: usize) -> String {
    let mut out = String::new();
    for i in start..start + count {
        if i > start {
            out.push(',');
        }
        let _ = write!(out, "${i}");
    }
    out
}

/// Double-quotes an identifier so reserved words and mixed case survive.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
