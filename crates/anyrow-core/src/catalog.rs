use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEMA: &str = "public";

/// One column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type, lower-cased (e.g. `integer`, `double precision`, `uuid`).
    pub type_name: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into().to_lowercase(),
            nullable: true,
            is_primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Column layout of a single table. Column order matches the order of values
/// in every fetched row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<ColumnSchema>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnSchema> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    /// `schema.table` as used in the FROM clause.
    pub fn qualified_name(&self) -> String {
        let schema = if self.schema_name.is_empty() {
            DEFAULT_SCHEMA
        } else {
            self.schema_name.as_str()
        };
        format!("{schema}.{}", self.table_name)
    }
}

/// Splits `schema.table` into its parts, falling back to `default_schema`.
pub fn split_table_name<'a>(name: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (schema, table),
        _ => (default_schema, name),
    }
}
