use anyrow_core::catalog::{ColumnSchema, TableSchema};
use serde::{Deserialize, Serialize};

/// Tagged cell of a wire row. The tag is fixed when the cell is stored so a
/// receiving process never has to guess the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float32(f32),
    /// JSON object text.
    Object(String),
    /// JSON array text.
    Array(String),
}

impl CellValue {
    pub fn tag(&self) -> &'static str {
        match self {
            CellValue::String(_) => "string",
            CellValue::Bool(_) => "bool",
            CellValue::Int64(_) => "int64",
            CellValue::Float32(_) => "float32",
            CellValue::Object(_) => "object",
            CellValue::Array(_) => "array",
        }
    }
}

/// One row; `None` marks an unset (NULL) cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireRow {
    pub cells: Vec<Option<CellValue>>,
}

impl WireRow {
    pub fn with_len(len: usize) -> Self {
        Self {
            cells: vec![None; len],
        }
    }
}

/// Schema-annotated rows meant to cross a process boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    pub rows: Vec<WireRow>,
}

impl RowSet {
    /// Empty row set carrying only the table name and columns of `schema`.
    pub fn for_table(schema: &TableSchema) -> Self {
        Self {
            table_name: schema.table_name.clone(),
            columns: schema.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
