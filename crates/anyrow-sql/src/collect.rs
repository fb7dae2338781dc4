use anyrow_core::catalog::{ColumnSchema, TableSchema};
use anyrow_core::types::{CanonicalValue, Object};
use anyrow_protocol::messages::{CellValue, RowSet, WireRow};

pub trait RowCollector {
    fn begin_row(&mut self, column_count: usize);
    fn store(&mut self, index: usize, column: &ColumnSchema, value: CanonicalValue);
}

#[derive(Debug, Default)]
pub struct ObjectCollector {
    objects: Vec<Object>,
}

impl ObjectCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }
}

impl RowCollector for ObjectCollector {
    fn begin_row(&mut self, column_count: usize) {
        self.objects.push(Object::with_capacity(column_count));
    }

    fn store(&mut self, _index: usize, column: &ColumnSchema, value: CanonicalValue) {
        if let Some(object) = self.objects.last_mut() {
            object.insert(column.name.clone(), value);
        }
    }
}

/// Collects rows into a fresh wire `RowSet`.
#[derive(Debug)]
pub struct RowSetCollector {
    set: RowSet,
}

impl RowSetCollector {
    pub fn for_table(schema: &TableSchema) -> Self {
        Self {
            set: RowSet::for_table(schema),
        }
    }

    pub fn row_set(&self) -> &RowSet {
        &self.set
    }

    pub fn into_row_set(self) -> RowSet {
        self.set
    }
}

impl RowCollector for RowSetCollector {
    fn begin_row(&mut self, column_count: usize) {
        self.set.rows.push(WireRow::with_len(column_count));
    }

    fn store(&mut self, index: usize, _column: &ColumnSchema, value: CanonicalValue) {
        if let Some(cell) = self
            .set
            .rows
            .last_mut()
            .and_then(|row| row.cells.get_mut(index))
        {
            *cell = to_cell(value);
        }
    }
}

/// Tags a canonical value for the wire. `Null` stays unset.
pub fn to_cell(value: CanonicalValue) -> Option<CellValue> {
    match value {
        CanonicalValue::Null => None,
        CanonicalValue::Bool(v) => Some(CellValue::Bool(v)),
        CanonicalValue::String(v) => Some(CellValue::String(v)),
        CanonicalValue::Int64(v) => Some(CellValue::Int64(v)),
        CanonicalValue::Float32(v) => Some(CellValue::Float32(v)),
        CanonicalValue::Json(text) => {
            if text.trim_start().starts_with('[') {
                Some(CellValue::Array(text))
            } else {
                Some(CellValue::Object(text))
            }
        }
    }
}
