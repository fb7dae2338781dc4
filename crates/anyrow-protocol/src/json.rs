use crate::messages::{CellValue, RowSet};
use serde_json::{Map, Value};

impl CellValue {
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::String(v) => Value::String(v.clone()),
            CellValue::Bool(v) => Value::Bool(*v),
            CellValue::Int64(v) => Value::from(*v),
            CellValue::Float32(v) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            // embedded as-is; text that is not JSON degrades to a string
            CellValue::Object(text) | CellValue::Array(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
        }
    }
}

impl RowSet {
    /// Row at `index` as a map keyed by column name. Unset cells are omitted.
    pub fn row_map(&self, index: usize) -> Option<Map<String, Value>> {
        let row = self.rows.get(index)?;
        let mut map = Map::with_capacity(row.cells.len());
        for (column, cell) in self.columns.iter().zip(row.cells.iter()) {
            if let Some(cell) = cell {
                map.insert(column.name.clone(), cell.to_json());
            }
        }
        Some(map)
    }

    pub fn row_json(&self, index: usize) -> Option<String> {
        self.row_map(index).map(|m| Value::Object(m).to_string())
    }

    /// All rows as a JSON array of objects.
    pub fn to_json_string(&self) -> String {
        let rows = (0..self.rows.len())
            .filter_map(|i| self.row_map(i))
            .map(Value::Object)
            .collect::<Vec<_>>();
        Value::Array(rows).to_string()
    }
}
