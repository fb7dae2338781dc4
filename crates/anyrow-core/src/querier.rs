use crate::types::{NativeValue, ParamValue};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Cursor over the rows of one executed query.
#[async_trait]
pub trait Rows: Send {
    /// Next row as positional native values, `None` once exhausted.
    async fn next_row(&mut self) -> Result<Option<Vec<NativeValue>>>;
}

/// Connection capability the fetch engine needs: run a parameterized query.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<Box<dyn Rows>>;
}

/// Rows already materialized in memory.
#[derive(Debug, Default)]
pub struct VecRows {
    rows: VecDeque<Result<Vec<NativeValue>, String>>,
}

impl VecRows {
    pub fn new(rows: Vec<Vec<NativeValue>>) -> Self {
        Self {
            rows: rows.into_iter().map(Ok).collect(),
        }
    }

    /// Queues a row that fails when it is read.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.rows.push_back(Err(message.into()));
    }

    pub fn push_row(&mut self, row: Vec<NativeValue>) {
        self.rows.push_back(Ok(row));
    }
}

#[async_trait]
impl Rows for VecRows {
    async fn next_row(&mut self) -> Result<Option<Vec<NativeValue>>> {
        match self.rows.pop_front() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(None),
        }
    }
}
