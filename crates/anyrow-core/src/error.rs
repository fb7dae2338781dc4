use crate::types::ParamValue;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stages a single fetch moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    SchemaResolving,
    QueryComposing,
    Executing,
    RowDecoding,
    Done,
    Error,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("query failed: {source} (sql: {sql}, params: [{}])", render_params(.params))]
    Connectivity {
        sql: String,
        params: Vec<ParamValue>,
        #[source]
        source: anyhow::Error,
    },
    #[error("reading row {row} failed: {source} (sql: {sql})")]
    RowRead {
        sql: String,
        row: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot resolve columns of {table}: {reason}")]
    SchemaResolution { table: String, reason: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("query cancelled after {timeout:?} (sql: {sql})")]
    Cancelled { sql: String, timeout: Duration },
}

impl FetchError {
    /// State the fetch was in when the error was raised.
    pub fn state(&self) -> FetchState {
        match self {
            FetchError::SchemaResolution { .. } => FetchState::SchemaResolving,
            FetchError::InvalidFilter(_) => FetchState::QueryComposing,
            FetchError::Connectivity { .. } | FetchError::Cancelled { .. } => FetchState::Executing,
            FetchError::RowRead { .. } => FetchState::RowDecoding,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            FetchError::Connectivity { sql, .. }
            | FetchError::RowRead { sql, .. }
            | FetchError::Cancelled { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// A failed fetch together with the rows collected before the failure.
#[derive(Debug)]
pub struct PartialFetch<T> {
    pub collected: T,
    pub error: FetchError,
}

impl<T: Default> PartialFetch<T> {
    /// Failure raised before any row was read.
    pub fn empty(error: FetchError) -> Self {
        Self {
            collected: T::default(),
            error,
        }
    }
}

impl<T> PartialFetch<T> {
    pub fn state(&self) -> FetchState {
        self.error.state()
    }

    pub fn into_parts(self) -> (T, FetchError) {
        (self.collected, self.error)
    }
}

impl<T> fmt::Display for PartialFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T: fmt::Debug> StdError for PartialFetch<T> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

fn render_params(params: &[ParamValue]) -> String {
    params
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
