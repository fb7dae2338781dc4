use anyrow_core::error::FetchError;
use anyrow_core::types::ParamValue;

/// Row restriction. Exactly one shape is active per fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    #[default]
    All,
    Where(String),
    In {
        column: String,
        values: Vec<ParamValue>,
    },
    Equals(Vec<(String, ParamValue)>),
}

impl Filter {
    pub fn normalized(self) -> Self {
        match self {
            Filter::In { values, .. } if values.is_empty() => Filter::All,
            Filter::Equals(pairs) if pairs.is_empty() => Filter::All,
            Filter::Where(text) if text.trim().is_empty() => Filter::All,
            other => other,
        }
    }

    pub fn is_keyed(&self) -> bool {
        match self {
            Filter::In { values, .. } => !values.is_empty(),
            Filter::Equals(pairs) => !pairs.is_empty(),
            Filter::All | Filter::Where(_) => false,
        }
    }

    pub fn parameters(&self) -> Vec<ParamValue> {
        match self {
            Filter::In { values, .. } => values.clone(),
            Filter::Equals(pairs) => pairs.iter().map(|(_, v)| v.clone()).collect(),
            Filter::All | Filter::Where(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeySpec {
    In {
        column: String,
        values: Vec<ParamValue>,
    },
    Equals(Vec<(String, ParamValue)>),
}

impl KeySpec {
    pub fn column_values<V: Into<ParamValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        KeySpec::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pairs<C: Into<String>, V: Into<ParamValue>>(
        pairs: impl IntoIterator<Item = (C, V)>,
    ) -> Self {
        KeySpec::Equals(
            pairs
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        )
    }
}

impl From<KeySpec> for Filter {
    fn from(keys: KeySpec) -> Self {
        match keys {
            KeySpec::In { column, values } => Filter::In { column, values },
            KeySpec::Equals(pairs) => Filter::Equals(pairs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    pub filter: Filter,
    pub limit: Option<i64>,
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn where_text(text: impl Into<String>) -> Self {
        Self {
            filter: Filter::Where(text.into()).normalized(),
            limit: None,
        }
    }

    pub fn keys(keys: KeySpec) -> Self {
        Self {
            filter: Filter::from(keys).normalized(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Combines caller inputs with the precedence IN > pairs > text > all.
    pub fn from_parts(where_text: Option<&str>, keys: Option<KeySpec>, limit: Option<i64>) -> Self {
        let keyed = keys.map(|k| Filter::from(k).normalized());
        let filter = match keyed {
            Some(f @ Filter::In { .. }) => f,
            Some(f @ Filter::Equals(_)) => f,
            _ => Filter::Where(where_text.unwrap_or_default().to_string()).normalized(),
        };
        Self { filter, limit }
    }

    pub fn validate_limit(&self) -> Result<(), FetchError> {
        match self.limit {
            Some(n) if n <= 0 => Err(FetchError::InvalidFilter(format!(
                "limit must be greater than zero, got {n}"
            ))),
            _ => Ok(()),
        }
    }

    /// LIMIT to emit, if any. Keyed lookups are never limited.
    pub fn effective_limit(&self, default_limit: i64) -> Option<i64> {
        if self.filter.is_keyed() {
            return None;
        }
        Some(self.limit.unwrap_or(default_limit))
    }
}
