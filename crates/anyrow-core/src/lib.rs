pub mod catalog;
pub mod error;
pub mod querier;
pub mod types;

pub use catalog::{ColumnSchema, TableSchema, DEFAULT_SCHEMA};
pub use error::{FetchError, FetchState, PartialFetch};
pub use querier::{Querier, Rows, VecRows};
pub use types::{CanonicalValue, NativeValue, Object, ParamValue};
