pub mod cache;
pub mod collect;
pub mod compose;
pub mod config;
pub mod decode;
pub mod engine;
pub mod filter;
pub mod introspect;
pub mod parser;

pub use cache::MetadataCache;
pub use collect::{ObjectCollector, RowCollector, RowSetCollector};
pub use compose::{compose, ComposedQuery};
pub use config::EngineConfig;
pub use decode::{decode, DecodePolicy};
pub use engine::FetchEngine;
pub use filter::{Filter, FilterSpec, KeySpec};

#[cfg(test)]
mod tests;
