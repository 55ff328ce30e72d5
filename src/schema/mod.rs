//! JSON Schema fetching, caching and validation

mod cache;
mod compiled;
mod source;

pub use cache::{CacheStats, SchemaCache};
pub use compiled::{CompiledSchema, Violation, ViolationKind};
pub use source::{DirSchemaSource, HttpSchemaSource, SchemaSource, StaticSchemaSource};
