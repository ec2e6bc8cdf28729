//! Feature store: named tables of derived and raw records.
//!
//! Extractors write one feature table each with replace-all semantics;
//! scheduling steps read them. The Postgres backend is the production
//! store; the in-memory backend serves tests and local development.

pub mod inventory;
pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryFeatureStore;
pub use postgres::PostgresFeatureStore;
pub use store::{
    fetch_all, to_rows, ColumnKind, ColumnSpec, Feature, FeatureStore, IndexSpec, SqlValue,
    TableSpec,
};
