//! Store contract shared by the Postgres and in-memory backends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Column type of a feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Double,
    BigInt,
    Bool,
    Jsonb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }
}

/// Secondary index declared on a table. Indexes exist for read latency of
/// the scheduling pipeline only; correctness never depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// Declarative description of one store table: columns, primary key and
/// indexes. Built-in extractors and raw inventory tables declare these as
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    pub primary_key: &'static [&'static str],
    pub indexes: &'static [IndexSpec],
}

/// A typed record stored in one table of the feature store.
pub trait Feature: Serialize + DeserializeOwned + Send {
    fn table() -> &'static TableSpec;
}

/// Bindable query parameter for [`FeatureStore::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Double(f64),
    BigInt(i64),
    Bool(bool),
}

/// Storage backend for feature and raw inventory tables.
///
/// `replace_all` is atomic: a failure anywhere leaves the previous table
/// contents intact. Rows travel as JSON objects keyed by column name;
/// typed access goes through [`fetch_all`].
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn create_table(&self, spec: &TableSpec) -> Result<()>;

    async fn table_exists(&self, spec: &TableSpec) -> Result<bool>;

    async fn insert(&self, spec: &TableSpec, rows: &[Value]) -> Result<()>;

    async fn replace_all(&self, spec: &TableSpec, rows: &[Value]) -> Result<()>;

    async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>>;
}

/// Read every row of a feature's table into its typed form.
pub async fn fetch_all<F: Feature>(store: &dyn FeatureStore) -> Result<Vec<F>> {
    let table = F::table();
    let rows = store
        .select(&format!("SELECT * FROM {}", table.name), &[])
        .await
        .with_context(|| format!("failed to read table '{}'", table.name))?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .with_context(|| format!("malformed row in table '{}'", table.name))
        })
        .collect()
}

/// Serialize typed features into the JSON rows the store accepts.
pub fn to_rows<F: Feature>(features: &[F]) -> Result<Vec<Value>> {
    features
        .iter()
        .map(|f| serde_json::to_value(f).context("failed to serialize feature row"))
        .collect()
}
