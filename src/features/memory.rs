//! In-memory feature store for tests and local development.
//!
//! Tables are vectors of JSON rows behind one lock. `select` understands
//! the `SELECT * FROM <table>` form the typed helpers emit; anything more
//! elaborate (the SQL-backed extractors) must be stubbed with
//! [`MemoryFeatureStore::stub_query`].

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::store::{to_rows, Feature, FeatureStore, SqlValue, TableSpec};

#[derive(Debug)]
struct MemoryTable {
    rows: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    fixtures: RwLock<Vec<(String, Vec<Value>)>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feature's table and fill it in one call.
    pub async fn seed<F: Feature>(&self, features: &[F]) -> Result<()> {
        self.create_table(F::table()).await?;
        self.replace_all(F::table(), &to_rows(features)?).await
    }

    /// Register canned rows for a query; any `select` whose SQL contains
    /// `fragment` returns them.
    pub fn stub_query(&self, fragment: &str, rows: Vec<Value>) {
        self.fixtures
            .write()
            .expect("fixture lock poisoned")
            .push((fragment.to_string(), rows));
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .expect("table lock poisoned")
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        self.tables
            .write()
            .expect("table lock poisoned")
            .entry(spec.name.to_string())
            .or_insert_with(|| MemoryTable { rows: Vec::new() });
        Ok(())
    }

    async fn table_exists(&self, spec: &TableSpec) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .expect("table lock poisoned")
            .contains_key(spec.name))
    }

    async fn insert(&self, spec: &TableSpec, rows: &[Value]) -> Result<()> {
        let mut tables = self.tables.write().expect("table lock poisoned");
        let table = tables
            .get_mut(spec.name)
            .with_context(|| format!("table '{}' does not exist", spec.name))?;
        table.rows.extend(rows.iter().cloned());
        Ok(())
    }

    async fn replace_all(&self, spec: &TableSpec, rows: &[Value]) -> Result<()> {
        let mut tables = self.tables.write().expect("table lock poisoned");
        let table = tables
            .get_mut(spec.name)
            .with_context(|| format!("table '{}' does not exist", spec.name))?;
        table.rows = rows.to_vec();
        Ok(())
    }

    async fn select(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Value>> {
        if let Some(table) = sql.trim().strip_prefix("SELECT * FROM ") {
            let table = table.trim().trim_end_matches(';');
            let tables = self.tables.read().expect("table lock poisoned");
            return match tables.get(table) {
                Some(t) => Ok(t.rows.clone()),
                None => bail!("table '{table}' does not exist"),
            };
        }
        let fixtures = self.fixtures.read().expect("fixture lock poisoned");
        for (fragment, rows) in fixtures.iter() {
            if sql.contains(fragment.as_str()) {
                return Ok(rows.clone());
            }
        }
        bail!("in-memory store cannot evaluate query: {sql}");
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::features::store::{fetch_all, ColumnKind, ColumnSpec};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        host: String,
        value: f64,
    }

    static SAMPLE_TABLE: TableSpec = TableSpec {
        name: "feature_sample",
        columns: &[
            ColumnSpec::new("host", ColumnKind::Text),
            ColumnSpec::new("value", ColumnKind::Double),
        ],
        primary_key: &["host"],
        indexes: &[],
    };

    impl Feature for Sample {
        fn table() -> &'static TableSpec {
            &SAMPLE_TABLE
        }
    }

    #[tokio::test]
    async fn replace_all_swaps_contents() {
        let store = MemoryFeatureStore::new();
        store
            .seed(&[Sample {
                host: "a".into(),
                value: 1.0,
            }])
            .await
            .unwrap();
        store
            .replace_all(&SAMPLE_TABLE, &[json!({"host": "b", "value": 2.0})])
            .await
            .unwrap();
        let rows: Vec<Sample> = fetch_all(&store).await.unwrap();
        assert_eq!(
            rows,
            vec![Sample {
                host: "b".into(),
                value: 2.0
            }]
        );
    }

    #[tokio::test]
    async fn insert_requires_existing_table() {
        let store = MemoryFeatureStore::new();
        let err = store
            .insert(&SAMPLE_TABLE, &[json!({"host": "a", "value": 1.0})])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn stubbed_queries_are_served_by_fragment() {
        let store = MemoryFeatureStore::new();
        store.stub_query("FROM openstack_hypervisors", vec![json!({"host": "a"})]);
        let rows = store
            .select("SELECT host FROM openstack_hypervisors", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
