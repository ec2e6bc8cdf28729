//! SQL-backed extractor: a single embedded query produces the feature rows.
//!
//! Most built-ins are expressible as one query over the raw tables; the
//! runtime selects the rows and writes them back with replace-all
//! semantics.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::features::{FeatureStore, TableSpec};

use super::{Extractor, RecencyGate};

pub struct SqlExtractor {
    name: &'static str,
    table: &'static TableSpec,
    query: &'static str,
    triggers: Vec<String>,
    dependencies: Vec<String>,
    gate: RecencyGate,
    store: Option<Arc<dyn FeatureStore>>,
}

impl SqlExtractor {
    pub fn new(
        name: &'static str,
        table: &'static TableSpec,
        query: &'static str,
        triggers: Vec<String>,
        dependencies: Vec<String>,
        recency_seconds: u64,
    ) -> Self {
        Self {
            name,
            table,
            query,
            triggers,
            dependencies,
            gate: RecencyGate::new(recency_seconds),
            store: None,
        }
    }
}

#[async_trait]
impl Extractor for SqlExtractor {
    fn name(&self) -> &str {
        self.name
    }

    fn table(&self) -> &'static TableSpec {
        self.table
    }

    fn triggers(&self) -> &[String] {
        &self.triggers
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    async fn init(
        &mut self,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()> {
        if options.is_some() {
            warn!(extractor = self.name, "ignoring options on SQL-backed extractor");
        }
        store
            .create_table(self.table)
            .await
            .with_context(|| format!("extractor '{}' failed to create its table", self.name))?;
        self.store = Some(store);
        Ok(())
    }

    fn needs_update(&self) -> bool {
        self.gate.needs_update()
    }

    fn mark_updated(&self) {
        self.gate.mark_updated()
    }

    fn notify_skip(&self) {
        tracing::debug!(extractor = self.name, "within recency window, skipping");
    }

    fn next_possible_execution(&self) -> DateTime<Utc> {
        self.gate.next_possible_execution()
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let store = self
            .store
            .as_ref()
            .context("extractor was not initialized")?;
        store.select(self.query, &[]).await
    }
}
