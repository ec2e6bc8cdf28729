//! Whether each flavor still fits each host, and with how much room to
//! spare. Depends on the host utilization feature, so it re-runs in the
//! same campaign after `host_utilization` and additionally wakes on that
//! extractor's completion topic.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ExtractorConfig;
use crate::features::inventory::OpenStackFlavor;
use crate::features::{fetch_all, to_rows, ColumnKind, ColumnSpec, Feature, FeatureStore, IndexSpec, TableSpec};
use crate::triggers::feature_topic;

use super::host_utilization::{self, HostUtilization};
use super::{Extractor, RecencyGate};

pub const NAME: &str = "flavor_host_space";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorHostSpace {
    pub flavor_name: String,
    pub compute_host: String,
    pub fits: bool,
    pub ram_left_mb: i64,
    pub vcpus_left: i64,
    pub disk_left_gb: i64,
}

static TABLE: TableSpec = TableSpec {
    name: "feature_flavor_host_space",
    columns: &[
        ColumnSpec::new("flavor_name", ColumnKind::Text),
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("fits", ColumnKind::Bool),
        ColumnSpec::new("ram_left_mb", ColumnKind::BigInt),
        ColumnSpec::new("vcpus_left", ColumnKind::BigInt),
        ColumnSpec::new("disk_left_gb", ColumnKind::BigInt),
    ],
    primary_key: &["flavor_name", "compute_host"],
    indexes: &[IndexSpec {
        name: "feature_flavor_host_space_flavor_idx",
        columns: &["flavor_name"],
    }],
};

impl Feature for FlavorHostSpace {
    fn table() -> &'static TableSpec {
        &TABLE
    }
}

pub struct FlavorHostSpaceExtractor {
    triggers: Vec<String>,
    dependencies: Vec<String>,
    gate: RecencyGate,
    store: Option<Arc<dyn FeatureStore>>,
}

pub fn build(config: &ExtractorConfig) -> Box<dyn Extractor> {
    Box::new(FlavorHostSpaceExtractor {
        triggers: vec![feature_topic(host_utilization::NAME)],
        dependencies: vec![host_utilization::NAME.to_string()],
        gate: RecencyGate::new(config.recency_seconds),
        store: None,
    })
}

#[async_trait]
impl Extractor for FlavorHostSpaceExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn table(&self) -> &'static TableSpec {
        &TABLE
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
        _options: Option<serde_yaml::Value>,
    ) -> Result<()> {
        store
            .create_table(&TABLE)
            .await
            .context("flavor_host_space failed to create its table")?;
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
        tracing::debug!(extractor = NAME, "within recency window, skipping");
    }

    fn next_possible_execution(&self) -> DateTime<Utc> {
        self.gate.next_possible_execution()
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let store = self
            .store
            .as_ref()
            .context("extractor was not initialized")?;
        let hosts: Vec<HostUtilization> = fetch_all(store.as_ref()).await?;
        let flavors: Vec<OpenStackFlavor> = fetch_all(store.as_ref()).await?;

        let mut space = Vec::with_capacity(hosts.len() * flavors.len());
        for flavor in &flavors {
            for host in &hosts {
                let ram_left = host.memory_mb - host.memory_mb_used - flavor.ram_mb;
                let vcpus_left = host.vcpus - host.vcpus_used - flavor.vcpus;
                let disk_left =
                    host.local_gb - host.local_gb_used - flavor.disk_gb - flavor.ephemeral_gb;
                space.push(FlavorHostSpace {
                    flavor_name: flavor.name.clone(),
                    compute_host: host.compute_host.clone(),
                    fits: ram_left >= 0 && vcpus_left >= 0 && disk_left >= 0,
                    ram_left_mb: ram_left,
                    vcpus_left,
                    disk_left_gb: disk_left,
                });
            }
        }
        to_rows(&space)
    }
}
