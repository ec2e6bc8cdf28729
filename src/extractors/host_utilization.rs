//! Per-host capacity and utilization, derived from the Nova hypervisor
//! inventory.

use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::features::{ColumnKind, ColumnSpec, Feature, TableSpec};
use crate::triggers::sync_topic;

use super::{Extractor, SqlExtractor};

pub const NAME: &str = "host_utilization";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostUtilization {
    pub compute_host: String,
    pub vcpus: i64,
    pub vcpus_used: i64,
    pub memory_mb: i64,
    pub memory_mb_used: i64,
    pub local_gb: i64,
    pub local_gb_used: i64,
    pub ram_utilized_pct: f64,
    pub cpu_utilized_pct: f64,
    pub disk_utilized_pct: f64,
}

static TABLE: TableSpec = TableSpec {
    name: "feature_host_utilization",
    columns: &[
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("vcpus", ColumnKind::BigInt),
        ColumnSpec::new("vcpus_used", ColumnKind::BigInt),
        ColumnSpec::new("memory_mb", ColumnKind::BigInt),
        ColumnSpec::new("memory_mb_used", ColumnKind::BigInt),
        ColumnSpec::new("local_gb", ColumnKind::BigInt),
        ColumnSpec::new("local_gb_used", ColumnKind::BigInt),
        ColumnSpec::new("ram_utilized_pct", ColumnKind::Double),
        ColumnSpec::new("cpu_utilized_pct", ColumnKind::Double),
        ColumnSpec::new("disk_utilized_pct", ColumnKind::Double),
    ],
    primary_key: &["compute_host"],
    indexes: &[],
};

impl Feature for HostUtilization {
    fn table() -> &'static TableSpec {
        &TABLE
    }
}

// Hosts that are down have nothing to offer the scheduler.
const QUERY: &str = "\
SELECT service_host AS compute_host, \
       vcpus, vcpus_used, memory_mb, memory_mb_used, local_gb, local_gb_used, \
       CASE WHEN memory_mb > 0 THEN 100.0 * memory_mb_used / memory_mb ELSE 0.0 END AS ram_utilized_pct, \
       CASE WHEN vcpus > 0 THEN 100.0 * vcpus_used / vcpus ELSE 0.0 END AS cpu_utilized_pct, \
       CASE WHEN local_gb > 0 THEN 100.0 * local_gb_used / local_gb ELSE 0.0 END AS disk_utilized_pct \
FROM openstack_hypervisors \
WHERE state = 'up'";

pub fn build(config: &ExtractorConfig) -> Box<dyn Extractor> {
    Box::new(SqlExtractor::new(
        NAME,
        &TABLE,
        QUERY,
        vec![sync_topic("openstack", "nova", "hypervisors")],
        vec![],
        config.recency_seconds,
    ))
}
