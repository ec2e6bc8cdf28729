//! Per-host capabilities: hypervisor type, CPU traits and availability
//! zone, joined from the hypervisor and aggregate inventories.

use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::features::{ColumnKind, ColumnSpec, Feature, IndexSpec, TableSpec};
use crate::triggers::sync_topic;

use super::{Extractor, SqlExtractor};

pub const NAME: &str = "host_capabilities";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub compute_host: String,
    pub hypervisor_type: String,
    /// Comma-separated trait names; matched by infix in step scopes.
    pub traits: String,
    /// Empty when the host is not in any zoned aggregate.
    pub availability_zone: String,
}

static TABLE: TableSpec = TableSpec {
    name: "feature_host_capabilities",
    columns: &[
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("hypervisor_type", ColumnKind::Text),
        ColumnSpec::new("traits", ColumnKind::Text),
        ColumnSpec::new("availability_zone", ColumnKind::Text),
    ],
    primary_key: &["compute_host"],
    indexes: &[IndexSpec {
        name: "feature_host_capabilities_az_idx",
        columns: &["availability_zone"],
    }],
};

impl Feature for HostCapabilities {
    fn table() -> &'static TableSpec {
        &TABLE
    }
}

const QUERY: &str = "\
SELECT DISTINCT ON (h.service_host) \
       h.service_host AS compute_host, \
       h.hypervisor_type, \
       COALESCE(h.cpu_traits, '') AS traits, \
       COALESCE(a.availability_zone, '') AS availability_zone \
FROM openstack_hypervisors h \
LEFT JOIN openstack_aggregates a \
       ON a.compute_host = h.service_host AND a.availability_zone IS NOT NULL \
ORDER BY h.service_host";

pub fn build(config: &ExtractorConfig) -> Box<dyn Extractor> {
    Box::new(SqlExtractor::new(
        NAME,
        &TABLE,
        QUERY,
        vec![
            sync_topic("openstack", "nova", "hypervisors"),
            sync_topic("openstack", "nova", "aggregates"),
        ],
        vec![],
        config.recency_seconds,
    ))
}
