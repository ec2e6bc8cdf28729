//! Per-host CPU contention aggregated from vROps host samples.

use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::features::{ColumnKind, ColumnSpec, Feature, TableSpec};
use crate::triggers::sync_topic;

use super::{Extractor, SqlExtractor};

pub const NAME: &str = "host_cpu_contention";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCpuContention {
    pub compute_host: String,
    pub avg_cpu_contention: f64,
    pub max_cpu_contention: f64,
}

static TABLE: TableSpec = TableSpec {
    name: "feature_host_cpu_contention",
    columns: &[
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("avg_cpu_contention", ColumnKind::Double),
        ColumnSpec::new("max_cpu_contention", ColumnKind::Double),
    ],
    primary_key: &["compute_host"],
    indexes: &[],
};

impl Feature for HostCpuContention {
    fn table() -> &'static TableSpec {
        &TABLE
    }
}

const QUERY: &str = "\
SELECT compute_host, \
       AVG(value) AS avg_cpu_contention, \
       MAX(value) AS max_cpu_contention \
FROM vrops_hostsystem_cpu_contention \
GROUP BY compute_host";

pub fn build(config: &ExtractorConfig) -> Box<dyn Extractor> {
    Box::new(SqlExtractor::new(
        NAME,
        &TABLE,
        QUERY,
        vec![sync_topic(
            "prometheus",
            "alias",
            "vrops_hostsystem_cpu_contention",
        )],
        vec![],
        config.recency_seconds,
    ))
}
