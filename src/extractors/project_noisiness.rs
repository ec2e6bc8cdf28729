//! How noisy each project is on each host it currently occupies, from
//! per-VM CPU demand joined against the server inventory.

use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::features::{ColumnKind, ColumnSpec, Feature, IndexSpec, TableSpec};
use crate::triggers::sync_topic;

use super::{Extractor, SqlExtractor};

pub const NAME: &str = "project_noisiness";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNoisiness {
    pub project_id: String,
    pub compute_host: String,
    pub avg_cpu_demand_pct: f64,
}

static TABLE: TableSpec = TableSpec {
    name: "feature_project_noisiness",
    columns: &[
        ColumnSpec::new("project_id", ColumnKind::Text),
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("avg_cpu_demand_pct", ColumnKind::Double),
    ],
    primary_key: &["project_id", "compute_host"],
    indexes: &[IndexSpec {
        name: "feature_project_noisiness_project_idx",
        columns: &["project_id"],
    }],
};

impl Feature for ProjectNoisiness {
    fn table() -> &'static TableSpec {
        &TABLE
    }
}

const QUERY: &str = "\
SELECT v.project_id, \
       s.compute_host, \
       AVG(v.value) AS avg_cpu_demand_pct \
FROM vrops_virtualmachine_cpu_demand_ratio v \
JOIN openstack_servers s ON s.id = v.instance_uuid \
GROUP BY v.project_id, s.compute_host";

pub fn build(config: &ExtractorConfig) -> Box<dyn Extractor> {
    Box::new(SqlExtractor::new(
        NAME,
        &TABLE,
        QUERY,
        vec![
            sync_topic("prometheus", "alias", "vrops_virtualmachine_cpu_demand_ratio"),
            sync_topic("openstack", "nova", "servers"),
        ],
        vec![],
        config.recency_seconds,
    ))
}
