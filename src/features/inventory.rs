//! Raw inventory and telemetry records.
//!
//! These tables are written by external syncers; Cortex only reads them and
//! tolerates missing rows (upstream not ready). The table definitions live
//! in the embedded migrations; the record types here give extractors and
//! the commitment handler typed access.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::{ColumnKind, ColumnSpec, Feature, IndexSpec, TableSpec};

/// Hypervisor inventory row as synced from Nova.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStackHypervisor {
    pub service_host: String,
    pub hypervisor_hostname: String,
    pub hypervisor_type: String,
    pub state: String,
    pub vcpus: i64,
    pub memory_mb: i64,
    pub local_gb: i64,
    pub vcpus_used: i64,
    pub memory_mb_used: i64,
    pub local_gb_used: i64,
    #[serde(default)]
    pub cpu_traits: Option<String>,
}

static OPENSTACK_HYPERVISORS: TableSpec = TableSpec {
    name: "openstack_hypervisors",
    columns: &[
        ColumnSpec::new("service_host", ColumnKind::Text),
        ColumnSpec::new("hypervisor_hostname", ColumnKind::Text),
        ColumnSpec::new("hypervisor_type", ColumnKind::Text),
        ColumnSpec::new("state", ColumnKind::Text),
        ColumnSpec::new("vcpus", ColumnKind::BigInt),
        ColumnSpec::new("memory_mb", ColumnKind::BigInt),
        ColumnSpec::new("local_gb", ColumnKind::BigInt),
        ColumnSpec::new("vcpus_used", ColumnKind::BigInt),
        ColumnSpec::new("memory_mb_used", ColumnKind::BigInt),
        ColumnSpec::new("local_gb_used", ColumnKind::BigInt),
        ColumnSpec {
            name: "cpu_traits",
            kind: ColumnKind::Text,
            nullable: true,
        },
    ],
    primary_key: &["service_host"],
    indexes: &[],
};

impl Feature for OpenStackHypervisor {
    fn table() -> &'static TableSpec {
        &OPENSTACK_HYPERVISORS
    }
}

/// Flavor inventory row as synced from Nova.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStackFlavor {
    pub id: String,
    pub name: String,
    pub vcpus: i64,
    pub ram_mb: i64,
    pub disk_gb: i64,
    pub ephemeral_gb: i64,
    #[serde(default)]
    pub extra_specs: Value,
}

static OPENSTACK_FLAVORS: TableSpec = TableSpec {
    name: "openstack_flavors",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("vcpus", ColumnKind::BigInt),
        ColumnSpec::new("ram_mb", ColumnKind::BigInt),
        ColumnSpec::new("disk_gb", ColumnKind::BigInt),
        ColumnSpec::new("ephemeral_gb", ColumnKind::BigInt),
        ColumnSpec {
            name: "extra_specs",
            kind: ColumnKind::Jsonb,
            nullable: true,
        },
    ],
    primary_key: &["id"],
    indexes: &[IndexSpec {
        name: "openstack_flavors_name_idx",
        columns: &["name"],
    }],
};

impl OpenStackFlavor {
    /// Value of one extra spec, when present.
    pub fn extra_spec(&self, key: &str) -> Option<&str> {
        self.extra_specs.get(key).and_then(Value::as_str)
    }
}

impl Feature for OpenStackFlavor {
    fn table() -> &'static TableSpec {
        &OPENSTACK_FLAVORS
    }
}

/// Server inventory row as synced from Nova.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStackServer {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub compute_host: String,
    pub flavor_name: String,
    pub status: String,
}

static OPENSTACK_SERVERS: TableSpec = TableSpec {
    name: "openstack_servers",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("project_id", ColumnKind::Text),
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("flavor_name", ColumnKind::Text),
        ColumnSpec::new("status", ColumnKind::Text),
    ],
    primary_key: &["id"],
    indexes: &[IndexSpec {
        name: "openstack_servers_project_idx",
        columns: &["project_id"],
    }],
};

impl Feature for OpenStackServer {
    fn table() -> &'static TableSpec {
        &OPENSTACK_SERVERS
    }
}

/// Host aggregate membership row as synced from Nova.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStackAggregate {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub compute_host: String,
}

static OPENSTACK_AGGREGATES: TableSpec = TableSpec {
    name: "openstack_aggregates",
    columns: &[
        ColumnSpec::new("uuid", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec {
            name: "availability_zone",
            kind: ColumnKind::Text,
            nullable: true,
        },
        ColumnSpec::new("compute_host", ColumnKind::Text),
    ],
    primary_key: &["uuid", "compute_host"],
    indexes: &[],
};

impl Feature for OpenStackAggregate {
    fn table() -> &'static TableSpec {
        &OPENSTACK_AGGREGATES
    }
}

/// Host CPU contention sample from the vROps sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VropsHostContentionSample {
    pub compute_host: String,
    pub value: f64,
}

static VROPS_HOST_CONTENTION: TableSpec = TableSpec {
    name: "vrops_hostsystem_cpu_contention",
    columns: &[
        ColumnSpec::new("compute_host", ColumnKind::Text),
        ColumnSpec::new("value", ColumnKind::Double),
    ],
    primary_key: &[],
    indexes: &[IndexSpec {
        name: "vrops_hostsystem_cpu_contention_host_idx",
        columns: &["compute_host"],
    }],
};

impl Feature for VropsHostContentionSample {
    fn table() -> &'static TableSpec {
        &VROPS_HOST_CONTENTION
    }
}

/// Per-VM CPU demand sample from the vROps sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VropsVmCpuDemandSample {
    pub instance_uuid: String,
    pub project_id: String,
    pub value: f64,
}

static VROPS_VM_CPU_DEMAND: TableSpec = TableSpec {
    name: "vrops_virtualmachine_cpu_demand_ratio",
    columns: &[
        ColumnSpec::new("instance_uuid", ColumnKind::Text),
        ColumnSpec::new("project_id", ColumnKind::Text),
        ColumnSpec::new("value", ColumnKind::Double),
    ],
    primary_key: &[],
    indexes: &[IndexSpec {
        name: "vrops_virtualmachine_cpu_demand_ratio_project_idx",
        columns: &["project_id"],
    }],
};

impl Feature for VropsVmCpuDemandSample {
    fn table() -> &'static TableSpec {
        &VROPS_VM_CPU_DEMAND
    }
}
