//! Normalized scheduling request.
//!
//! The HTTP layer parses the Nova, Cinder and Manila wire shapes and
//! converts them into this one internal form; pipelines and steps never
//! see service-specific payloads.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingDomain {
    Compute,
    Volume,
    Share,
}

impl fmt::Display for SchedulingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingDomain::Compute => f.write_str("compute"),
            SchedulingDomain::Volume => f.write_str("volume"),
            SchedulingDomain::Share => f.write_str("share"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFlags {
    pub rebuild: bool,
    pub resize: bool,
    pub live: bool,
    pub vmware: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorSpec {
    pub id: String,
    pub name: String,
    pub memory_mb: i64,
    pub vcpus: i64,
    pub root_gb: i64,
    pub ephemeral_gb: i64,
    #[serde(default)]
    pub extra_specs: HashMap<String, String>,
}

/// One admissible placement target as named by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCandidate {
    /// Compute host for Nova, volume host for Cinder, share host for Manila.
    pub host: String,
    #[serde(default)]
    pub hypervisor_hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingRequest {
    pub domain: SchedulingDomain,
    /// Instance, volume or share identifier being placed.
    pub resource_id: String,
    pub project_id: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub flavor: Option<FlavorSpec>,
    #[serde(default)]
    pub flags: RequestFlags,
    /// Candidate hosts in the caller's baseline order.
    pub hosts: Vec<HostCandidate>,
    /// Baseline weights keyed by host.
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub pipeline: Option<String>,
}

impl SchedulingRequest {
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|h| h.host.as_str())
    }

    pub fn flavor_name(&self) -> Option<&str> {
        self.flavor.as_ref().map(|f| f.name.as_str())
    }
}
