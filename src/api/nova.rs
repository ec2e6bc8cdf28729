//! Nova external scheduler endpoint: wire types, validation and the
//! decision lookup.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::decisions::DecisionRecord;
use crate::scheduling::{
    FlavorSpec, HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest,
};

use super::{validate_host_weights, ApiError, AppState, ExternalSchedulerResponse};

/// Flavor extra spec carried by Ironic flavors; baremetal placement is not
/// supported.
const BAREMETAL_EXTRA_SPEC: &str = "capabilities:cpu_arch";

const DECISION_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaExternalRequest {
    pub spec: NovaSpecWrapper,
    #[serde(default)]
    pub context: Option<NovaContext>,
    #[serde(default)]
    pub rebuild: bool,
    #[serde(default)]
    pub resize: bool,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub vmware: bool,
    pub hosts: Vec<NovaHost>,
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub pipeline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaSpecWrapper {
    pub data: NovaSpecData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaSpecData {
    pub instance_uuid: String,
    pub project_id: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub flavor: NovaFlavorWrapper,
    #[serde(default)]
    pub scheduler_hints: serde_json::Value,
    #[serde(default)]
    pub num_instances: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaFlavorWrapper {
    pub data: NovaFlavorData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaFlavorData {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub memory_mb: i64,
    pub vcpus: i64,
    pub root_gb: i64,
    #[serde(default)]
    pub ephemeral_gb: i64,
    #[serde(default)]
    pub rxtx_factor: f64,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub extra_specs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaContext {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_domain_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaHost {
    pub compute_host: String,
    #[serde(default)]
    pub hypervisor_hostname: String,
}

fn validate(request: &NovaExternalRequest) -> Result<(), ApiError> {
    if request.resize {
        return Err(ApiError::BadRequest(
            "resize requests are not supported".to_string(),
        ));
    }
    let flavor = &request.spec.data.flavor.data;
    if flavor.extra_specs.contains_key(BAREMETAL_EXTRA_SPEC) {
        return Err(ApiError::BadRequest(
            "baremetal flavors are not supported".to_string(),
        ));
    }
    let hosts: Vec<String> = request.hosts.iter().map(|h| h.compute_host.clone()).collect();
    validate_host_weights(&hosts, &request.weights)
}

impl From<NovaExternalRequest> for SchedulingRequest {
    fn from(request: NovaExternalRequest) -> Self {
        let data = request.spec.data;
        let flavor = data.flavor.data;
        SchedulingRequest {
            domain: SchedulingDomain::Compute,
            resource_id: data.instance_uuid,
            project_id: data.project_id,
            availability_zone: data.availability_zone,
            flavor: Some(FlavorSpec {
                id: flavor.id,
                name: flavor.name,
                memory_mb: flavor.memory_mb,
                vcpus: flavor.vcpus,
                root_gb: flavor.root_gb,
                ephemeral_gb: flavor.ephemeral_gb,
                extra_specs: flavor.extra_specs,
            }),
            flags: RequestFlags {
                rebuild: request.rebuild,
                resize: request.resize,
                live: request.live,
                vmware: request.vmware,
            },
            hosts: request
                .hosts
                .into_iter()
                .map(|h| HostCandidate {
                    host: h.compute_host,
                    hypervisor_hostname: h.hypervisor_hostname,
                })
                .collect(),
            weights: request.weights,
            pipeline: request.pipeline,
        }
    }
}

pub async fn schedule_external(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NovaExternalRequest>,
) -> Result<Json<ExternalSchedulerResponse>, ApiError> {
    validate(&body)?;
    let request = SchedulingRequest::from(body);
    let hosts = state.controller.schedule(&request).await?;
    Ok(Json(ExternalSchedulerResponse { hosts }))
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    #[serde(default)]
    pub vm_id: Option<String>,
}

pub async fn scheduling_decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionsQuery>,
) -> Result<Json<Vec<DecisionRecord>>, ApiError> {
    let records = state
        .recorder
        .list(query.vm_id.as_deref(), DECISION_LIST_LIMIT)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(records))
}
