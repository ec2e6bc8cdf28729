//! Commitment-change feasibility checks.
//!
//! Resource providers ask before confirming additional committed capacity.
//! Every `instances_<flavor>` delta that grows is probed through the
//! reservations pipeline; a delta with no feasible placement rejects the
//! whole change. Transient problems (no inventory yet, pipeline failure)
//! carry a retry-at timestamp; a missing flavor or a genuinely full
//! capacity pool rejects indefinitely.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decisions::{ScheduleError, RESERVATIONS_PIPELINE};
use crate::extractors::host_utilization::HostUtilization;
use crate::features::inventory::OpenStackFlavor;
use crate::features::fetch_all;
use crate::scheduling::{
    FlavorSpec, HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest,
};

use super::AppState;

const INSTANCE_RESOURCE_PREFIX: &str = "instances_";
const HYPERVISOR_TYPE_EXTRA_SPEC: &str = "capabilities:hypervisor_type";
const RETRY_DELAY_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentChangeRequest {
    pub project_id: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub commitments: Vec<CommitmentDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentDelta {
    pub resource: String,
    pub confirmed_before: i64,
    pub confirmed_after: i64,
}

/// An empty rejection reason means the change is acceptable. `retry_at`
/// is only set for transient rejections; its absence means the rejection
/// stands until capacity or configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentChangeResponse {
    pub rejection_reason: String,
    pub retry_at: Option<DateTime<Utc>>,
}

impl CommitmentChangeResponse {
    fn accepted() -> Self {
        Self {
            rejection_reason: String::new(),
            retry_at: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            rejection_reason: reason,
            retry_at: None,
        }
    }

    fn retriable(reason: String) -> Self {
        Self {
            rejection_reason: reason,
            retry_at: Some(Utc::now() + Duration::seconds(RETRY_DELAY_SECS)),
        }
    }

    fn verdict_label(&self) -> &'static str {
        if self.rejection_reason.is_empty() {
            "accepted"
        } else if self.retry_at.is_some() {
            "retriable"
        } else {
            "rejected"
        }
    }
}

/// Check every growing instance delta for a feasible placement.
pub async fn check_commitment_change(
    state: &AppState,
    request: &CommitmentChangeRequest,
) -> CommitmentChangeResponse {
    for delta in &request.commitments {
        let Some(flavor_name) = delta.resource.strip_prefix(INSTANCE_RESOURCE_PREFIX) else {
            // Only instance commitments are within Cortex's authority.
            continue;
        };
        let growth = delta.confirmed_after - delta.confirmed_before;
        if growth <= 0 {
            continue;
        }

        let flavors: Vec<OpenStackFlavor> = match fetch_all(state.store.as_ref()).await {
            Ok(flavors) => flavors,
            Err(err) => {
                return CommitmentChangeResponse::retriable(format!(
                    "failed to read flavor inventory: {err:#}"
                ))
            }
        };
        if flavors.is_empty() {
            return CommitmentChangeResponse::retriable(
                "cortex has no flavor information yet".to_string(),
            );
        }
        let Some(flavor) = flavors.iter().find(|f| f.name == flavor_name) else {
            return CommitmentChangeResponse::rejected(format!(
                "flavor not found: {flavor_name}"
            ));
        };

        if let Some(hypervisor) = flavor.extra_spec(HYPERVISOR_TYPE_EXTRA_SPEC) {
            if !state.hypervisors.is_empty()
                && !state.hypervisors.iter().any(|allowed| allowed == hypervisor)
            {
                // Not a hypervisor Cortex knows about; the verdict is the
                // caller's to make.
                debug!(flavor = flavor_name, hypervisor, "outside allowlist, not probing");
                continue;
            }
        }

        match probe_placement(state, request, flavor, growth).await {
            Ok(hosts) if hosts.is_empty() => {
                return CommitmentChangeResponse::rejected(format!(
                    "no feasible host for flavor '{flavor_name}'"
                ));
            }
            Ok(hosts) => {
                info!(
                    flavor = flavor_name,
                    feasible = hosts.len(),
                    "commitment probe found capacity"
                );
            }
            Err(ProbeError::NoHostInventory) => {
                return CommitmentChangeResponse::retriable(
                    "cortex has no host inventory yet".to_string(),
                );
            }
            Err(ProbeError::PipelineMissing) => {
                return CommitmentChangeResponse::retriable(
                    "reservations pipeline is not configured".to_string(),
                );
            }
            Err(ProbeError::PipelineFailed) => {
                return CommitmentChangeResponse::retriable(
                    "pipeline failed, please try again".to_string(),
                );
            }
        }
    }
    CommitmentChangeResponse::accepted()
}

enum ProbeError {
    NoHostInventory,
    PipelineMissing,
    PipelineFailed,
}

/// Run the reservations pipeline as if placing `growth` new instances of
/// the flavor. The pipeline holds no allocation state, so one probe over
/// all known hosts answers feasibility.
async fn probe_placement(
    state: &AppState,
    request: &CommitmentChangeRequest,
    flavor: &OpenStackFlavor,
    growth: i64,
) -> Result<Vec<String>, ProbeError> {
    let known_hosts: Vec<HostUtilization> = fetch_all(state.store.as_ref())
        .await
        .map_err(|_| ProbeError::NoHostInventory)?;
    if known_hosts.is_empty() {
        return Err(ProbeError::NoHostInventory);
    }

    let extra_specs: HashMap<String, String> = flavor
        .extra_specs
        .as_object()
        .map(|specs| {
            specs
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let probe = SchedulingRequest {
        domain: SchedulingDomain::Compute,
        resource_id: format!(
            "commitment-{}-{}-x{}",
            request.project_id, flavor.name, growth
        ),
        project_id: request.project_id.clone(),
        availability_zone: request.availability_zone.clone(),
        flavor: Some(FlavorSpec {
            id: flavor.id.clone(),
            name: flavor.name.clone(),
            memory_mb: flavor.ram_mb,
            vcpus: flavor.vcpus,
            root_gb: flavor.disk_gb,
            ephemeral_gb: flavor.ephemeral_gb,
            extra_specs,
        }),
        flags: RequestFlags::default(),
        hosts: known_hosts
            .iter()
            .map(|h| HostCandidate {
                host: h.compute_host.clone(),
                hypervisor_hostname: String::new(),
            })
            .collect(),
        weights: known_hosts
            .iter()
            .map(|h| (h.compute_host.clone(), 0.0))
            .collect(),
        pipeline: Some(RESERVATIONS_PIPELINE.to_string()),
    };

    match state.controller.schedule(&probe).await {
        Ok(hosts) => Ok(hosts),
        Err(ScheduleError::UnknownPipeline(_)) => Err(ProbeError::PipelineMissing),
        Err(ScheduleError::Pipeline(_)) => Err(ProbeError::PipelineFailed),
    }
}

pub async fn change(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommitmentChangeRequest>,
) -> Json<CommitmentChangeResponse> {
    let response = check_commitment_change(&state, &body).await;
    state
        .monitor
        .commitment_verdicts
        .with_label_values(&[response.verdict_label()])
        .inc();
    if !response.rejection_reason.is_empty() {
        info!(
            project = %body.project_id,
            reason = %response.rejection_reason,
            retriable = response.retry_at.is_some(),
            "commitment change rejected"
        );
    }
    Json(response)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use serde_json::json;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::decisions::{DecisionController, MemoryDecisionRecorder};
    use crate::extractors::flavor_host_space::FlavorHostSpace;
    use crate::features::MemoryFeatureStore;
    use crate::monitor::Monitor;
    use crate::scheduling::SchedulingPipeline;

    async fn state_with(
        store: Arc<MemoryFeatureStore>,
        reservations_pipeline: Option<&str>,
    ) -> AppState {
        let monitor = Monitor::new().unwrap();
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let mut pipelines = StdHashMap::new();
        if let Some(yaml) = reservations_pipeline {
            let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
            let pipeline =
                SchedulingPipeline::from_config(&config, store.clone(), monitor.clone())
                    .await
                    .unwrap();
            pipelines.insert(RESERVATIONS_PIPELINE.to_string(), Arc::new(pipeline));
        }
        let controller = Arc::new(DecisionController::new(
            pipelines,
            recorder.clone(),
            monitor.clone(),
            false,
        ));
        AppState {
            controller,
            recorder,
            store,
            monitor,
            hypervisors: vec!["qemu".to_string(), "vmware".to_string()],
            log_request_bodies: false,
        }
    }

    const RESERVATIONS_YAML: &str = "name: reservations\nsteps: [{name: filter_has_capacity}]";

    fn flavor(name: &str, hypervisor: Option<&str>) -> OpenStackFlavor {
        OpenStackFlavor {
            id: name.to_string(),
            name: name.to_string(),
            vcpus: 2,
            ram_mb: 2048,
            disk_gb: 20,
            ephemeral_gb: 0,
            extra_specs: match hypervisor {
                Some(h) => json!({ "capabilities:hypervisor_type": h }),
                None => json!({}),
            },
        }
    }

    fn host(name: &str) -> HostUtilization {
        HostUtilization {
            compute_host: name.to_string(),
            vcpus: 32,
            vcpus_used: 0,
            memory_mb: 65536,
            memory_mb_used: 0,
            local_gb: 1000,
            local_gb_used: 0,
            ram_utilized_pct: 0.0,
            cpu_utilized_pct: 0.0,
            disk_utilized_pct: 0.0,
        }
    }

    fn space(flavor: &str, host: &str, fits: bool) -> FlavorHostSpace {
        FlavorHostSpace {
            flavor_name: flavor.to_string(),
            compute_host: host.to_string(),
            fits,
            ram_left_mb: 0,
            vcpus_left: 0,
            disk_left_gb: 0,
        }
    }

    fn grow(resource: &str, before: i64, after: i64) -> CommitmentChangeRequest {
        CommitmentChangeRequest {
            project_id: "project-1".into(),
            availability_zone: None,
            commitments: vec![CommitmentDelta {
                resource: resource.to_string(),
                confirmed_before: before,
                confirmed_after: after,
            }],
        }
    }

    #[tokio::test]
    async fn missing_flavor_rejects_indefinitely() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed(&[flavor("small", Some("qemu"))]).await.unwrap();
        let state = state_with(store, Some(RESERVATIONS_YAML)).await;

        let response = check_commitment_change(&state, &grow("instances_ghost", 0, 1)).await;
        assert!(response.rejection_reason.contains("flavor not found"));
        assert!(response.retry_at.is_none());
    }

    #[tokio::test]
    async fn feasible_growth_is_accepted() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed(&[flavor("small", Some("qemu"))]).await.unwrap();
        store.seed(&[host("h1")]).await.unwrap();
        store.seed(&[space("small", "h1", true)]).await.unwrap();
        let state = state_with(store, Some(RESERVATIONS_YAML)).await;

        let response = check_commitment_change(&state, &grow("instances_small", 1, 2)).await;
        assert!(response.rejection_reason.is_empty());
    }

    #[tokio::test]
    async fn zero_feasible_hosts_reject_indefinitely() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed(&[flavor("small", Some("qemu"))]).await.unwrap();
        store.seed(&[host("h1")]).await.unwrap();
        store.seed(&[space("small", "h1", false)]).await.unwrap();
        let state = state_with(store, Some(RESERVATIONS_YAML)).await;

        let response = check_commitment_change(&state, &grow("instances_small", 0, 1)).await;
        assert!(response.rejection_reason.contains("no feasible host"));
        assert!(response.retry_at.is_none());
    }

    #[tokio::test]
    async fn shrinking_deltas_are_never_rejected() {
        let store = Arc::new(MemoryFeatureStore::new());
        let state = state_with(store, None).await;

        let response = check_commitment_change(&state, &grow("instances_small", 5, 3)).await;
        assert!(response.rejection_reason.is_empty());
    }

    #[tokio::test]
    async fn non_instance_resources_are_accepted_without_probing() {
        let store = Arc::new(MemoryFeatureStore::new());
        let state = state_with(store, None).await;

        let response = check_commitment_change(&state, &grow("cores", 0, 100)).await;
        assert!(response.rejection_reason.is_empty());
    }

    #[tokio::test]
    async fn empty_flavor_inventory_is_retriable() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed::<OpenStackFlavor>(&[]).await.unwrap();
        let state = state_with(store, Some(RESERVATIONS_YAML)).await;

        let response = check_commitment_change(&state, &grow("instances_small", 0, 1)).await;
        assert!(response
            .rejection_reason
            .contains("no flavor information yet"));
        assert!(response.retry_at.is_some());
    }

    #[tokio::test]
    async fn missing_reservations_pipeline_is_retriable() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed(&[flavor("small", Some("qemu"))]).await.unwrap();
        store.seed(&[host("h1")]).await.unwrap();
        let state = state_with(store, None).await;

        let response = check_commitment_change(&state, &grow("instances_small", 0, 1)).await;
        assert!(response
            .rejection_reason
            .contains("reservations pipeline is not configured"));
        assert!(response.retry_at.is_some());
    }

    #[tokio::test]
    async fn pipeline_failure_is_retriable() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed(&[flavor("small", Some("qemu"))]).await.unwrap();
        store.seed(&[host("h1")]).await.unwrap();
        // feature_flavor_host_space is never created, so the filter step
        // fails at read time.
        let state = state_with(store, Some(RESERVATIONS_YAML)).await;

        let response = check_commitment_change(&state, &grow("instances_small", 0, 1)).await;
        assert!(response
            .rejection_reason
            .contains("pipeline failed, please try again"));
        assert!(response.retry_at.is_some());
    }

    #[tokio::test]
    async fn flavors_outside_the_allowlist_pass_unprobed() {
        let store = Arc::new(MemoryFeatureStore::new());
        store
            .seed(&[flavor("exotic", Some("ironic"))])
            .await
            .unwrap();
        // No hosts, no reservations pipeline: a probe would fail, but none
        // runs.
        let state = state_with(store, None).await;

        let response = check_commitment_change(&state, &grow("instances_exotic", 0, 1)).await;
        assert!(response.rejection_reason.is_empty());
    }
}
