//! Manila external scheduler endpoint. Same contract as the Nova one with
//! share hosts in place of compute hosts.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::scheduling::{HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest};

use super::{validate_host_weights, ApiError, AppState, ExternalSchedulerResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManilaExternalRequest {
    pub spec: ManilaSpecWrapper,
    pub hosts: Vec<ManilaHost>,
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub pipeline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManilaSpecWrapper {
    pub data: ManilaSpecData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManilaSpecData {
    pub share_id: String,
    pub project_id: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub size_gb: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManilaHost {
    pub share_host: String,
}

impl From<ManilaExternalRequest> for SchedulingRequest {
    fn from(request: ManilaExternalRequest) -> Self {
        let data = request.spec.data;
        SchedulingRequest {
            domain: SchedulingDomain::Share,
            resource_id: data.share_id,
            project_id: data.project_id,
            availability_zone: data.availability_zone,
            flavor: None,
            flags: RequestFlags::default(),
            hosts: request
                .hosts
                .into_iter()
                .map(|h| HostCandidate {
                    host: h.share_host,
                    hypervisor_hostname: String::new(),
                })
                .collect(),
            weights: request.weights,
            pipeline: request.pipeline,
        }
    }
}

pub async fn schedule_external(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ManilaExternalRequest>,
) -> Result<Json<ExternalSchedulerResponse>, ApiError> {
    let hosts: Vec<String> = body.hosts.iter().map(|h| h.share_host.clone()).collect();
    validate_host_weights(&hosts, &body.weights)?;
    let request = SchedulingRequest::from(body);
    let hosts = state.controller.schedule(&request).await?;
    Ok(Json(ExternalSchedulerResponse { hosts }))
}
