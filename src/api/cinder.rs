//! Cinder external scheduler endpoint. Same contract as the Nova one with
//! volume hosts in place of compute hosts.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::scheduling::{HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest};

use super::{validate_host_weights, ApiError, AppState, ExternalSchedulerResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CinderExternalRequest {
    pub spec: CinderSpecWrapper,
    pub hosts: Vec<CinderHost>,
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub pipeline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CinderSpecWrapper {
    pub data: CinderSpecData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CinderSpecData {
    pub volume_id: String,
    pub project_id: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub size_gb: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CinderHost {
    pub volume_host: String,
}

impl From<CinderExternalRequest> for SchedulingRequest {
    fn from(request: CinderExternalRequest) -> Self {
        let data = request.spec.data;
        SchedulingRequest {
            domain: SchedulingDomain::Volume,
            resource_id: data.volume_id,
            project_id: data.project_id,
            availability_zone: data.availability_zone,
            flavor: None,
            flags: RequestFlags::default(),
            hosts: request
                .hosts
                .into_iter()
                .map(|h| HostCandidate {
                    host: h.volume_host,
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
    Json(body): Json<CinderExternalRequest>,
) -> Result<Json<ExternalSchedulerResponse>, ApiError> {
    let hosts: Vec<String> = body.hosts.iter().map(|h| h.volume_host.clone()).collect();
    validate_host_weights(&hosts, &body.weights)?;
    let request = SchedulingRequest::from(body);
    let hosts = state.controller.schedule(&request).await?;
    Ok(Json(ExternalSchedulerResponse { hosts }))
}
