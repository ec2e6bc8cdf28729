//! External scheduling HTTP surface.
//!
//! One router per delegating service (Nova, Cinder, Manila) plus the
//! commitment feasibility endpoint and the operational routes.

pub mod cinder;
pub mod commitments;
pub mod manila;
pub mod nova;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::decisions::{DecisionController, DecisionRecorder, ScheduleError};
use crate::features::FeatureStore;
use crate::monitor::Monitor;

pub struct AppState {
    pub controller: Arc<DecisionController>,
    pub recorder: Arc<dyn DecisionRecorder>,
    pub store: Arc<dyn FeatureStore>,
    pub monitor: Arc<Monitor>,
    /// Hypervisor-type allowlist from the configuration.
    pub hypervisors: Vec<String>,
    pub log_request_bodies: bool,
}

/// Ranked hosts, best first. Shared by all three external endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExternalSchedulerResponse {
    pub hosts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::UnknownPipeline(_) => ApiError::BadRequest(err.to_string()),
            ScheduleError::Pipeline(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// Hosts and weights must name exactly the same set, in both directions.
pub(crate) fn validate_host_weights(
    hosts: &[String],
    weights: &HashMap<String, f64>,
) -> Result<(), ApiError> {
    for host in hosts {
        if !weights.contains_key(host) {
            return Err(ApiError::BadRequest(format!(
                "candidate host '{host}' is missing from the weight map"
            )));
        }
    }
    for weighted in weights.keys() {
        if !hosts.contains(weighted) {
            return Err(ApiError::BadRequest(format!(
                "weight entry '{weighted}' does not match any candidate host"
            )));
        }
    }
    Ok(())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state
        .monitor
        .export()
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn up() -> StatusCode {
    StatusCode::OK
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scheduler/nova/external", post(nova::schedule_external))
        .route(
            "/scheduler/nova/commitments/change",
            post(commitments::change),
        )
        .route(
            "/scheduler/nova/scheduling-decisions",
            get(nova::scheduling_decisions),
        )
        .route("/scheduler/cinder/external", post(cinder::schedule_external))
        .route("/scheduler/manila/external", post(manila::schedule_external))
        .route("/metrics", get(metrics))
        .route("/up", get(up))
        .with_state(state)
}
