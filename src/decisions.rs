//! Scheduling decision records and the controller that produces them.
//!
//! Every inbound request yields one decision record: created on entry,
//! patched exactly once on exit with the outcome. Records are looked up by
//! the scheduled resource's identifier; re-scheduling the same resource
//! appends a new record rather than replacing the old one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::monitor::Monitor;
use crate::scheduling::{SchedulingPipeline, SchedulingRequest, StepTrace};

pub const DEFAULT_PIPELINE: &str = "default";
/// Pipeline reserved for commitment feasibility probes.
pub const RESERVATIONS_PIPELINE: &str = "reservations";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub resource_id: String,
    pub domain: String,
    pub pipeline: String,
    /// Original request body; only persisted when request logging is on.
    pub request: Option<Value>,
    pub trace: Vec<StepTrace>,
    pub final_hosts: Vec<String>,
    pub error: Option<String>,
    pub ready: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Patch applied to a decision record when its pipeline run finishes.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub trace: Vec<StepTrace>,
    pub final_hosts: Vec<String>,
    pub error: Option<String>,
    pub ready: bool,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn create(&self, record: &DecisionRecord) -> Result<()>;

    async fn finalize(&self, id: Uuid, outcome: &DecisionOutcome) -> Result<()>;

    async fn list(&self, resource_id: Option<&str>, limit: i64) -> Result<Vec<DecisionRecord>>;
}

#[derive(Debug, FromRow)]
struct DecisionRow {
    id: Uuid,
    resource_id: String,
    domain: String,
    pipeline: String,
    request: Option<Json<Value>>,
    trace: Json<Vec<StepTrace>>,
    final_hosts: Json<Vec<String>>,
    error: Option<String>,
    ready: bool,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl From<DecisionRow> for DecisionRecord {
    fn from(row: DecisionRow) -> Self {
        Self {
            id: row.id,
            resource_id: row.resource_id,
            domain: row.domain,
            pipeline: row.pipeline,
            request: row.request.map(|r| r.0),
            trace: row.trace.0,
            final_hosts: row.final_hosts.0,
            error: row.error,
            ready: row.ready,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_ms: row.duration_ms,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostgresDecisionRecorder {
    pool: PgPool,
}

impl PostgresDecisionRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DecisionRecorder for PostgresDecisionRecorder {
    async fn create(&self, record: &DecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduling_decisions
                (id, resource_id, domain, pipeline, request, trace, final_hosts,
                 error, ready, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.resource_id)
        .bind(&record.domain)
        .bind(&record.pipeline)
        .bind(record.request.clone().map(Json))
        .bind(Json(record.trace.clone()))
        .bind(Json(record.final_hosts.clone()))
        .bind(&record.error)
        .bind(record.ready)
        .bind(record.started_at)
        .execute(&self.pool)
        .await
        .context("failed to create decision record")?;
        Ok(())
    }

    async fn finalize(&self, id: Uuid, outcome: &DecisionOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduling_decisions
            SET trace = $1, final_hosts = $2, error = $3, ready = $4,
                finished_at = $5, duration_ms = $6
            WHERE id = $7
            "#,
        )
        .bind(Json(outcome.trace.clone()))
        .bind(Json(outcome.final_hosts.clone()))
        .bind(&outcome.error)
        .bind(outcome.ready)
        .bind(outcome.finished_at)
        .bind(outcome.duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to finalize decision record")?;
        Ok(())
    }

    async fn list(&self, resource_id: Option<&str>, limit: i64) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query_as::<_, DecisionRow>(
            r#"
            SELECT id, resource_id, domain, pipeline, request, trace, final_hosts,
                   error, ready, started_at, finished_at, duration_ms
            FROM scheduling_decisions
            WHERE ($1::text IS NULL OR resource_id = $1)
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(resource_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list decision records")?;
        Ok(rows.into_iter().map(DecisionRecord::from).collect())
    }
}

/// In-memory recorder for tests and setups without decision persistence.
#[derive(Debug, Default)]
pub struct MemoryDecisionRecorder {
    records: std::sync::Mutex<Vec<DecisionRecord>>,
}

impl MemoryDecisionRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionRecorder for MemoryDecisionRecorder {
    async fn create(&self, record: &DecisionRecord) -> Result<()> {
        self.records
            .lock()
            .expect("record lock poisoned")
            .push(record.clone());
        Ok(())
    }

    async fn finalize(&self, id: Uuid, outcome: &DecisionOutcome) -> Result<()> {
        let mut records = self.records.lock().expect("record lock poisoned");
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.trace = outcome.trace.clone();
            record.final_hosts = outcome.final_hosts.clone();
            record.error = outcome.error.clone();
            record.ready = outcome.ready;
            record.finished_at = Some(outcome.finished_at);
            record.duration_ms = Some(outcome.duration_ms);
        }
        Ok(())
    }

    async fn list(&self, resource_id: Option<&str>, limit: i64) -> Result<Vec<DecisionRecord>> {
        let records = self.records.lock().expect("record lock poisoned");
        Ok(records
            .iter()
            .filter(|r| resource_id.map_or(true, |id| r.resource_id == id))
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),
    #[error("pipeline failed: {0:#}")]
    Pipeline(anyhow::Error),
}

/// Looks up the requested pipeline, runs it and keeps the decision audit
/// trail.
pub struct DecisionController {
    pipelines: HashMap<String, Arc<SchedulingPipeline>>,
    recorder: Arc<dyn DecisionRecorder>,
    monitor: Arc<Monitor>,
    log_request_bodies: bool,
}

impl DecisionController {
    pub fn new(
        pipelines: HashMap<String, Arc<SchedulingPipeline>>,
        recorder: Arc<dyn DecisionRecorder>,
        monitor: Arc<Monitor>,
        log_request_bodies: bool,
    ) -> Self {
        Self {
            pipelines,
            recorder,
            monitor,
            log_request_bodies,
        }
    }

    pub fn has_pipeline(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Run the request through its pipeline and return the ranked hosts.
    ///
    /// Decision persistence is best-effort: a failing recorder is logged
    /// but never turns a good ranking into an error.
    pub async fn schedule(&self, request: &SchedulingRequest) -> Result<Vec<String>, ScheduleError> {
        let pipeline_name = request
            .pipeline
            .clone()
            .unwrap_or_else(|| DEFAULT_PIPELINE.to_string());
        let pipeline = self
            .pipelines
            .get(&pipeline_name)
            .ok_or_else(|| ScheduleError::UnknownPipeline(pipeline_name.clone()))?;

        if self.log_request_bodies {
            info!(resource = %request.resource_id, pipeline = %pipeline_name,
                  body = ?request, "scheduling request");
        }

        let record = DecisionRecord {
            id: Uuid::new_v4(),
            resource_id: request.resource_id.clone(),
            domain: request.domain.to_string(),
            pipeline: pipeline_name.clone(),
            request: self
                .log_request_bodies
                .then(|| serde_json::to_value(request).ok())
                .flatten(),
            trace: Vec::new(),
            final_hosts: Vec::new(),
            error: None,
            ready: false,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        };
        if let Err(err) = self.recorder.create(&record).await {
            warn!(error = %err, "failed to create decision record");
        }

        let started = Instant::now();
        let timer = self
            .monitor
            .pipeline_duration
            .with_label_values(&[pipeline_name.as_str()])
            .start_timer();
        let result = pipeline.run(request).await;
        timer.observe_duration();
        let duration_ms = started.elapsed().as_millis() as i64;

        let (outcome, response) = match result {
            Ok(run) => {
                self.monitor
                    .pipeline_runs
                    .with_label_values(&[pipeline_name.as_str(), "success"])
                    .inc();
                let outcome = DecisionOutcome {
                    trace: run.trace,
                    final_hosts: run.hosts.clone(),
                    error: None,
                    ready: true,
                    finished_at: Utc::now(),
                    duration_ms,
                };
                (outcome, Ok(run.hosts))
            }
            Err(err) => {
                self.monitor
                    .pipeline_runs
                    .with_label_values(&[pipeline_name.as_str(), "failure"])
                    .inc();
                let outcome = DecisionOutcome {
                    trace: Vec::new(),
                    final_hosts: Vec::new(),
                    error: Some(format!("{err:#}")),
                    ready: false,
                    finished_at: Utc::now(),
                    duration_ms,
                };
                (outcome, Err(ScheduleError::Pipeline(err)))
            }
        };

        if let Err(err) = self.recorder.finalize(record.id, &outcome).await {
            warn!(error = %err, "failed to finalize decision record");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::extractors::host_cpu_contention::HostCpuContention;
    use crate::features::MemoryFeatureStore;
    use crate::scheduling::requests::{HostCandidate, RequestFlags, SchedulingDomain};

    async fn controller(recorder: Arc<MemoryDecisionRecorder>) -> DecisionController {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed::<HostCpuContention>(&[]).await.unwrap();
        let monitor = Monitor::new().unwrap();
        let config: PipelineConfig =
            serde_yaml::from_str("name: default\nsteps: [{name: avoid_contended_hosts}]").unwrap();
        let pipeline = SchedulingPipeline::from_config(&config, store, monitor.clone())
            .await
            .unwrap();
        let mut pipelines = StdHashMap::new();
        pipelines.insert(DEFAULT_PIPELINE.to_string(), Arc::new(pipeline));
        DecisionController::new(pipelines, recorder, monitor, false)
    }

    fn request(pipeline: Option<&str>) -> SchedulingRequest {
        SchedulingRequest {
            domain: SchedulingDomain::Compute,
            resource_id: "instance-1".into(),
            project_id: "project-1".into(),
            availability_zone: None,
            flavor: None,
            flags: RequestFlags::default(),
            hosts: vec![HostCandidate {
                host: "h1".into(),
                hypervisor_hostname: String::new(),
            }],
            weights: [("h1".to_string(), 0.0)].into_iter().collect(),
            pipeline: pipeline.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn schedules_through_the_default_pipeline() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let controller = controller(recorder.clone()).await;
        let hosts = controller.schedule(&request(None)).await.unwrap();
        assert_eq!(hosts, vec!["h1"]);

        let records = recorder.list(Some("instance-1"), 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].ready);
        assert_eq!(records[0].final_hosts, vec!["h1"]);
        assert!(records[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn unknown_pipeline_is_a_user_error() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let controller = controller(recorder).await;
        let err = controller
            .schedule(&request(Some("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownPipeline(_)));
    }

    #[tokio::test]
    async fn rescheduling_appends_a_new_record() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let controller = controller(recorder.clone()).await;
        controller.schedule(&request(None)).await.unwrap();
        controller.schedule(&request(None)).await.unwrap();
        let records = recorder.list(Some("instance-1"), 10).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
