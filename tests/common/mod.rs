//! Shared fixture: an app state over the in-memory store with a default
//! and a reservations pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;

use cortex::api::{create_router, AppState};
use cortex::config::PipelineConfig;
use cortex::decisions::{DecisionController, MemoryDecisionRecorder};
use cortex::features::MemoryFeatureStore;
use cortex::monitor::Monitor;
use cortex::scheduling::SchedulingPipeline;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryFeatureStore>,
}

const DEFAULT_PIPELINE_YAML: &str = "\
name: default
steps:
  - name: avoid_contended_hosts
    options: {lower: 10.0, upper: 100.0, activation_lower: 0.0, activation_upper: -1.0}";

const RESERVATIONS_PIPELINE_YAML: &str = "\
name: reservations
steps:
  - name: filter_has_capacity";

pub async fn test_app() -> TestApp {
    let store = Arc::new(MemoryFeatureStore::new());
    let recorder = Arc::new(MemoryDecisionRecorder::new());
    let monitor = Monitor::new().unwrap();

    let mut pipelines = HashMap::new();
    for yaml in [DEFAULT_PIPELINE_YAML, RESERVATIONS_PIPELINE_YAML] {
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        let pipeline = SchedulingPipeline::from_config(&config, store.clone(), monitor.clone())
            .await
            .unwrap();
        pipelines.insert(config.name.clone(), Arc::new(pipeline));
    }

    let controller = Arc::new(DecisionController::new(
        pipelines,
        recorder.clone(),
        monitor.clone(),
        false,
    ));
    let state = Arc::new(AppState {
        controller,
        recorder: recorder.clone(),
        store: store.clone(),
        monitor,
        hypervisors: vec!["qemu".to_string(), "vmware".to_string()],
        log_request_bodies: false,
    });
    TestApp {
        router: create_router(state),
        store,
    }
}
