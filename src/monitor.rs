//! Prometheus instrumentation for the extraction and scheduling paths.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Shared metric handles. Registered once at startup, cloned freely.
pub struct Monitor {
    registry: Registry,
    /// Labels: extractor, outcome (`success` | `failure` | `empty`).
    pub extractor_runs: IntCounterVec,
    /// Labels: extractor.
    pub extractor_skips: IntCounterVec,
    /// Labels: extractor.
    pub extraction_duration: HistogramVec,
    /// Labels: pipeline, outcome (`success` | `failure`).
    pub pipeline_runs: IntCounterVec,
    /// Labels: pipeline.
    pub pipeline_duration: HistogramVec,
    /// Labels: step.
    pub step_duration: HistogramVec,
    /// Labels: verdict (`accepted` | `rejected` | `retriable`).
    pub commitment_verdicts: IntCounterVec,
}

impl Monitor {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let extractor_runs = IntCounterVec::new(
            Opts::new("cortex_extractor_runs_total", "Extractor executions by outcome"),
            &["extractor", "outcome"],
        )?;
        let extractor_skips = IntCounterVec::new(
            Opts::new("cortex_extractor_skips_total", "Extractor runs skipped by recency gating"),
            &["extractor"],
        )?;
        let extraction_duration = HistogramVec::new(
            HistogramOpts::new("cortex_extraction_duration_seconds", "Extraction duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["extractor"],
        )?;
        let pipeline_runs = IntCounterVec::new(
            Opts::new("cortex_pipeline_runs_total", "Scheduling pipeline executions by outcome"),
            &["pipeline", "outcome"],
        )?;
        let pipeline_duration = HistogramVec::new(
            HistogramOpts::new("cortex_pipeline_duration_seconds", "Scheduling pipeline duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["pipeline"],
        )?;
        let step_duration = HistogramVec::new(
            HistogramOpts::new("cortex_step_duration_seconds", "Scheduling step duration")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["step"],
        )?;
        let commitment_verdicts = IntCounterVec::new(
            Opts::new("cortex_commitment_verdicts_total", "Commitment feasibility verdicts"),
            &["verdict"],
        )?;

        registry.register(Box::new(extractor_runs.clone()))?;
        registry.register(Box::new(extractor_skips.clone()))?;
        registry.register(Box::new(extraction_duration.clone()))?;
        registry.register(Box::new(pipeline_runs.clone()))?;
        registry.register(Box::new(pipeline_duration.clone()))?;
        registry.register(Box::new(step_duration.clone()))?;
        registry.register(Box::new(commitment_verdicts.clone()))?;

        Ok(Arc::new(Self {
            registry,
            extractor_runs,
            extractor_skips,
            extraction_duration,
            pipeline_runs,
            pipeline_duration,
            step_duration,
            commitment_verdicts,
        }))
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn export(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics are not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_registered_counters() {
        let monitor = Monitor::new().unwrap();
        monitor
            .extractor_runs
            .with_label_values(&["host_utilization", "success"])
            .inc();
        let text = monitor.export().unwrap();
        assert!(text.contains("cortex_extractor_runs_total"));
    }
}
