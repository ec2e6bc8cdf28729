//! Knowledge extraction: named units that derive feature tables from raw
//! inventory and telemetry, re-run by trigger topics in dependency order.

pub mod flavor_host_space;
pub mod host_capabilities;
pub mod host_cpu_contention;
pub mod host_utilization;
pub mod project_noisiness;
pub mod runtime;
pub mod sql;

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::ExtractorConfig;
use crate::features::{FeatureStore, TableSpec};
use crate::monitor::Monitor;

pub use runtime::ExtractorRuntime;
pub use sql::SqlExtractor;

/// A named unit that reads raw and/or feature tables and produces the rows
/// of one feature table.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// The output table, created at `init` and rewritten on every
    /// successful extraction.
    fn table(&self) -> &'static TableSpec;

    /// Topics whose publication re-runs this extractor.
    fn triggers(&self) -> &[String];

    /// Names of upstream extractors that must run first within a campaign.
    fn dependencies(&self) -> &[String];

    /// Create the output table and load options. Called exactly once per
    /// process.
    async fn init(
        &mut self,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()>;

    fn needs_update(&self) -> bool;

    fn mark_updated(&self);

    fn notify_skip(&self);

    fn next_possible_execution(&self) -> DateTime<Utc>;

    /// Produce the full replacement contents of the output table. An empty
    /// result means the upstream tables are not ready yet.
    async fn extract(&self) -> Result<Vec<Value>>;
}

/// Recency gating shared by all extractors: at most one successful run per
/// window, with a zero window meaning always eligible.
#[derive(Debug)]
pub struct RecencyGate {
    window: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl RecencyGate {
    pub fn new(recency_seconds: u64) -> Self {
        Self {
            window: Duration::seconds(recency_seconds as i64),
            last_run: Mutex::new(None),
        }
    }

    pub fn needs_update(&self) -> bool {
        if self.window.is_zero() {
            return true;
        }
        match *self.last_run.lock().expect("recency lock poisoned") {
            None => true,
            Some(last) => Utc::now().signed_duration_since(last) >= self.window,
        }
    }

    pub fn mark_updated(&self) {
        *self.last_run.lock().expect("recency lock poisoned") = Some(Utc::now());
    }

    pub fn next_possible_execution(&self) -> DateTime<Utc> {
        match *self.last_run.lock().expect("recency lock poisoned") {
            None => Utc::now(),
            Some(last) => last + self.window,
        }
    }
}

/// Decorator that counts executions and records durations around an inner
/// extractor.
pub struct MonitoredExtractor {
    inner: Box<dyn Extractor>,
    monitor: Arc<Monitor>,
}

impl MonitoredExtractor {
    pub fn new(inner: Box<dyn Extractor>, monitor: Arc<Monitor>) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl Extractor for MonitoredExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn table(&self) -> &'static TableSpec {
        self.inner.table()
    }

    fn triggers(&self) -> &[String] {
        self.inner.triggers()
    }

    fn dependencies(&self) -> &[String] {
        self.inner.dependencies()
    }

    async fn init(
        &mut self,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()> {
        self.inner.init(store, options).await
    }

    fn needs_update(&self) -> bool {
        self.inner.needs_update()
    }

    fn mark_updated(&self) {
        self.inner.mark_updated()
    }

    fn notify_skip(&self) {
        self.monitor
            .extractor_skips
            .with_label_values(&[self.inner.name()])
            .inc();
        self.inner.notify_skip()
    }

    fn next_possible_execution(&self) -> DateTime<Utc> {
        self.inner.next_possible_execution()
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let timer = self
            .monitor
            .extraction_duration
            .with_label_values(&[self.inner.name()])
            .start_timer();
        let result = self.inner.extract().await;
        timer.observe_duration();

        let outcome = match &result {
            Err(_) => "failure",
            Ok(rows) if rows.is_empty() => "empty",
            Ok(_) => "success",
        };
        self.monitor
            .extractor_runs
            .with_label_values(&[self.inner.name(), outcome])
            .inc();
        debug!(extractor = self.inner.name(), outcome, "extraction finished");
        result
    }
}

/// Resolve a configured extractor name to its built-in implementation.
/// Unknown names are configuration-fatal.
pub fn build_extractor(config: &ExtractorConfig) -> Result<Box<dyn Extractor>> {
    match config.name.as_str() {
        host_utilization::NAME => Ok(host_utilization::build(config)),
        host_capabilities::NAME => Ok(host_capabilities::build(config)),
        host_cpu_contention::NAME => Ok(host_cpu_contention::build(config)),
        project_noisiness::NAME => Ok(project_noisiness::build(config)),
        flavor_host_space::NAME => Ok(flavor_host_space::build(config)),
        other => bail!("unknown extractor '{other}'"),
    }
}
