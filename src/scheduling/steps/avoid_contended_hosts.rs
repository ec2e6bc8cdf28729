//! Weigher that pushes placements away from hosts with high CPU
//! contention.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::extractors::host_cpu_contention::HostCpuContention;
use crate::features::{fetch_all, FeatureStore};
use crate::scheduling::activation::{min_max_scale, NO_EFFECT};
use crate::scheduling::requests::SchedulingRequest;
use crate::scheduling::step::{
    load_options, SchedulingStep, StepOptions, StepOutcome, StepResult, StepStatistic,
};

pub const NAME: &str = "avoid_contended_hosts";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvoidContendedHostsOptions {
    /// Contention percentage mapped to `activation_lower`.
    pub lower: f64,
    /// Contention percentage mapped to `activation_upper`.
    pub upper: f64,
    pub activation_lower: f64,
    pub activation_upper: f64,
}

impl Default for AvoidContendedHostsOptions {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
            activation_lower: 0.0,
            activation_upper: -1.0,
        }
    }
}

impl StepOptions for AvoidContendedHostsOptions {
    fn validate(&self) -> Result<()> {
        if self.lower == self.upper {
            bail!("lower and upper contention bounds must differ");
        }
        if self.activation_lower == self.activation_upper {
            bail!("activation bounds must differ");
        }
        Ok(())
    }
}

pub struct AvoidContendedHostsStep {
    alias: String,
    options: AvoidContendedHostsOptions,
    store: Option<Arc<dyn FeatureStore>>,
}

impl AvoidContendedHostsStep {
    pub fn new() -> Self {
        Self {
            alias: NAME.to_string(),
            options: AvoidContendedHostsOptions::default(),
            store: None,
        }
    }
}

impl Default for AvoidContendedHostsStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingStep for AvoidContendedHostsStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    async fn init(
        &mut self,
        alias: String,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()> {
        self.alias = alias;
        self.options = load_options(options)?;
        self.store = Some(store);
        Ok(())
    }

    async fn run(&self, request: &SchedulingRequest) -> Result<StepOutcome> {
        let store = self.store.as_ref().context("step was not initialized")?;
        let contention: Vec<HostCpuContention> = fetch_all(store.as_ref()).await?;
        let by_host: HashMap<&str, f64> = contention
            .iter()
            .map(|c| (c.compute_host.as_str(), c.avg_cpu_contention))
            .collect();

        let mut result = StepResult::default();
        let mut observed = HashMap::new();
        for host in request.host_names() {
            // Hosts without telemetry are left untouched.
            let activation = match by_host.get(host) {
                Some(&avg) => {
                    observed.insert(host.to_string(), avg);
                    min_max_scale(
                        avg,
                        self.options.lower,
                        self.options.upper,
                        self.options.activation_lower,
                        self.options.activation_upper,
                    )
                }
                None => NO_EFFECT,
            };
            result.activations.insert(host.to_string(), activation);
        }
        result.statistics.insert(
            "avg cpu contention".to_string(),
            StepStatistic {
                unit: "%".to_string(),
                values: observed,
            },
        );
        Ok(StepOutcome::Applied(result))
    }
}
