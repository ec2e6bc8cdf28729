//! Anti-affinity weigher: keep new workloads of a noisy project away from
//! the hosts that project is already loud on.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::extractors::project_noisiness::ProjectNoisiness;
use crate::features::{fetch_all, FeatureStore};
use crate::scheduling::activation::{min_max_scale, NO_EFFECT};
use crate::scheduling::requests::SchedulingRequest;
use crate::scheduling::step::{
    load_options, SchedulingStep, StepOptions, StepOutcome, StepResult, StepStatistic,
};

pub const NAME: &str = "avoid_noisy_projects";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvoidNoisyProjectsOptions {
    /// Average CPU demand (%) above which a project counts as noisy on a
    /// host. Overshoot beyond the threshold scales the activation towards
    /// `activation_on_hit`.
    pub avg_cpu_threshold: f64,
    pub activation_on_hit: f64,
}

impl Default for AvoidNoisyProjectsOptions {
    fn default() -> Self {
        Self {
            avg_cpu_threshold: 20.0,
            activation_on_hit: -1.0,
        }
    }
}

impl StepOptions for AvoidNoisyProjectsOptions {
    fn validate(&self) -> Result<()> {
        if !(0.0..100.0).contains(&self.avg_cpu_threshold) {
            bail!("avg_cpu_threshold must lie in [0, 100)");
        }
        if self.activation_on_hit == 0.0 {
            bail!("activation_on_hit of 0 would make this step a no-op");
        }
        Ok(())
    }
}

pub struct AvoidNoisyProjectsStep {
    alias: String,
    options: AvoidNoisyProjectsOptions,
    store: Option<Arc<dyn FeatureStore>>,
}

impl AvoidNoisyProjectsStep {
    pub fn new() -> Self {
        Self {
            alias: NAME.to_string(),
            options: AvoidNoisyProjectsOptions::default(),
            store: None,
        }
    }
}

impl Default for AvoidNoisyProjectsStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingStep for AvoidNoisyProjectsStep {
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
        let noisiness: Vec<ProjectNoisiness> = fetch_all(store.as_ref()).await?;
        let by_host: HashMap<&str, f64> = noisiness
            .iter()
            .filter(|n| n.project_id == request.project_id)
            .map(|n| (n.compute_host.as_str(), n.avg_cpu_demand_pct))
            .collect();

        let mut result = StepResult::default();
        let mut observed = HashMap::new();
        for host in request.host_names() {
            let activation = match by_host.get(host) {
                Some(&avg) if avg > self.options.avg_cpu_threshold => {
                    observed.insert(host.to_string(), avg);
                    min_max_scale(
                        avg,
                        self.options.avg_cpu_threshold,
                        100.0,
                        0.0,
                        self.options.activation_on_hit,
                    )
                }
                _ => NO_EFFECT,
            };
            result.activations.insert(host.to_string(), activation);
        }
        result.statistics.insert(
            "avg cpu demand of project".to_string(),
            StepStatistic {
                unit: "%".to_string(),
                values: observed,
            },
        );
        Ok(StepOutcome::Applied(result))
    }
}
