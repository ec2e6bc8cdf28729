//! Weigher that spreads load by nudging placements towards hosts with low
//! RAM utilization.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::extractors::host_utilization::HostUtilization;
use crate::features::{fetch_all, FeatureStore};
use crate::scheduling::activation::{min_max_scale, NO_EFFECT};
use crate::scheduling::requests::SchedulingRequest;
use crate::scheduling::step::{
    load_options, SchedulingStep, StepOptions, StepOutcome, StepResult, StepStatistic,
};

pub const NAME: &str = "balance_utilization";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalanceUtilizationOptions {
    pub lower: f64,
    pub upper: f64,
    pub activation_lower: f64,
    pub activation_upper: f64,
}

impl Default for BalanceUtilizationOptions {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
            activation_lower: 0.0,
            activation_upper: -1.0,
        }
    }
}

impl StepOptions for BalanceUtilizationOptions {
    fn validate(&self) -> Result<()> {
        if self.lower == self.upper {
            bail!("lower and upper utilization bounds must differ");
        }
        if self.activation_lower == self.activation_upper {
            bail!("activation bounds must differ");
        }
        Ok(())
    }
}

pub struct BalanceUtilizationStep {
    alias: String,
    options: BalanceUtilizationOptions,
    store: Option<Arc<dyn FeatureStore>>,
}

impl BalanceUtilizationStep {
    pub fn new() -> Self {
        Self {
            alias: NAME.to_string(),
            options: BalanceUtilizationOptions::default(),
            store: None,
        }
    }
}

impl Default for BalanceUtilizationStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingStep for BalanceUtilizationStep {
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
        let utilization: Vec<HostUtilization> = fetch_all(store.as_ref()).await?;
        let by_host: HashMap<&str, f64> = utilization
            .iter()
            .map(|u| (u.compute_host.as_str(), u.ram_utilized_pct))
            .collect();

        let mut result = StepResult::default();
        let mut observed = HashMap::new();
        for host in request.host_names() {
            let activation = match by_host.get(host) {
                Some(&pct) => {
                    observed.insert(host.to_string(), pct);
                    min_max_scale(
                        pct,
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
            "ram utilized".to_string(),
            StepStatistic {
                unit: "%".to_string(),
                values: observed,
            },
        );
        Ok(StepOutcome::Applied(result))
    }
}
