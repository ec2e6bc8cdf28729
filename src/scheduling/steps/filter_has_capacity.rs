//! Filter that removes hosts the requested flavor no longer fits on.
//!
//! This is the load-bearing step of the reservations pipeline: commitment
//! feasibility probes rely on it to drop hosts without room.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::extractors::flavor_host_space::FlavorHostSpace;
use crate::features::{fetch_all, FeatureStore};
use crate::scheduling::activation::NO_EFFECT;
use crate::scheduling::requests::SchedulingRequest;
use crate::scheduling::step::{
    load_options, SchedulingStep, StepOptions, StepOutcome, StepResult, StepStatistic,
};

pub const NAME: &str = "filter_has_capacity";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterHasCapacityOptions {}

impl StepOptions for FilterHasCapacityOptions {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FilterHasCapacityStep {
    alias: String,
    store: Option<Arc<dyn FeatureStore>>,
}

impl FilterHasCapacityStep {
    pub fn new() -> Self {
        Self {
            alias: NAME.to_string(),
            store: None,
        }
    }
}

impl Default for FilterHasCapacityStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingStep for FilterHasCapacityStep {
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
        load_options::<FilterHasCapacityOptions>(options)?;
        self.store = Some(store);
        Ok(())
    }

    async fn run(&self, request: &SchedulingRequest) -> Result<StepOutcome> {
        let Some(flavor) = request.flavor_name() else {
            // Nothing to check against; volume and share requests carry no
            // flavor.
            return Ok(StepOutcome::Applied(StepResult::no_effect(
                request.host_names(),
            )));
        };

        let store = self.store.as_ref().context("step was not initialized")?;
        let space: Vec<FlavorHostSpace> = fetch_all(store.as_ref()).await?;
        let fit_by_host: HashMap<&str, &FlavorHostSpace> = space
            .iter()
            .filter(|s| s.flavor_name == flavor)
            .map(|s| (s.compute_host.as_str(), s))
            .collect();

        let mut result = StepResult::default();
        let mut ram_left = HashMap::new();
        for host in request.host_names() {
            // No space row means no capacity claim; the host is removed.
            match fit_by_host.get(host) {
                Some(space) if space.fits => {
                    result.activations.insert(host.to_string(), NO_EFFECT);
                    ram_left.insert(host.to_string(), space.ram_left_mb as f64);
                }
                _ => {}
            }
        }
        result.statistics.insert(
            "ram left after placement".to_string(),
            StepStatistic {
                unit: "MB".to_string(),
                values: ram_left,
            },
        );
        Ok(StepOutcome::Applied(result))
    }
}
