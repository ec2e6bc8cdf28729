//! Filter that removes hosts outside the requested availability zone.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::extractors::host_capabilities::HostCapabilities;
use crate::features::{fetch_all, FeatureStore};
use crate::scheduling::activation::NO_EFFECT;
use crate::scheduling::requests::SchedulingRequest;
use crate::scheduling::step::{
    load_options, SchedulingStep, StepOptions, StepOutcome, StepResult,
};

pub const NAME: &str = "filter_correct_az";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterCorrectAzOptions {}

impl StepOptions for FilterCorrectAzOptions {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FilterCorrectAzStep {
    alias: String,
    store: Option<Arc<dyn FeatureStore>>,
}

impl FilterCorrectAzStep {
    pub fn new() -> Self {
        Self {
            alias: NAME.to_string(),
            store: None,
        }
    }
}

impl Default for FilterCorrectAzStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingStep for FilterCorrectAzStep {
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
        load_options::<FilterCorrectAzOptions>(options)?;
        self.store = Some(store);
        Ok(())
    }

    async fn run(&self, request: &SchedulingRequest) -> Result<StepOutcome> {
        let Some(requested) = request.availability_zone.as_deref().filter(|az| !az.is_empty())
        else {
            return Ok(StepOutcome::Applied(StepResult::no_effect(
                request.host_names(),
            )));
        };

        let store = self.store.as_ref().context("step was not initialized")?;
        let capabilities: Vec<HostCapabilities> = fetch_all(store.as_ref()).await?;
        let zone_of: HashMap<&str, &str> = capabilities
            .iter()
            .map(|c| (c.compute_host.as_str(), c.availability_zone.as_str()))
            .collect();

        let mut result = StepResult::default();
        for host in request.host_names() {
            // Unzoned hosts and hosts without a capability row pass; only a
            // known, conflicting zone removes a host.
            let keep = match zone_of.get(host) {
                Some(zone) => zone.is_empty() || *zone == requested,
                None => true,
            };
            if keep {
                result.activations.insert(host.to_string(), NO_EFFECT);
            }
        }
        Ok(StepOutcome::Applied(result))
    }
}
