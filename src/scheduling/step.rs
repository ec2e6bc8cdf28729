//! Scheduling step contract and option loading.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::features::FeatureStore;

use super::activation::NO_EFFECT;
use super::requests::SchedulingRequest;

/// Observational per-host numbers a step reports alongside its activations.
/// Statistics never feed back into the ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatistic {
    pub unit: String,
    pub values: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResult {
    /// Activation per host. A missing host is filtered out; a zero keeps
    /// the host without nudging it.
    pub activations: HashMap<String, f64>,
    pub statistics: HashMap<String, StepStatistic>,
}

impl StepResult {
    /// A result that keeps every given host untouched.
    pub fn no_effect<'a, I: IntoIterator<Item = &'a str>>(hosts: I) -> Self {
        Self {
            activations: hosts
                .into_iter()
                .map(|h| (h.to_string(), NO_EFFECT))
                .collect(),
            statistics: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Applied(StepResult),
    /// A spec selector matched with action=skip; the pipeline treats the
    /// step as a no-op.
    Skipped(String),
}

#[async_trait]
pub trait SchedulingStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Disambiguator when the same step appears twice in one pipeline;
    /// defaults to the step name.
    fn alias(&self) -> &str;

    async fn init(
        &mut self,
        alias: String,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()>;

    async fn run(&self, request: &SchedulingRequest) -> Result<StepOutcome>;
}

/// Options payload contract: every step option type validates itself after
/// deserialization; a validation failure aborts pipeline construction.
pub trait StepOptions: DeserializeOwned {
    fn validate(&self) -> Result<()>;
}

/// Deserialize and validate a step's option payload, falling back to the
/// type's defaults when the configuration carries none.
pub fn load_options<T: StepOptions + Default>(options: Option<serde_yaml::Value>) -> Result<T> {
    let loaded = match options {
        Some(value) => serde_yaml::from_value(value).context("invalid step options")?,
        None => T::default(),
    };
    loaded.validate()?;
    Ok(loaded)
}
