//! Step scoping: declarative restriction of a step's effect to a subset of
//! requests and hosts.
//!
//! A scoper wraps a step. Spec selectors can skip the step for a whole
//! request; host selectors partition the candidates into in-scope and
//! out-of-scope, and every out-of-scope host has its activation overwritten
//! with no-effect. Scoping is orthogonal to step logic; the wrapped step
//! never sees it.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::extractors::host_capabilities::HostCapabilities;
use crate::features::{fetch_all, FeatureStore};

use super::activation::NO_EFFECT;
use super::requests::SchedulingRequest;
use super::step::{SchedulingStep, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorAction {
    Skip,
    #[default]
    Continue,
}

/// Selector on request properties.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecSelector {
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_yaml::Value,
    #[serde(default)]
    pub action: SelectorAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetOperation {
    Union,
    Intersection,
    Difference,
}

/// Selector on per-host capabilities, combined into the running in-scope
/// set with a set operation.
#[derive(Debug, Clone, Deserialize)]
pub struct HostSelector {
    pub subject: String,
    #[serde(rename = "type", default = "default_host_match")]
    pub kind: String,
    pub value: String,
    pub op: SetOperation,
}

fn default_host_match() -> String {
    "infix".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepScope {
    #[serde(default)]
    pub spec_selectors: Vec<SpecSelector>,
    #[serde(default)]
    pub host_selectors: Vec<HostSelector>,
}

impl StepScope {
    /// Evaluate spec selectors in order. Returns the reason when a matching
    /// selector says to skip the whole step for this request.
    pub fn skip_reason(&self, request: &SchedulingRequest) -> Option<String> {
        for selector in &self.spec_selectors {
            let matched = match (selector.subject.as_str(), selector.kind.as_str()) {
                ("flavor", "infix") => {
                    let needle = selector.value.as_str().unwrap_or_default();
                    request
                        .flavor_name()
                        .map(|name| name.contains(needle))
                        .unwrap_or(false)
                }
                ("vmware", "bool") => {
                    let expected = selector.value.as_bool().unwrap_or(false);
                    request.flags.vmware == expected
                }
                (subject, kind) => {
                    warn!(subject, kind, "ignoring unknown spec selector");
                    false
                }
            };
            if matched && selector.action == SelectorAction::Skip {
                return Some(format!(
                    "spec selector on '{}' matched with action=skip",
                    selector.subject
                ));
            }
        }
        None
    }

    /// Apply host selectors against the candidate set, returning the hosts
    /// the step is allowed to affect.
    ///
    /// The running set starts empty when the first selector unions (so the
    /// selectors build the scope up) and as the full candidate set otherwise
    /// (so they carve it down).
    pub fn in_scope_hosts(
        &self,
        request: &SchedulingRequest,
        capabilities: &[HostCapabilities],
    ) -> HashSet<String> {
        let candidates: HashSet<String> = request.host_names().map(str::to_owned).collect();
        let mut in_scope = match self.host_selectors.first() {
            Some(selector) if selector.op == SetOperation::Union => HashSet::new(),
            _ => candidates.clone(),
        };

        for selector in &self.host_selectors {
            let matched: HashSet<String> = capabilities
                .iter()
                .filter(|caps| candidates.contains(&caps.compute_host))
                .filter(|caps| match (selector.subject.as_str(), selector.kind.as_str()) {
                    ("trait", "infix") => caps.traits.contains(&selector.value),
                    ("hypervisor_type", "infix") => {
                        caps.hypervisor_type.contains(&selector.value)
                    }
                    (subject, kind) => {
                        warn!(subject, kind, "ignoring unknown host selector");
                        false
                    }
                })
                .map(|caps| caps.compute_host.clone())
                .collect();

            in_scope = match selector.op {
                SetOperation::Union => in_scope.union(&matched).cloned().collect(),
                SetOperation::Intersection => in_scope.intersection(&matched).cloned().collect(),
                SetOperation::Difference => in_scope.difference(&matched).cloned().collect(),
            };
        }
        in_scope
    }

    fn is_host_scoped(&self) -> bool {
        !self.host_selectors.is_empty()
    }
}

/// A step wrapped with its scope specification.
pub struct ScopedStep {
    inner: Box<dyn SchedulingStep>,
    scope: StepScope,
    store: Option<Arc<dyn FeatureStore>>,
}

impl ScopedStep {
    pub fn new(inner: Box<dyn SchedulingStep>, scope: StepScope) -> Self {
        Self {
            inner,
            scope,
            store: None,
        }
    }
}

#[async_trait]
impl SchedulingStep for ScopedStep {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn alias(&self) -> &str {
        self.inner.alias()
    }

    async fn init(
        &mut self,
        alias: String,
        store: Arc<dyn FeatureStore>,
        options: Option<serde_yaml::Value>,
    ) -> Result<()> {
        self.store = Some(store.clone());
        self.inner.init(alias, store, options).await
    }

    async fn run(&self, request: &SchedulingRequest) -> Result<StepOutcome> {
        if let Some(reason) = self.scope.skip_reason(request) {
            return Ok(StepOutcome::Skipped(reason));
        }

        let mut result = match self.inner.run(request).await? {
            StepOutcome::Applied(result) => result,
            skipped @ StepOutcome::Skipped(_) => return Ok(skipped),
        };
        if !self.scope.is_host_scoped() {
            return Ok(StepOutcome::Applied(result));
        }

        let store = self
            .store
            .as_ref()
            .context("scoped step was not initialized")?;
        let capabilities: Vec<HostCapabilities> = fetch_all(store.as_ref()).await?;
        let in_scope = self.scope.in_scope_hosts(request, &capabilities);

        // Out-of-scope hosts stay in the candidate set with no effect, even
        // when the inner step filtered them out.
        for host in request.host_names() {
            if !in_scope.contains(host) {
                result.activations.insert(host.to_string(), NO_EFFECT);
            }
        }
        Ok(StepOutcome::Applied(result))
    }
}
