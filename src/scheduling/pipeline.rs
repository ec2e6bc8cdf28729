//! Ordered step execution and final ranking.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::features::FeatureStore;
use crate::monitor::Monitor;

use super::activation::combine;
use super::requests::SchedulingRequest;
use super::scope::ScopedStep;
use super::step::{SchedulingStep, StepOutcome};
use super::steps::build_step;

/// One entry of the per-request application trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step: String,
    pub alias: String,
    /// Running weights after this step was applied (or skipped).
    pub weights: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Hosts ordered best first.
    pub hosts: Vec<String>,
    pub trace: Vec<StepTrace>,
}

/// An immutable, initialized chain of scheduling steps.
pub struct SchedulingPipeline {
    name: String,
    steps: Vec<Box<dyn SchedulingStep>>,
    monitor: Arc<Monitor>,
}

impl SchedulingPipeline {
    /// Resolve, wrap and initialize every configured step. Unknown step
    /// names and invalid option payloads are configuration-fatal.
    pub async fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn FeatureStore>,
        monitor: Arc<Monitor>,
    ) -> Result<Self> {
        let mut steps: Vec<Box<dyn SchedulingStep>> = Vec::with_capacity(config.steps.len());
        for step_config in &config.steps {
            let step = build_step(&step_config.name)
                .with_context(|| format!("pipeline '{}'", config.name))?;
            let mut step: Box<dyn SchedulingStep> = match &step_config.scope {
                Some(scope) => Box::new(ScopedStep::new(step, scope.clone())),
                None => step,
            };
            let alias = step_config
                .alias
                .clone()
                .unwrap_or_else(|| step_config.name.clone());
            step.init(alias, store.clone(), step_config.options.clone())
                .await
                .with_context(|| {
                    format!(
                        "failed to initialize step '{}' of pipeline '{}'",
                        step_config.name, config.name
                    )
                })?;
            steps.push(step);
        }
        Ok(Self {
            name: config.name.clone(),
            steps,
            monitor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every step in order and rank the surviving hosts.
    ///
    /// The initial weights are the caller's baseline weights restricted to
    /// the candidate set. A failing step aborts the whole pipeline; the
    /// caller falls back to its own ordering rather than trusting a
    /// partially applied ranking.
    pub async fn run(&self, request: &SchedulingRequest) -> Result<PipelineOutcome> {
        let mut weights: HashMap<String, f64> = request
            .host_names()
            .filter_map(|host| request.weights.get(host).map(|w| (host.to_string(), *w)))
            .collect();
        let mut trace = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let timer = self
                .monitor
                .step_duration
                .with_label_values(&[step.name()])
                .start_timer();
            let outcome = step
                .run(request)
                .await
                .with_context(|| format!("step '{}' failed", step.alias()));
            timer.observe_duration();

            match outcome? {
                StepOutcome::Skipped(reason) => {
                    debug!(step = step.alias(), reason = %reason, "step skipped");
                }
                StepOutcome::Applied(result) => {
                    weights = combine(&weights, &result.activations);
                }
            }
            trace.push(StepTrace {
                step: step.name().to_string(),
                alias: step.alias().to_string(),
                weights: weights.clone(),
            });
        }

        // Highest weight first; ties keep the caller's baseline order.
        let inbound_position: HashMap<&str, usize> = request
            .host_names()
            .enumerate()
            .map(|(i, host)| (host, i))
            .collect();
        let mut ranked: Vec<(String, f64)> = weights.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let pa = inbound_position.get(a.0.as_str()).copied().unwrap_or(usize::MAX);
                    let pb = inbound_position.get(b.0.as_str()).copied().unwrap_or(usize::MAX);
                    pa.cmp(&pb)
                })
        });

        Ok(PipelineOutcome {
            hosts: ranked.into_iter().map(|(host, _)| host).collect(),
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::extractors::flavor_host_space::FlavorHostSpace;
    use crate::extractors::host_cpu_contention::HostCpuContention;
    use crate::extractors::project_noisiness::ProjectNoisiness;
    use crate::features::MemoryFeatureStore;
    use crate::scheduling::requests::{
        FlavorSpec, HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest,
    };

    async fn pipeline(yaml: &str, store: Arc<MemoryFeatureStore>) -> SchedulingPipeline {
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        SchedulingPipeline::from_config(&config, store, Monitor::new().unwrap())
            .await
            .unwrap()
    }

    fn request(hosts: &[&str], weights: &[(&str, f64)]) -> SchedulingRequest {
        SchedulingRequest {
            domain: SchedulingDomain::Compute,
            resource_id: "instance-1".into(),
            project_id: "project-1".into(),
            availability_zone: None,
            flavor: None,
            flags: RequestFlags::default(),
            hosts: hosts
                .iter()
                .map(|h| HostCandidate {
                    host: h.to_string(),
                    hypervisor_hostname: String::new(),
                })
                .collect(),
            weights: weights.iter().map(|(h, w)| (h.to_string(), *w)).collect(),
            pipeline: None,
        }
    }

    fn zero_weights<'a>(hosts: &[&'a str]) -> Vec<(&'a str, f64)> {
        hosts.iter().map(|h| (*h, 0.0)).collect()
    }

    #[tokio::test]
    async fn ranks_hosts_by_contention_ascending() {
        let store = Arc::new(MemoryFeatureStore::new());
        store
            .seed(&[
                contention("host-a", 10.0),
                contention("host-b", 50.0),
                contention("host-c", 90.0),
            ])
            .await
            .unwrap();

        let pipeline = pipeline(
            "name: default\nsteps:\n  - name: avoid_contended_hosts\n    options: {lower: 10.0, upper: 100.0, activation_lower: 0.0, activation_upper: -1.0}",
            store,
        )
        .await;

        let hosts = ["host-a", "host-b", "host-c"];
        let outcome = pipeline
            .run(&request(&hosts, &zero_weights(&hosts)))
            .await
            .unwrap();
        assert_eq!(outcome.hosts, vec!["host-a", "host-b", "host-c"]);

        let last = &outcome.trace.last().unwrap().weights;
        assert!(last["host-a"].abs() < 1e-9);
        assert!((last["host-c"] + 0.710_9).abs() < 1e-3);
    }

    #[tokio::test]
    async fn noisy_project_is_pushed_off_its_hosts() {
        let store = Arc::new(MemoryFeatureStore::new());
        store
            .seed(&[
                noisiness("project-1", "h1", 25.0),
                noisiness("project-1", "h2", 30.0),
            ])
            .await
            .unwrap();

        let pipeline = pipeline(NOISY_PIPELINE, store).await;

        let hosts = ["h1", "h2", "h3"];
        let mut req = request(&hosts, &zero_weights(&hosts));
        req.flags.vmware = true;
        let outcome = pipeline.run(&req).await.unwrap();
        assert_eq!(outcome.hosts, vec!["h3", "h1", "h2"]);

        let last = &outcome.trace.last().unwrap().weights;
        assert!(last["h1"] < 0.0 && last["h2"] < 0.0);
        assert!(last["h1"] > last["h2"]);
        assert_eq!(last["h3"], 0.0);
    }

    #[tokio::test]
    async fn non_vmware_requests_skip_the_scoped_step() {
        let store = Arc::new(MemoryFeatureStore::new());
        store
            .seed(&[
                noisiness("project-1", "h1", 25.0),
                noisiness("project-1", "h2", 30.0),
            ])
            .await
            .unwrap();

        let pipeline = pipeline(NOISY_PIPELINE, store).await;

        let hosts = ["h1", "h2", "h3"];
        let outcome = pipeline
            .run(&request(&hosts, &zero_weights(&hosts)))
            .await
            .unwrap();
        assert_eq!(outcome.hosts, vec!["h1", "h2", "h3"]);
        let last = &outcome.trace.last().unwrap().weights;
        assert!(last.values().all(|w| *w == 0.0));
    }

    #[tokio::test]
    async fn empty_inbound_weights_produce_empty_ranking() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed::<HostCpuContention>(&[]).await.unwrap();
        let pipeline = pipeline(
            "name: default\nsteps: [{name: avoid_contended_hosts}]",
            store,
        )
        .await;
        let outcome = pipeline.run(&request(&[], &[])).await.unwrap();
        assert!(outcome.hosts.is_empty());
    }

    #[tokio::test]
    async fn no_effect_steps_preserve_the_inbound_ranking() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed::<HostCpuContention>(&[]).await.unwrap();
        let pipeline = pipeline(
            "name: default\nsteps: [{name: avoid_contended_hosts}]",
            store,
        )
        .await;
        let hosts = ["h1", "h2", "h3"];
        let outcome = pipeline
            .run(&request(&hosts, &[("h1", 0.2), ("h2", 0.9), ("h3", 0.5)]))
            .await
            .unwrap();
        assert_eq!(outcome.hosts, vec!["h2", "h3", "h1"]);
    }

    #[tokio::test]
    async fn ties_keep_the_callers_candidate_order() {
        let store = Arc::new(MemoryFeatureStore::new());
        store.seed::<HostCpuContention>(&[]).await.unwrap();
        let pipeline = pipeline(
            "name: default\nsteps: [{name: avoid_contended_hosts}]",
            store,
        )
        .await;
        let hosts = ["h3", "h1", "h2"];
        let outcome = pipeline
            .run(&request(&hosts, &zero_weights(&hosts)))
            .await
            .unwrap();
        assert_eq!(outcome.hosts, vec!["h3", "h1", "h2"]);
    }

    #[tokio::test]
    async fn filtered_hosts_are_absent_from_the_ranking() {
        let store = Arc::new(MemoryFeatureStore::new());
        store
            .seed(&[
                space("m1.small", "h1", true),
                space("m1.small", "h2", false),
            ])
            .await
            .unwrap();
        let pipeline = pipeline(
            "name: reservations\nsteps: [{name: filter_has_capacity}]",
            store,
        )
        .await;

        let hosts = ["h1", "h2", "h3"];
        let mut req = request(&hosts, &zero_weights(&hosts));
        req.flavor = Some(FlavorSpec {
            id: "1".into(),
            name: "m1.small".into(),
            memory_mb: 2048,
            vcpus: 1,
            root_gb: 20,
            ephemeral_gb: 0,
            extra_specs: HashMap::new(),
        });
        let outcome = pipeline.run(&req).await.unwrap();
        // h2 does not fit, h3 has no space row at all.
        assert_eq!(outcome.hosts, vec!["h1"]);
    }

    const NOISY_PIPELINE: &str = "\
name: default
steps:
  - name: avoid_noisy_projects
    options: {avg_cpu_threshold: 20.0, activation_on_hit: -1.0}
    scope:
      spec_selectors:
        - {subject: vmware, type: bool, value: false, action: skip}";

    fn contention(host: &str, avg: f64) -> HostCpuContention {
        HostCpuContention {
            compute_host: host.to_string(),
            avg_cpu_contention: avg,
            max_cpu_contention: avg,
        }
    }

    fn noisiness(project: &str, host: &str, avg: f64) -> ProjectNoisiness {
        ProjectNoisiness {
            project_id: project.to_string(),
            compute_host: host.to_string(),
            avg_cpu_demand_pct: avg,
        }
    }

    fn space(flavor: &str, host: &str, fits: bool) -> FlavorHostSpace {
        FlavorHostSpace {
            flavor_name: flavor.to_string(),
            compute_host: host.to_string(),
            fits,
            ram_left_mb: if fits { 1024 } else { -1024 },
            vcpus_left: 0,
            disk_left_gb: 0,
        }
    }
}
