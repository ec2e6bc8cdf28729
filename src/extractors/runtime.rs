//! Extractor runtime: builds the per-topic execution plans at startup and
//! runs the minimal affected subgraph when a trigger fires.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::ExtractorConfig;
use crate::features::FeatureStore;
use crate::graph::DependencyGraph;
use crate::monitor::Monitor;
use crate::triggers::{feature_topic, TriggerBus};

use super::{build_extractor, Extractor, MonitoredExtractor};

/// Layered execution order for one subgraph: outer = layers, inner =
/// extractor indices that may run in parallel.
type LayeredPlan = Vec<Vec<usize>>;

pub struct ExtractorRuntime {
    store: Arc<dyn FeatureStore>,
    bus: Arc<dyn TriggerBus>,
    extractors: Vec<Arc<MonitoredExtractor>>,
    /// Per-topic execution plans, precomputed at startup.
    plans: HashMap<String, Vec<LayeredPlan>>,
    /// At most one extraction campaign runs at a time.
    campaign: Mutex<()>,
    extract_timeout: Duration,
}

impl ExtractorRuntime {
    /// Initialization protocol: resolve configured extractors against the
    /// registry, wrap them with monitoring, init each in configuration
    /// order, build the dependency graph and precompute one layered plan
    /// per trigger topic. Any unknown name, unresolved dependency or cycle
    /// aborts startup.
    pub async fn new(
        configs: &[ExtractorConfig],
        store: Arc<dyn FeatureStore>,
        bus: Arc<dyn TriggerBus>,
        monitor: Arc<Monitor>,
        extract_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let mut wrapped: Vec<MonitoredExtractor> = Vec::with_capacity(configs.len());
        for config in configs {
            let extractor = build_extractor(config)?;
            wrapped.push(MonitoredExtractor::new(extractor, monitor.clone()));
        }
        for (extractor, config) in wrapped.iter_mut().zip(configs) {
            extractor
                .init(store.clone(), config.options.clone())
                .await
                .with_context(|| format!("failed to initialize extractor '{}'", config.name))?;
        }

        let nodes: Vec<(String, Vec<String>)> = wrapped
            .iter()
            .map(|e| (e.name().to_string(), e.dependencies().to_vec()))
            .collect();
        let graph = DependencyGraph::build(&nodes).context("extractor dependency graph")?;
        graph.resolve().context("extractor dependency graph")?;

        let topics: BTreeSet<String> = wrapped
            .iter()
            .flat_map(|e| e.triggers().iter().cloned())
            .collect();
        let mut plans = HashMap::new();
        for topic in topics {
            let subgraphs = graph.distinct_subgraphs(|node| {
                wrapped[node].triggers().iter().any(|t| t == &topic)
            });
            let layered: Vec<LayeredPlan> = subgraphs
                .iter()
                .map(|nodes| graph.resolve_within(nodes))
                .collect::<Result<_>>()?;
            plans.insert(topic, layered);
        }

        Ok(Arc::new(Self {
            store,
            bus,
            extractors: wrapped.into_iter().map(Arc::new).collect(),
            plans,
            campaign: Mutex::new(()),
            extract_timeout,
        }))
    }

    /// Subscribe to every planned topic. Handlers hand off to a spawned
    /// task immediately so the bus dispatch never blocks on a campaign.
    pub async fn subscribe_triggers(self: &Arc<Self>) -> Result<()> {
        for topic in self.plans.keys() {
            let runtime = Arc::clone(self);
            let subscribed = topic.clone();
            self.bus
                .subscribe(
                    topic,
                    Arc::new(move |_, _| {
                        let runtime = Arc::clone(&runtime);
                        let topic = subscribed.clone();
                        tokio::spawn(async move { runtime.run_topic(&topic).await });
                    }),
                )
                .await?;
        }
        info!(topics = self.plans.len(), "subscribed to trigger topics");
        Ok(())
    }

    /// Run the precomputed plan for one topic: each subgraph's layers in
    /// order, layer members in parallel, waiting at every layer boundary.
    pub async fn run_topic(&self, topic: &str) {
        let Some(plans) = self.plans.get(topic) else {
            return;
        };
        let _guard = self.campaign.lock().await;
        info!(topic, "starting extraction campaign");
        for layers in plans {
            for layer in layers {
                join_all(
                    layer
                        .iter()
                        .map(|&node| self.run_extractor(&self.extractors[node])),
                )
                .await;
            }
        }
    }

    async fn run_extractor(&self, extractor: &Arc<MonitoredExtractor>) {
        if !extractor.needs_update() {
            extractor.notify_skip();
            return;
        }

        let rows: Vec<Value> = match timeout(self.extract_timeout, extractor.extract()).await {
            Err(_) => {
                warn!(extractor = extractor.name(), "extraction deadline exceeded");
                return;
            }
            Ok(Err(err)) => {
                error!(extractor = extractor.name(), error = %err, "extraction failed");
                return;
            }
            Ok(Ok(rows)) => rows,
        };

        if rows.is_empty() {
            // Upstream not ready; retry on the next trigger.
            warn!(extractor = extractor.name(), "extraction produced no rows");
            return;
        }

        let count = rows.len();
        if let Err(err) = self.store.replace_all(extractor.table(), &rows).await {
            error!(extractor = extractor.name(), error = %err, "feature write failed");
            return;
        }
        extractor.mark_updated();
        info!(extractor = extractor.name(), rows = count, "features refreshed");

        // Wake dependents outside this trigger's subgraph.
        let topic = feature_topic(extractor.name());
        if let Err(err) = self.bus.publish(&topic, b"").await {
            warn!(topic = %topic, error = %err, "failed to publish completion topic");
        }
    }
}
