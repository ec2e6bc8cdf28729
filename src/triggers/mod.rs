//! Trigger bus: topic publish/subscribe between syncers and extractors.
//!
//! Topics are plain strings, payloads are opaque. Delivery is at least
//! once; extraction is idempotent (replace-all writes), so duplicate
//! deliveries are harmless. Handlers run on the dispatching task and must
//! not block; anything that does real work spawns its own task.

pub mod memory;
pub mod mqtt;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryTriggerBus;
pub use mqtt::MqttTriggerBus;

/// Callback invoked with `(topic, payload)` for every delivery.
pub type TriggerHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[async_trait]
pub trait TriggerBus: Send + Sync {
    /// Register a handler for a topic. Subscriptions live for the process
    /// lifetime; there is no unsubscribe.
    async fn subscribe(&self, topic: &str, handler: TriggerHandler) -> Result<()>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Topic published by a syncer when fresh raw data for `kind/name` landed.
pub fn sync_topic(source: &str, kind: &str, name: &str) -> String {
    format!("triggers/sync/{source}/{kind}/{name}")
}

/// Topic published after an extractor successfully refreshed its table.
pub fn feature_topic(extractor: &str) -> String {
    format!("triggers/features/{extractor}")
}
