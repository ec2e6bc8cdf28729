//! In-process trigger bus for tests and single-node development.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{TriggerBus, TriggerHandler};

#[derive(Default)]
pub struct MemoryTriggerBus {
    handlers: RwLock<HashMap<String, Vec<TriggerHandler>>>,
}

impl MemoryTriggerBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerBus for MemoryTriggerBus {
    async fn subscribe(&self, topic: &str, handler: TriggerHandler) -> Result<()> {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let handlers = self.handlers.read().expect("handler lock poisoned");
        if let Some(subscribers) = handlers.get(topic) {
            for handler in subscribers {
                handler(topic, payload);
            }
        }
        Ok(())
    }
}
