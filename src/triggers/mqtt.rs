//! MQTT-backed trigger bus.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{TriggerBus, TriggerHandler};

pub struct MqttTriggerBus {
    client: AsyncClient,
    handlers: Arc<RwLock<HashMap<String, Vec<TriggerHandler>>>>,
}

impl MqttTriggerBus {
    /// Connect to the broker and start the event loop. The loop reconnects
    /// on connection errors and dispatches inbound publishes to subscribed
    /// handlers; it runs for the process lifetime.
    pub fn connect(broker_url: &str) -> Result<Arc<Self>> {
        let url = Url::parse(broker_url).context("invalid broker URL")?;
        let host = url.host_str().context("broker URL is missing a host")?;
        let port = url.port().unwrap_or(1883);

        let client_id = format!("cortex-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let handlers: Arc<RwLock<HashMap<String, Vec<TriggerHandler>>>> = Arc::default();
        let bus = Arc::new(Self {
            client,
            handlers: handlers.clone(),
        });

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, "trigger received");
                        let registered = handlers.read().expect("handler lock poisoned");
                        if let Some(subscribers) = registered.get(publish.topic.as_str()) {
                            for handler in subscribers {
                                handler(&publish.topic, &publish.payload);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "broker connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(bus)
    }
}

#[async_trait]
impl TriggerBus for MqttTriggerBus {
    async fn subscribe(&self, topic: &str, handler: TriggerHandler) -> Result<()> {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to '{topic}'"))
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .with_context(|| format!("failed to publish to '{topic}'"))
    }
}
