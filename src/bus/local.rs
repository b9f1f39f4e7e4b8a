//! In-process message bus implementation.
//!
//! Backs tests and single-process embedding. Each topic gets its own lazily
//! created broadcast channel; requests go straight to the registered
//! responder.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::{MessageBus, Responder};
use crate::error::{LumenError, Result};

/// Capacity of each per-topic broadcast channel.
/// Subscribers falling further behind receive a Lagged error.
const CHANNEL_CAPACITY: usize = 256;

/// In-process `MessageBus` over tokio broadcast channels.
#[derive(Default)]
pub struct LocalBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    responders: RwLock<HashMap<String, Responder>>,
}

impl LocalBus {
    /// Create a new bus with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the bus pre-wrapped for injection.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Value> {
        if let Some(sender) = self.channels.read().expect("bus lock poisoned").get(topic) {
            return sender.clone();
        }
        let mut channels = self.channels.write().expect("bus lock poisoned");
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    fn publish(&self, topic: &str, payload: Value) {
        trace!(topic, "bus publish");
        // Ignore send errors - it's fine if no one is listening
        let _ = self.sender_for(topic).send(payload);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        self.sender_for(topic).subscribe()
    }

    fn respond(&self, topic: &str, responder: Responder) {
        self.responders
            .write()
            .expect("bus lock poisoned")
            .insert(topic.to_string(), responder);
    }

    async fn request(&self, topic: &str, payload: Value) -> Result<Value> {
        let responder = self
            .responders
            .read()
            .expect("bus lock poisoned")
            .get(topic)
            .cloned()
            .ok_or_else(|| LumenError::not_found("bus responder", topic))?;
        Ok(responder(payload).await)
    }
}
