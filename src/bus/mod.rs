//! Message bus abstraction for cross-process coordination.
//!
//! The host process and the UI processes share no memory; everything they
//! agree on travels over named topics. The bus exposes fire-and-forget
//! broadcasts plus request/response, and the concrete transport is an
//! embedder concern. The in-process `LocalBus` implementation backs tests
//! and single-process embedding.

pub mod local;

pub use local::LocalBus;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

/// Well-known topic names used by the runtime.
pub mod topic {
    /// Request/broadcast carrying `{ "isLoaded": bool }`.
    pub const DISCOVERY_STATE: &str = "discovery-state";
    /// Full `[id, InstalledExtension][]` snapshot, host to UI.
    pub const EXTENSION_LIST_TO_UI: &str = "extension-list:host-to-ui";
    /// Full `[id, InstalledExtension][]` snapshot, UI to host.
    pub const EXTENSION_LIST_TO_HOST: &str = "extension-list:ui-to-host";
    /// `(rawUrl, attempt)` after each internal route resolution.
    pub const PROTOCOL_INTERNAL: &str = "protocol-internal";
    /// `(rawUrl, attempt)` after each extension route resolution.
    pub const PROTOCOL_EXTENSION: &str = "protocol-extension";
    /// `(errorMessage, rawUrl)` after a failed route call.
    pub const PROTOCOL_INVALID: &str = "protocol-invalid";
}

/// Handler answering `request()` calls on a topic.
pub type Responder = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Wrap an async closure into a [`Responder`].
pub fn responder<F, Fut>(f: F) -> Responder
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Value> + Send + 'static,
{
    Arc::new(move |payload: Value| -> BoxFuture<'static, Value> { Box::pin(f(payload)) })
}

/// Abstract named-topic message bus spanning the process boundary.
///
/// Broadcasts are delivered in send order per topic, but consumers must
/// treat any state derived from them as eventually consistent.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Broadcast a payload on a topic. Never blocks, never fails; a topic
    /// without subscribers drops the payload.
    fn publish(&self, topic: &str, payload: Value);

    /// Subscribe to broadcasts on a topic.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value>;

    /// Register the responder answering requests on a topic. A topic has at
    /// most one responder; registering again replaces it.
    fn respond(&self, topic: &str, responder: Responder);

    /// Send a request on a topic and await the response.
    async fn request(&self, topic: &str, payload: Value) -> Result<Value>;
}
