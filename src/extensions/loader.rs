//! Extension loader - turns installed records into live instances.
//!
//! One loader runs per process. The host loader seeds its view straight from
//! discovery and keeps broadcasting changes; UI loaders bootstrap from a
//! snapshot request and re-derive on every broadcast, so the two views stay
//! eventually consistent without shared memory.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use super::discovery::{DiscoveryEvent, ExtensionDiscovery};
use super::manifest::{to_snapshot, ExtensionId, ExtensionSnapshot, InstalledExtension};
use super::module::{ExtensionContext, ExtensionInstance, ModuleLoader};
use super::store::{EnablementEntry, EnablementStore};
use crate::bus::{responder, topic, MessageBus};
use crate::error::Result;
use crate::ProcessKind;

/// Capacity of the loader event channel.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle state of one extension id on this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Unloaded,
    Activating,
    Enabled,
}

/// Change notification for the live-instance set.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    Loaded(ExtensionId),
    Removed(ExtensionId),
}

/// Feature-registration callback, invoked once per newly enabled instance
/// with the number of installations sharing that manifest name.
pub type Registrator = Arc<dyn Fn(&ExtensionInstance, usize) + Send + Sync>;

/// Turns `InstalledExtension` records into live `ExtensionInstance` objects.
pub struct ExtensionLoader {
    process: ProcessKind,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn EnablementStore>,
    module_loader: Arc<dyn ModuleLoader>,
    extensions: RwLock<HashMap<ExtensionId, InstalledExtension>>,
    instances: RwLock<HashMap<ExtensionId, Arc<ExtensionInstance>>>,
    states: RwLock<HashMap<ExtensionId, ExtensionState>>,
    registrators: RwLock<Vec<Registrator>>,
    events: broadcast::Sender<LoaderEvent>,
}

impl ExtensionLoader {
    pub fn new(
        process: ProcessKind,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn EnablementStore>,
        module_loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            process,
            bus,
            store,
            module_loader,
            extensions: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            registrators: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to load/remove notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Register a feature-registration callback. Applies to instances
    /// enabled after registration.
    pub async fn add_registrator(&self, registrator: Registrator) {
        self.registrators.write().await.push(registrator);
    }

    /// Currently live instances.
    pub async fn instances(&self) -> Vec<Arc<ExtensionInstance>> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Look up a live instance by manifest name.
    pub async fn get_by_name(&self, name: &str) -> Option<Arc<ExtensionInstance>> {
        self.instances
            .read()
            .await
            .values()
            .find(|instance| instance.name() == name)
            .cloned()
    }

    /// Lifecycle state of an extension id on this process.
    pub async fn state(&self, id: &str) -> ExtensionState {
        self.states
            .read()
            .await
            .get(id)
            .copied()
            .unwrap_or(ExtensionState::Unloaded)
    }

    /// Replace the synced extension view.
    pub async fn seed(&self, snapshot: HashMap<ExtensionId, InstalledExtension>) {
        *self.extensions.write().await = snapshot;
    }

    /// Host-process initialization: seed from discovery, answer snapshot
    /// requests, keep re-broadcasting and re-deriving on every change.
    pub async fn init_host(self: &Arc<Self>, discovery: &Arc<ExtensionDiscovery>) -> Result<()> {
        self.seed(discovery.snapshot().await).await;
        self.serve_snapshot();

        let loader = Arc::clone(self);
        let mut events = discovery.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DiscoveryEvent::Added(record)) => {
                        loader
                            .extensions
                            .write()
                            .await
                            .insert(record.id.clone(), record);
                        loader.after_change().await;
                    }
                    Ok(DiscoveryEvent::Removed(id)) => {
                        loader.extensions.write().await.remove(&id);
                        loader.after_change().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "discovery events lagged, reseeding is advised");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.follow_peer_snapshots();
        self.after_change().await;
        Ok(())
    }

    /// Follow snapshots broadcast by UI processes, typically after a UI-side
    /// enablement flip. Reseeding re-broadcasts the authoritative view back.
    fn follow_peer_snapshots(self: &Arc<Self>) {
        let loader = Arc::clone(self);
        let mut broadcasts = self.bus.subscribe(topic::EXTENSION_LIST_TO_HOST);
        tokio::spawn(async move {
            loop {
                match broadcasts.recv().await {
                    Ok(payload) => match serde_json::from_value::<ExtensionSnapshot>(payload) {
                        Ok(snapshot) => {
                            loader.seed(snapshot.into_iter().collect()).await;
                            loader.after_change().await;
                        }
                        Err(e) => warn!("discarding malformed extension snapshot: {}", e),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "extension snapshots lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// UI-process initialization: request the initial snapshot, then follow
    /// broadcasts. The UI view holds no filesystem state of its own.
    pub async fn init_ui(self: &Arc<Self>) -> Result<()> {
        let value = self
            .bus
            .request(topic::EXTENSION_LIST_TO_UI, Value::Null)
            .await?;
        let snapshot: ExtensionSnapshot = serde_json::from_value(value)?;
        self.seed(snapshot.into_iter().collect()).await;
        self.load_extensions().await;

        let loader = Arc::clone(self);
        let mut broadcasts = self.bus.subscribe(topic::EXTENSION_LIST_TO_UI);
        tokio::spawn(async move {
            loop {
                match broadcasts.recv().await {
                    Ok(payload) => {
                        match serde_json::from_value::<ExtensionSnapshot>(payload) {
                            Ok(snapshot) => {
                                loader.seed(snapshot.into_iter().collect()).await;
                                loader.load_extensions().await;
                            }
                            Err(e) => warn!("discarding malformed extension snapshot: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "extension snapshots lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    /// Answer snapshot requests from UI processes.
    pub fn serve_snapshot(self: &Arc<Self>) {
        let loader = Arc::clone(self);
        self.bus.respond(
            topic::EXTENSION_LIST_TO_UI,
            responder(move |_| {
                let loader = Arc::clone(&loader);
                async move {
                    let snapshot = to_snapshot(&*loader.extensions.read().await);
                    serde_json::to_value(snapshot).unwrap_or(Value::Null)
                }
            }),
        );
    }

    /// Flip the enablement flag of one record and re-derive.
    pub async fn set_enabled(self: &Arc<Self>, id: &str, enabled: bool) {
        {
            let mut extensions = self.extensions.write().await;
            match extensions.get_mut(id) {
                Some(record) => record.is_enabled = enabled,
                None => {
                    warn!(id, "set_enabled: unknown extension");
                    return;
                }
            }
        }
        self.after_change().await;
    }

    /// Re-broadcast, resync the persisted enablement summary, and
    /// instantiate/retire instances to match the current records.
    async fn after_change(self: &Arc<Self>) {
        self.broadcast_extensions().await;
        self.sync_enablement().await;
        self.load_extensions().await;
    }

    async fn broadcast_extensions(&self) {
        let channel = match self.process {
            ProcessKind::Host => topic::EXTENSION_LIST_TO_UI,
            ProcessKind::Ui => topic::EXTENSION_LIST_TO_HOST,
        };
        let snapshot = to_snapshot(&*self.extensions.read().await);
        match serde_json::to_value(snapshot) {
            Ok(payload) => self.bus.publish(channel, payload),
            Err(e) => warn!("failed to serialize extension snapshot: {}", e),
        }
    }

    async fn sync_enablement(&self) {
        let summary: HashMap<ExtensionId, EnablementEntry> = self
            .extensions
            .read()
            .await
            .iter()
            .map(|(id, ext)| {
                (
                    id.clone(),
                    EnablementEntry {
                        enabled: ext.is_enabled,
                        name: ext.name().to_string(),
                    },
                )
            })
            .collect();
        if let Err(e) = self.store.set_all(summary).await {
            warn!("failed to persist enablement summary: {}", e);
        }
    }

    /// Number of installations (bundled or user) sharing a manifest name.
    pub async fn installation_count(&self, name: &str) -> usize {
        self.extensions
            .read()
            .await
            .values()
            .filter(|ext| ext.name() == name)
            .count()
    }

    /// Instantiate every compatible, enabled, not-yet-live record and retire
    /// every instance whose record was disabled or removed.
    ///
    /// Activations of the batch run concurrently; enable hooks and
    /// registrators only run after all of them settle. Entry-point and
    /// activation failures are per-extension, never aborting the loop.
    ///
    /// # Panics
    ///
    /// Panics if two live extensions would share a manifest name. Names are
    /// the addressing key for routing; a collision is a programming error
    /// expected to be prevented upstream.
    pub async fn load_extensions(&self) {
        let snapshot = self.extensions.read().await.clone();

        let mut pending: Vec<(ExtensionId, InstalledExtension, String)> = Vec::new();
        {
            let instances = self.instances.read().await;
            let mut states = self.states.write().await;
            for (id, record) in &snapshot {
                if !(record.is_compatible && record.is_enabled) {
                    continue;
                }
                if instances.contains_key(id)
                    || matches!(states.get(id), Some(ExtensionState::Activating))
                {
                    continue;
                }
                let Some(entry) = record.manifest.entry_point(self.process) else {
                    debug!(
                        name = record.name(),
                        "no entry point for this process, skipping"
                    );
                    continue;
                };
                let name_taken = instances.values().any(|i| i.name() == record.name())
                    || pending.iter().any(|(_, r, _)| r.name() == record.name());
                if name_taken {
                    panic!(
                        "two live extensions share the name {:?}; names must be unique",
                        record.name()
                    );
                }
                states.insert(id.clone(), ExtensionState::Activating);
                pending.push((id.clone(), record.clone(), entry.to_string()));
            }
        }

        let mut activations = Vec::new();
        for (id, record, entry) in pending {
            let entry_path = record.absolute_path.join(&entry);
            match self.module_loader.load(&record, &entry_path) {
                Ok(module) => {
                    let instance = Arc::new(ExtensionInstance::new(record, module));
                    let ctx =
                        ExtensionContext::new(instance.name().to_string(), self.bus.clone());
                    activations.push(async move {
                        let result = instance.activate(ctx).await;
                        (id, instance, result)
                    });
                }
                Err(e) => {
                    error!("{}", e);
                    self.states
                        .write()
                        .await
                        .insert(id, ExtensionState::Unloaded);
                }
            }
        }

        let settled = futures::future::join_all(activations).await;

        let mut enabled = Vec::new();
        for (id, instance, result) in settled {
            match result {
                Ok(()) => {
                    self.instances
                        .write()
                        .await
                        .insert(id.clone(), instance.clone());
                    self.states
                        .write()
                        .await
                        .insert(id.clone(), ExtensionState::Enabled);
                    enabled.push((id, instance));
                }
                Err(e) => {
                    error!(extension = instance.name(), "activation failed: {}", e);
                    self.states.write().await.insert(id, ExtensionState::Unloaded);
                }
            }
        }

        let registrators = self.registrators.read().await.clone();
        for (id, instance) in enabled {
            instance.enable().await;
            let count = self.installation_count(instance.name()).await;
            for registrator in &registrators {
                registrator(&instance, count);
            }
            info!(extension = instance.name(), "extension enabled");
            let _ = self.events.send(LoaderEvent::Loaded(id));
        }

        let to_retire: Vec<(ExtensionId, Arc<ExtensionInstance>)> = {
            let instances = self.instances.read().await;
            instances
                .iter()
                .filter(|(id, _)| match snapshot.get(*id) {
                    None => true,
                    Some(record) => !(record.is_enabled && record.is_compatible),
                })
                .map(|(id, instance)| (id.clone(), instance.clone()))
                .collect()
        };
        for (id, instance) in to_retire {
            instance.disable().await;
            self.instances.write().await.remove(&id);
            self.states
                .write()
                .await
                .insert(id.clone(), ExtensionState::Unloaded);
            info!(extension = instance.name(), "extension retired");
            let _ = self.events.send(LoaderEvent::Removed(id));
        }
    }
}
