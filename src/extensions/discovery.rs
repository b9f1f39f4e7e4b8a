//! Extension discovery - builds and maintains the installed-extension set.
//!
//! Discovery merges two sources: a read-only bundled directory shipping with
//! the app and a writable user directory, which it watches for changes while
//! the app runs. Only the host-process instance touches the filesystem; UI
//! processes receive snapshots over the message bus.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, error, info, warn};

use super::installer::PackageInstaller;
use super::manifest::{ExtensionId, ExtensionManifest, InstalledExtension, MANIFEST_FILE};
use super::store::EnablementStore;
use crate::bus::{topic, MessageBus};
use crate::config::ExtensionsConfig;
use crate::error::{LumenError, Result};

/// Capacity of the discovery event channel.
const EVENT_CAPACITY: usize = 64;

/// Interval between write-stability samples of a new manifest.
const STABILITY_INTERVAL: Duration = Duration::from_millis(100);

/// Samples before giving up on a manifest that never settles.
const STABILITY_ATTEMPTS: usize = 50;

/// Change notification for the discovered-extension set.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Added(InstalledExtension),
    Removed(ExtensionId),
}

/// Produces and maintains the authoritative installed-extension set.
pub struct ExtensionDiscovery {
    config: Arc<ExtensionsConfig>,
    installer: Arc<PackageInstaller>,
    store: Arc<dyn EnablementStore>,
    bus: Arc<dyn MessageBus>,
    installed: RwLock<HashMap<ExtensionId, InstalledExtension>>,
    bundled_names: RwLock<HashSet<String>>,
    load_started: AtomicBool,
    loaded_tx: watch::Sender<bool>,
    events: broadcast::Sender<DiscoveryEvent>,
    /// Kept alive for the lifetime of the discovery instance.
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

impl ExtensionDiscovery {
    pub fn new(
        config: Arc<ExtensionsConfig>,
        installer: Arc<PackageInstaller>,
        store: Arc<dyn EnablementStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let (loaded_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            installer,
            store,
            bus,
            installed: RwLock::new(HashMap::new()),
            bundled_names: RwLock::new(HashSet::new()),
            load_started: AtomicBool::new(false),
            loaded_tx,
            events,
            watcher: std::sync::Mutex::new(None),
        }
    }

    /// Whether the initial load completed.
    pub fn is_loaded(&self) -> bool {
        *self.loaded_tx.borrow()
    }

    /// Current `id → InstalledExtension` map.
    pub async fn snapshot(&self) -> HashMap<ExtensionId, InstalledExtension> {
        self.installed.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<InstalledExtension> {
        self.installed.read().await.get(id).cloned()
    }

    /// Subscribe to add/remove notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// One-shot initial load of bundled and user extensions.
    ///
    /// Ensures writable locations exist, installs bundled dependencies
    /// (fatal on failure) and returns the merged map. A second call fails.
    pub async fn load(&self) -> Result<HashMap<ExtensionId, InstalledExtension>> {
        if self.load_started.swap(true, Ordering::SeqCst) {
            return Err(LumenError::General(
                "extension discovery already loaded".into(),
            ));
        }

        tokio::fs::create_dir_all(&self.config.user_dir).await?;
        tokio::fs::create_dir_all(self.config.node_modules_dir()).await?;

        let bundled_root = self.ensure_writable_bundled_dir().await?;
        let bundled = self.load_bundled_extensions(&bundled_root).await?;

        {
            let mut names = self.bundled_names.write().await;
            *names = bundled.iter().map(|ext| ext.name().to_string()).collect();
        }

        let bundled_names = self.bundled_names.read().await.clone();
        let user = self
            .load_from_folder(&self.config.user_dir, &bundled_names, false)
            .await?;

        let mut installed = self.installed.write().await;
        for ext in bundled.into_iter().chain(user) {
            if installed.contains_key(&ext.id) {
                warn!(name = ext.name(), "duplicate extension id, keeping the first");
                continue;
            }
            installed.insert(ext.id.clone(), ext);
        }
        let snapshot = installed.clone();
        drop(installed);

        info!(count = snapshot.len(), "extension discovery loaded");
        self.loaded_tx.send_replace(true);
        self.publish_state();
        Ok(snapshot)
    }

    /// Answer `discovery-state` requests from other processes.
    pub fn serve_state(self: &Arc<Self>) {
        let discovery = Arc::clone(self);
        self.bus.respond(
            topic::DISCOVERY_STATE,
            crate::bus::responder(move |_| {
                let discovery = Arc::clone(&discovery);
                async move { json!({ "isLoaded": discovery.is_loaded() }) }
            }),
        );
    }

    /// Begin watching the user directory for added and removed extensions.
    ///
    /// Legal to call before `load()` resolves; watching starts only once the
    /// loaded flag is set. Depth-limited: only entries directly under the
    /// user directory are considered.
    pub fn watch_extensions(self: &Arc<Self>) {
        let discovery = Arc::clone(self);
        tokio::spawn(async move {
            let mut loaded_rx = discovery.loaded_tx.subscribe();
            while !*loaded_rx.borrow() {
                if loaded_rx.changed().await.is_err() {
                    return;
                }
            }
            if let Err(e) = discovery.start_watcher().await {
                error!("failed to start extension watcher: {}", e);
            }
        });
    }

    async fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => error!("watch error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.config.user_dir, RecursiveMode::NonRecursive)?;
        *self.watcher.lock().expect("watcher lock poisoned") = Some(watcher);
        info!(dir = %self.config.user_dir.display(), "watching user extensions");

        let discovery = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                discovery.handle_watch_event(event).await;
            }
        });
        Ok(())
    }

    async fn handle_watch_event(&self, event: notify::Event) {
        for path in &event.paths {
            // Nested paths are rejected: only entries at the watch root count.
            if !self.config.is_at_user_root(path) {
                continue;
            }
            match event.kind {
                EventKind::Create(_) => self.handle_added_path(path).await,
                EventKind::Remove(_) => self.handle_removed_path(path).await,
                EventKind::Modify(ModifyKind::Name(_)) => {
                    if tokio::fs::symlink_metadata(path).await.is_ok() {
                        self.handle_added_path(path).await;
                    } else {
                        self.handle_removed_path(path).await;
                    }
                }
                _ => {}
            }
        }
    }

    async fn handle_added_path(&self, path: &Path) {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return,
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !wait_for_write_stability(&manifest_path).await {
            warn!(path = %manifest_path.display(), "manifest never settled, skipping");
            return;
        }

        let manifest = match ExtensionManifest::load(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %path.display(), "skipping extension: {}", e);
                return;
            }
        };

        if self.bundled_names.read().await.contains(&manifest.name) {
            warn!(
                name = manifest.name,
                "user extension shadows a bundled extension, skipping"
            );
            return;
        }

        let enabled = self.enabled_for(&manifest, false).await;
        let record = InstalledExtension::new(&self.config, path, manifest, false, enabled);

        if self.installed.read().await.contains_key(&record.id) {
            debug!(id = record.id, "extension already registered");
            return;
        }

        // Recoverable for user extensions: the record is registered either
        // way, the extension just stays non-functional until a reinstall.
        if let Err(e) = self.installer.install(record.name(), path).await {
            warn!(name = record.name(), "dependency install failed: {}", e);
        }

        info!(name = record.name(), "discovered user extension");
        self.installed
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        let _ = self.events.send(DiscoveryEvent::Added(record));
        self.publish_state();
    }

    async fn handle_removed_path(&self, path: &Path) {
        let removed = {
            let mut installed = self.installed.write().await;
            let id = installed
                .values()
                .find(|ext| ext.absolute_path == path)
                .map(|ext| ext.id.clone());
            id.and_then(|id| installed.remove(&id))
        };

        let Some(record) = removed else { return };
        if let Err(e) = self.installer.remove_symlink(record.name()).await {
            warn!(name = record.name(), "symlink cleanup failed: {}", e);
        }
        info!(name = record.name(), "extension removed");
        let _ = self.events.send(DiscoveryEvent::Removed(record.id));
        self.publish_state();
    }

    /// Remove an extension's symlink and delete its source folder.
    ///
    /// The watcher observes the deletion too; both paths are idempotent.
    pub async fn uninstall_extension(&self, id: &str) -> Result<()> {
        let record = {
            let installed = self.installed.read().await;
            installed.get(id).cloned()
        };
        let Some(record) = record else {
            debug!(id, "uninstall: extension not registered");
            return Ok(());
        };

        self.installer.remove_symlink(record.name()).await?;
        match tokio::fs::remove_dir_all(&record.absolute_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let removed = self.installed.write().await.remove(id).is_some();
        if removed {
            info!(name = record.name(), "extension uninstalled");
            let _ = self.events.send(DiscoveryEvent::Removed(record.id));
            self.publish_state();
        }
        Ok(())
    }

    async fn ensure_writable_bundled_dir(&self) -> Result<PathBuf> {
        let bundled = &self.config.bundled_dir;
        if !bundled.exists() {
            tokio::fs::create_dir_all(bundled).await?;
        }
        if dir_is_writable(bundled) {
            return Ok(bundled.clone());
        }
        // The installer creates symlinks into extension folders, which
        // requires a writable root; mirror the read-only bundle.
        let mirror = self.config.bundled_mirror_dir();
        info!(
            from = %bundled.display(),
            to = %mirror.display(),
            "bundled directory is read-only, mirroring"
        );
        copy_dir_recursive(bundled, &mirror)?;
        Ok(mirror)
    }

    async fn load_bundled_extensions(&self, root: &Path) -> Result<Vec<InstalledExtension>> {
        let extensions = self.load_from_folder(root, &HashSet::new(), true).await?;

        let deps: BTreeMap<String, PathBuf> = extensions
            .iter()
            .map(|ext| (ext.name().to_string(), ext.absolute_path.clone()))
            .collect();
        if !deps.is_empty() {
            // Bundled bootstrap must succeed; a broken install root would
            // leave every extension without dependencies.
            self.installer.install_bundled(&deps).await?;
        }
        Ok(extensions)
    }

    /// List a directory and parse each entry's manifest. Non-directories and
    /// names shadowing bundled extensions are skipped; a parse failure drops
    /// that entry, never the batch.
    async fn load_from_folder(
        &self,
        dir: &Path,
        bundled_names: &HashSet<String>,
        is_bundled: bool,
    ) -> Result<Vec<InstalledExtension>> {
        let mut extensions = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let manifest = match ExtensionManifest::load(&path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %path.display(), "skipping extension: {}", e);
                    continue;
                }
            };
            if bundled_names.contains(&manifest.name) {
                warn!(
                    name = manifest.name,
                    "user extension shadows a bundled extension, skipping"
                );
                continue;
            }
            let enabled = self.enabled_for(&manifest, is_bundled).await;
            extensions.push(InstalledExtension::new(
                &self.config,
                &path,
                manifest,
                is_bundled,
                enabled,
            ));
        }
        Ok(extensions)
    }

    /// Merge the persisted enablement flag; bundled extensions default to
    /// enabled, user extensions to disabled.
    async fn enabled_for(&self, manifest: &ExtensionManifest, is_bundled: bool) -> bool {
        let id = super::manifest::derive_id(&self.config, &manifest.name);
        self.store
            .all()
            .await
            .get(&id)
            .map(|entry| entry.enabled)
            .unwrap_or(is_bundled)
    }

    fn publish_state(&self) {
        self.bus
            .publish(topic::DISCOVERY_STATE, json!({ "isLoaded": self.is_loaded() }));
    }
}

/// UI-process view of the discovery state, fed entirely over the bus.
///
/// Holds only the loaded flag; the extension snapshot itself travels over
/// the `extension-list` topics into the loader's synced view. Never touches
/// the filesystem.
pub struct DiscoveryMirror {
    bus: Arc<dyn MessageBus>,
    loaded: AtomicBool,
}

impl DiscoveryMirror {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            loaded: AtomicBool::new(false),
        }
    }

    /// Whether the host's initial load completed, as last reported.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Request the current state, then follow `discovery-state` broadcasts.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // Subscribe before requesting so no update is lost in between.
        let mut broadcasts = self.bus.subscribe(topic::DISCOVERY_STATE);
        let state = self.bus.request(topic::DISCOVERY_STATE, Value::Null).await?;
        self.apply(&state);

        let mirror = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match broadcasts.recv().await {
                    Ok(payload) => mirror.apply(&payload),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    fn apply(&self, payload: &Value) {
        if let Some(loaded) = payload.get("isLoaded").and_then(Value::as_bool) {
            self.loaded.store(loaded, Ordering::SeqCst);
        }
    }
}

/// Wait until the file exists and its size/mtime stop changing, so
/// partially-written manifests are not processed. Returns false if the file
/// never settles within the attempt limit.
async fn wait_for_write_stability(path: &Path) -> bool {
    let mut previous: Option<(u64, Option<std::time::SystemTime>)> = None;
    for _ in 0..STABILITY_ATTEMPTS {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            let sample = (meta.len(), meta.modified().ok());
            if previous == Some(sample) {
                return true;
            }
            previous = Some(sample);
        }
        tokio::time::sleep(STABILITY_INTERVAL).await;
    }
    false
}

fn dir_is_writable(dir: &Path) -> bool {
    let probe = dir.join(".write-probe");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
