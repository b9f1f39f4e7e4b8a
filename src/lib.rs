//! Extension runtime for the Lumen desktop app.
//!
//! Discovers, installs, enables and loads third-party extensions, and routes
//! `lumen://` URLs to their handlers. The runtime is mirrored: the host
//! process owns discovery and installation, while every UI process derives
//! its own live instances and routing resolutions from state synced over the
//! message bus. Only state crosses the process boundary, never results.

pub mod bus;
pub mod config;
pub mod error;
pub mod extensions;
pub mod logging;
pub mod router;

pub use config::ExtensionsConfig;
pub use error::{LumenError, Result};

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::extensions::store::EnablementStore;
use crate::extensions::{
    DiscoveryMirror, ExtensionDiscovery, ExtensionLoader, ModuleLoader, PackageInstaller,
};
use crate::router::ProtocolRouter;

/// Which side of the process boundary a runtime component runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Host,
    Ui,
}

/// Composition root wiring one process's runtime components together.
pub struct ExtensionRuntime {
    process: ProcessKind,
    discovery: Option<Arc<ExtensionDiscovery>>,
    discovery_mirror: Option<Arc<DiscoveryMirror>>,
    loader: Arc<ExtensionLoader>,
    router: Arc<ProtocolRouter>,
}

impl ExtensionRuntime {
    /// Build the host-process runtime, which owns discovery and installs.
    pub fn new_host(
        config: ExtensionsConfig,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn EnablementStore>,
        module_loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let config = Arc::new(config);
        let installer = Arc::new(PackageInstaller::new(config.clone()));
        let discovery = Arc::new(ExtensionDiscovery::new(
            config,
            installer,
            store.clone(),
            bus.clone(),
        ));
        let loader = Arc::new(ExtensionLoader::new(
            ProcessKind::Host,
            bus.clone(),
            store,
            module_loader,
        ));
        let router = Arc::new(ProtocolRouter::new(loader.clone(), bus));
        Self {
            process: ProcessKind::Host,
            discovery: Some(discovery),
            discovery_mirror: None,
            loader,
            router,
        }
    }

    /// Build a UI-process runtime, which mirrors host state over the bus.
    pub fn new_ui(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn EnablementStore>,
        module_loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let loader = Arc::new(ExtensionLoader::new(
            ProcessKind::Ui,
            bus.clone(),
            store,
            module_loader,
        ));
        let router = Arc::new(ProtocolRouter::new(loader.clone(), bus.clone()));
        Self {
            process: ProcessKind::Ui,
            discovery: None,
            discovery_mirror: Some(Arc::new(DiscoveryMirror::new(bus))),
            loader,
            router,
        }
    }

    pub fn process(&self) -> ProcessKind {
        self.process
    }

    /// Host discovery, present only on [`ProcessKind::Host`] runtimes.
    pub fn discovery(&self) -> Option<&Arc<ExtensionDiscovery>> {
        self.discovery.as_ref()
    }

    /// Bus-fed discovery view, present only on [`ProcessKind::Ui`] runtimes.
    pub fn discovery_mirror(&self) -> Option<&Arc<DiscoveryMirror>> {
        self.discovery_mirror.as_ref()
    }

    /// Whether initial discovery completed, from whichever side this
    /// process holds.
    pub fn is_loaded(&self) -> bool {
        match (&self.discovery, &self.discovery_mirror) {
            (Some(discovery), _) => discovery.is_loaded(),
            (None, Some(mirror)) => mirror.is_loaded(),
            (None, None) => false,
        }
    }

    pub fn loader(&self) -> &Arc<ExtensionLoader> {
        &self.loader
    }

    pub fn router(&self) -> &Arc<ProtocolRouter> {
        &self.router
    }

    /// Bring the runtime up for its process role.
    ///
    /// On the host this runs initial discovery, starts the filesystem
    /// watcher and begins answering state requests; on a UI process it
    /// bootstraps from the host snapshot and mirrors routing attempts.
    pub async fn start(&self) -> Result<()> {
        match (&self.discovery, self.process) {
            (Some(discovery), ProcessKind::Host) => {
                discovery.load().await?;
                discovery.serve_state();
                self.loader.init_host(discovery).await?;
                discovery.watch_extensions();
            }
            _ => {
                if let Some(mirror) = &self.discovery_mirror {
                    mirror.start().await?;
                }
                self.loader.init_ui().await?;
                self.router.start_mirror();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::extensions::{FactoryModuleLoader, MemoryEnablementStore};
    use semver::Version;
    use tempfile::TempDir;

    fn temp_config(root: &TempDir) -> ExtensionsConfig {
        ExtensionsConfig::new(
            root.path().join("bundled"),
            root.path().join("user"),
            root.path().join("packages"),
            Version::new(6, 0, 0),
        )
    }

    #[tokio::test]
    async fn test_host_runtime_starts_with_empty_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("bundled")).unwrap();
        let runtime = ExtensionRuntime::new_host(
            temp_config(&root),
            LocalBus::shared(),
            Arc::new(MemoryEnablementStore::new()),
            Arc::new(FactoryModuleLoader::new()),
        );

        runtime.start().await.unwrap();

        assert!(runtime.discovery().unwrap().is_loaded());
        assert!(runtime.loader().instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_ui_runtime_bootstraps_from_host_snapshot() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("bundled")).unwrap();
        let bus = LocalBus::shared();
        let host = ExtensionRuntime::new_host(
            temp_config(&root),
            bus.clone(),
            Arc::new(MemoryEnablementStore::new()),
            Arc::new(FactoryModuleLoader::new()),
        );
        host.start().await.unwrap();

        let ui = ExtensionRuntime::new_ui(
            bus,
            Arc::new(MemoryEnablementStore::new()),
            Arc::new(FactoryModuleLoader::new()),
        );
        ui.start().await.unwrap();

        assert!(ui.discovery().is_none());
        assert!(ui.is_loaded());
        assert!(ui.loader().instances().await.is_empty());
    }
}
