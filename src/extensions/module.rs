//! Extension instance contract and dynamic module loading.
//!
//! Extensions are third-party code; the runtime only knows them through the
//! `ExtensionModule` trait. Turning an entry-point path into a module is a
//! pluggable capability (`ModuleLoader`) so embedders can plug in whatever
//! evaluation mechanism their extensions use. `FactoryModuleLoader` covers
//! built-in extensions and tests with compile-time registered factories.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::manifest::InstalledExtension;
use crate::bus::MessageBus;
use crate::error::{LumenError, Result};

/// Context handed to a module on activation, for talking back to the host.
#[derive(Clone)]
pub struct ExtensionContext {
    /// The owning extension's manifest name.
    pub extension_name: String,
    bus: Arc<dyn MessageBus>,
}

impl ExtensionContext {
    pub fn new(extension_name: String, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            extension_name,
            bus,
        }
    }

    /// Broadcast a payload on behalf of the extension.
    pub fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload);
    }
}

/// The contract every loaded extension module satisfies.
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    /// Activation hook, run once when the instance is created. Activations
    /// of a load batch run concurrently.
    async fn activate(&self, ctx: ExtensionContext) -> std::result::Result<(), String>;

    /// Enable hook, run after every activation in the batch has settled.
    async fn on_enable(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Disable hook, run when the backing record is disabled or removed.
    async fn on_disable(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn ExtensionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExtensionModule")
    }
}

/// Capability turning an entry-point path into a live module.
pub trait ModuleLoader: Send + Sync {
    /// Load the module backing `record` from `entry_point`, or fail with a
    /// typed error.
    fn load(
        &self,
        record: &InstalledExtension,
        entry_point: &Path,
    ) -> Result<Box<dyn ExtensionModule>>;
}

/// Factory producing a fresh module instance.
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn ExtensionModule> + Send + Sync>;

/// Module loader backed by registered factories, keyed by extension name.
#[derive(Default)]
pub struct FactoryModuleLoader {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl FactoryModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for an extension name.
    pub fn register(&self, name: impl Into<String>, factory: ModuleFactory) {
        self.factories
            .write()
            .expect("factory lock poisoned")
            .insert(name.into(), factory);
    }
}

impl ModuleLoader for FactoryModuleLoader {
    fn load(
        &self,
        record: &InstalledExtension,
        entry_point: &Path,
    ) -> Result<Box<dyn ExtensionModule>> {
        let factories = self.factories.read().expect("factory lock poisoned");
        let factory = factories.get(record.name()).ok_or_else(|| {
            LumenError::entry_point(
                record.name(),
                format!("no module registered for {}", entry_point.display()),
            )
        })?;
        Ok(factory())
    }
}

/// Cleanup callback owned by an instance.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Runtime object backing one enabled, compatible extension.
///
/// Its existence implies the backing record is enabled and compatible.
pub struct ExtensionInstance {
    record: InstalledExtension,
    module: Box<dyn ExtensionModule>,
    disposers: Mutex<Vec<Disposer>>,
}

impl ExtensionInstance {
    pub fn new(record: InstalledExtension, module: Box<dyn ExtensionModule>) -> Self {
        Self {
            record,
            module,
            disposers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Manifest name, the addressing key for routing and cross-extension
    /// lookups. Unique among live instances.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn record(&self) -> &InstalledExtension {
        &self.record
    }

    /// Register cleanup to run when the instance is retired.
    pub fn add_disposer(&self, disposer: Disposer) {
        self.disposers
            .lock()
            .expect("disposer lock poisoned")
            .push(disposer);
    }

    /// Run and drop all registered disposers.
    pub fn dispose(&self) {
        let disposers = std::mem::take(
            &mut *self.disposers.lock().expect("disposer lock poisoned"),
        );
        for disposer in disposers {
            disposer();
        }
    }

    pub async fn activate(&self, ctx: ExtensionContext) -> std::result::Result<(), String> {
        self.module.activate(ctx).await
    }

    pub async fn enable(&self) {
        if let Err(e) = self.module.on_enable().await {
            warn!(extension = self.name(), "enable hook failed: {}", e);
        }
    }

    pub async fn disable(&self) {
        if let Err(e) = self.module.on_disable().await {
            warn!(extension = self.name(), "disable hook failed: {}", e);
        }
        self.dispose();
    }
}
