//! Extension subsystem: discovery, installation, enablement and loading.
//!
//! The host process owns the authoritative view (discovery watches the
//! filesystem, the installer drives the package manager); every process runs
//! its own [`loader::ExtensionLoader`] deriving live instances from a synced
//! copy of that view.

pub mod discovery;
pub mod installer;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod store;

pub use discovery::{DiscoveryEvent, DiscoveryMirror, ExtensionDiscovery};
pub use installer::PackageInstaller;
pub use loader::{ExtensionLoader, ExtensionState, LoaderEvent, Registrator};
pub use manifest::{ExtensionId, ExtensionManifest, ExtensionSnapshot, InstalledExtension};
pub use module::{
    ExtensionContext, ExtensionInstance, ExtensionModule, FactoryModuleLoader, ModuleLoader,
};
pub use store::{EnablementStore, JsonEnablementStore, MemoryEnablementStore};
