//! Runtime configuration for the extension subsystem
//!
//! All filesystem locations and the external package manager are injected
//! through `ExtensionsConfig` so tests and embedders can point the runtime
//! at arbitrary directories.

use std::path::{Path, PathBuf};

use semver::Version;

use crate::error::{LumenError, Result};

/// Configuration for extension discovery, installation and loading.
#[derive(Debug, Clone)]
pub struct ExtensionsConfig {
    /// Read-only directory shipping with the app, holding bundled extensions.
    pub bundled_dir: PathBuf,
    /// Writable directory where users drop their own extensions.
    pub user_dir: PathBuf,
    /// Shared install root the package manager operates on. The
    /// `node_modules/<name>` symlink tree lives underneath it.
    pub packages_root: PathBuf,
    /// Version of the hosting application, checked against each manifest's
    /// `engines.hostVersion` requirement.
    pub app_version: Version,
    /// External package manager program invoked for dependency installs.
    pub package_manager: String,
}

impl ExtensionsConfig {
    /// Create a configuration with explicit paths.
    pub fn new(
        bundled_dir: impl Into<PathBuf>,
        user_dir: impl Into<PathBuf>,
        packages_root: impl Into<PathBuf>,
        app_version: Version,
    ) -> Self {
        Self {
            bundled_dir: bundled_dir.into(),
            user_dir: user_dir.into(),
            packages_root: packages_root.into(),
            app_version,
            package_manager: "npm".to_string(),
        }
    }

    /// Default configuration rooted in the platform data directory.
    pub fn default_for_app(bundled_dir: impl Into<PathBuf>, app_version: Version) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("app", "Lumen", "Lumen")
            .ok_or_else(|| LumenError::General("cannot determine platform data dir".into()))?;
        let data = dirs.data_dir();
        Ok(Self::new(
            bundled_dir,
            data.join("extensions"),
            data.join("extension-packages"),
            app_version,
        ))
    }

    /// Directory the package manager materializes symlinks into.
    pub fn node_modules_dir(&self) -> PathBuf {
        self.packages_root.join("node_modules")
    }

    /// Path of the generated dependency descriptor consumed by the package
    /// manager.
    pub fn descriptor_path(&self) -> PathBuf {
        self.packages_root.join("package.json")
    }

    /// Canonical installed-manifest path for an extension name. This is the
    /// stable id used throughout the runtime.
    pub fn installed_manifest_path(&self, name: &str) -> PathBuf {
        self.node_modules_dir().join(name).join("package.json")
    }

    /// Symlink location for an extension name under the install root.
    pub fn symlink_path(&self, name: &str) -> PathBuf {
        self.node_modules_dir().join(name)
    }

    /// Writable mirror location used when the bundled directory itself is
    /// not writable (the installer needs to symlink into its entries).
    pub fn bundled_mirror_dir(&self) -> PathBuf {
        self.packages_root.join("bundled")
    }

    /// Whether `path` sits directly inside the watched user directory.
    pub fn is_at_user_root(&self, path: &Path) -> bool {
        path.parent() == Some(self.user_dir.as_path())
    }
}
