//! Extension manifest parsing and installed-extension records.
//!
//! Each extension directory carries a `package.json` describing the
//! extension: name, version, the per-process entry points and the host
//! version range it supports.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::config::ExtensionsConfig;
use crate::error::{LumenError, Result};
use crate::ProcessKind;

/// Name of the manifest file inside every extension directory.
pub const MANIFEST_FILE: &str = "package.json";

/// Stable identity of an installed extension for the process session.
///
/// Derived from the installed manifest path under the shared install root
/// (`<packages-root>/node_modules/<name>/package.json`), which is unique
/// across the bundled and user sets.
pub type ExtensionId = String;

/// Engine requirements declared by an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engines {
    /// Semver requirement against the hosting app version. Absent means
    /// "any version".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,
}

/// An extension's self-description, read from its `package.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
    /// Host-process entry point, relative to the extension directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// UI-process entry point, relative to the extension directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(default)]
    pub engines: Engines,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExtensionManifest {
    /// Load and validate the manifest from an extension directory.
    pub fn load(extension_dir: &Path) -> Result<Self> {
        let manifest_path = extension_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| LumenError::manifest(&manifest_path, e.to_string()))?;
        let manifest: Self = serde_json::from_str(&content)
            .map_err(|e| LumenError::manifest(&manifest_path, e.to_string()))?;
        manifest.validate(&manifest_path)?;
        Ok(manifest)
    }

    fn validate(&self, manifest_path: &Path) -> Result<()> {
        if self.name.is_empty() {
            return Err(LumenError::manifest(manifest_path, "name is required"));
        }
        if self.version.is_empty() {
            return Err(LumenError::manifest(manifest_path, "version is required"));
        }
        Ok(())
    }

    /// Whether the declared `engines.hostVersion` accepts the given app
    /// version. An unparseable requirement counts as incompatible.
    pub fn is_compatible_with(&self, app_version: &Version) -> bool {
        match &self.engines.host_version {
            None => true,
            Some(req) => VersionReq::parse(req)
                .map(|req| req.matches(app_version))
                .unwrap_or(false),
        }
    }

    /// Entry point for the given process kind, if the extension ships one.
    pub fn entry_point(&self, process: ProcessKind) -> Option<&str> {
        match process {
            ProcessKind::Host => self.main.as_deref(),
            ProcessKind::Ui => self.renderer.as_deref(),
        }
    }
}

/// A discovered extension and everything the loader needs to know about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledExtension {
    pub id: ExtensionId,
    pub manifest: ExtensionManifest,
    /// Source directory of the extension.
    pub absolute_path: PathBuf,
    /// Manifest file inside the source directory.
    pub manifest_path: PathBuf,
    pub is_bundled: bool,
    pub is_compatible: bool,
    pub is_enabled: bool,
}

impl InstalledExtension {
    /// Build a record for a manifest found in `dir`.
    pub fn new(
        config: &ExtensionsConfig,
        dir: &Path,
        manifest: ExtensionManifest,
        is_bundled: bool,
        is_enabled: bool,
    ) -> Self {
        let is_compatible = manifest.is_compatible_with(&config.app_version);
        Self {
            id: derive_id(config, &manifest.name),
            absolute_path: dir.to_path_buf(),
            manifest_path: dir.join(MANIFEST_FILE),
            manifest,
            is_bundled,
            is_compatible,
            is_enabled,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// Derive the stable extension id from the installed manifest path.
pub fn derive_id(config: &ExtensionsConfig, name: &str) -> ExtensionId {
    config
        .installed_manifest_path(name)
        .to_string_lossy()
        .into_owned()
}

/// Snapshot type exchanged over the `extension-list` bus topics.
pub type ExtensionSnapshot = Vec<(ExtensionId, InstalledExtension)>;

/// Serialize a discovered-extension map into the wire snapshot.
pub fn to_snapshot(map: &HashMap<ExtensionId, InstalledExtension>) -> ExtensionSnapshot {
    let mut entries: ExtensionSnapshot =
        map.iter().map(|(id, ext)| (id.clone(), ext.clone())).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> ExtensionsConfig {
        ExtensionsConfig::new("/b", "/u", "/p", Version::new(6, 0, 0))
    }

    fn write_manifest(dir: &Path, json: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), json).unwrap();
    }

    #[test]
    fn test_load_parses_entry_points_and_engines() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{
                "name": "my-ext",
                "version": "1.2.3",
                "main": "dist/main.js",
                "renderer": "dist/renderer.js",
                "engines": { "hostVersion": "^6.0.0" }
            }"#,
        );

        let manifest = ExtensionManifest::load(tmp.path()).unwrap();
        assert_eq!(manifest.name, "my-ext");
        assert_eq!(manifest.entry_point(ProcessKind::Host), Some("dist/main.js"));
        assert_eq!(manifest.entry_point(ProcessKind::Ui), Some("dist/renderer.js"));
        assert!(manifest.is_compatible_with(&Version::new(6, 1, 0)));
        assert!(!manifest.is_compatible_with(&Version::new(7, 0, 0)));
    }

    #[test]
    fn test_load_rejects_missing_name() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), r#"{"name": "", "version": "1.0.0"}"#);
        assert!(ExtensionManifest::load(tmp.path()).is_err());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "not json at all");
        assert!(ExtensionManifest::load(tmp.path()).is_err());
    }

    #[test]
    fn test_missing_engines_is_always_compatible() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), r#"{"name": "x", "version": "1.0.0"}"#);
        let manifest = ExtensionManifest::load(tmp.path()).unwrap();
        assert!(manifest.is_compatible_with(&Version::new(0, 1, 0)));
    }

    #[test]
    fn test_id_is_the_installed_manifest_path() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), r#"{"name": "my-ext", "version": "1.0.0"}"#);
        let manifest = ExtensionManifest::load(tmp.path()).unwrap();
        let ext = InstalledExtension::new(&config(), tmp.path(), manifest, false, true);
        assert_eq!(ext.id, "/p/node_modules/my-ext/package.json");
        assert_eq!(ext.manifest_path, tmp.path().join(MANIFEST_FILE));
    }
}
