//! Dependency installation for extensions.
//!
//! All installs share one root (`packages_root`), so a single async mutex
//! totally orders them: concurrent watcher add-events never race on the
//! generated descriptor or the `node_modules` tree. The lock guard is held
//! for the whole descriptor-write + subprocess span and released on scope
//! exit, so a failed subprocess cannot deadlock later installs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExtensionsConfig;
use crate::error::{LumenError, Result};

/// Generated dependency descriptor consumed by the external package manager.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PackageDescriptor {
    private: bool,
    /// `{name: absolutePath}` of every extension to materialize.
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// Serializes dependency installation against the shared install root.
pub struct PackageInstaller {
    config: Arc<ExtensionsConfig>,
    install_lock: Mutex<()>,
}

impl PackageInstaller {
    pub fn new(config: Arc<ExtensionsConfig>) -> Self {
        Self {
            config,
            install_lock: Mutex::new(()),
        }
    }

    /// Install the full bundled set: replaces the descriptor's dependencies
    /// and runs the package manager once. Failure here is fatal to startup.
    pub async fn install_bundled(&self, deps: &BTreeMap<String, PathBuf>) -> Result<()> {
        let _guard = self.install_lock.lock().await;
        info!(count = deps.len(), "installing bundled extension dependencies");
        let mut descriptor = PackageDescriptor {
            private: true,
            ..Default::default()
        };
        for (name, path) in deps {
            descriptor
                .dependencies
                .insert(name.clone(), path.to_string_lossy().into_owned());
        }
        self.write_descriptor(&descriptor).await?;
        self.run_package_manager().await
    }

    /// Install one extension's dependencies, merging it into the existing
    /// descriptor. Callers decide severity on failure.
    pub async fn install(&self, name: &str, source_dir: &Path) -> Result<()> {
        let _guard = self.install_lock.lock().await;
        debug!(name, "installing extension dependencies");
        let mut descriptor = self.read_descriptor().await;
        descriptor.private = true;
        descriptor
            .dependencies
            .insert(name.to_string(), source_dir.to_string_lossy().into_owned());
        self.write_descriptor(&descriptor).await?;
        self.run_package_manager().await
    }

    /// Remove the `node_modules/<name>` symlink, if present. Idempotent.
    pub async fn remove_symlink(&self, name: &str) -> Result<()> {
        let link = self.config.symlink_path(name);
        match tokio::fs::symlink_metadata(&link).await {
            Ok(meta) => {
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(&link).await?;
                } else {
                    tokio::fs::remove_file(&link).await?;
                }
                debug!(name, "removed extension symlink");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_descriptor(&self) -> PackageDescriptor {
        match tokio::fs::read_to_string(self.config.descriptor_path()).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("discarding unreadable package descriptor: {}", e);
                PackageDescriptor::default()
            }),
            Err(_) => PackageDescriptor::default(),
        }
    }

    async fn write_descriptor(&self, descriptor: &PackageDescriptor) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.packages_root).await?;
        let content = serde_json::to_string_pretty(descriptor)?;
        tokio::fs::write(self.config.descriptor_path(), content).await?;
        Ok(())
    }

    async fn run_package_manager(&self) -> Result<()> {
        let program = &self.config.package_manager;
        let status = Command::new(program)
            .args(["install", "--no-audit", "--silent"])
            .current_dir(&self.config.packages_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| LumenError::install(program.clone(), e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(LumenError::install(
                program.clone(),
                format!("package manager exited with {}", status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Arc<ExtensionsConfig> {
        let mut config = ExtensionsConfig::new(
            tmp.path().join("bundled"),
            tmp.path().join("user"),
            tmp.path().join("packages"),
            Version::new(6, 0, 0),
        );
        // `true` accepts any arguments and always succeeds.
        config.package_manager = "true".to_string();
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_install_merges_into_descriptor() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let installer = PackageInstaller::new(config.clone());

        installer.install("first", Path::new("/src/first")).await.unwrap();
        installer.install("second", Path::new("/src/second")).await.unwrap();

        let content = std::fs::read_to_string(config.descriptor_path()).unwrap();
        let descriptor: PackageDescriptor = serde_json::from_str(&content).unwrap();
        assert_eq!(descriptor.dependencies.len(), 2);
        assert_eq!(descriptor.dependencies["first"], "/src/first");
        assert_eq!(descriptor.dependencies["second"], "/src/second");
    }

    #[tokio::test]
    async fn test_install_bundled_replaces_dependencies() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let installer = PackageInstaller::new(config.clone());

        installer.install("stale", Path::new("/src/stale")).await.unwrap();

        let mut deps = BTreeMap::new();
        deps.insert("fresh".to_string(), PathBuf::from("/src/fresh"));
        installer.install_bundled(&deps).await.unwrap();

        let content = std::fs::read_to_string(config.descriptor_path()).unwrap();
        let descriptor: PackageDescriptor = serde_json::from_str(&content).unwrap();
        assert_eq!(descriptor.dependencies.len(), 1);
        assert!(descriptor.dependencies.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_failed_subprocess_does_not_deadlock_later_installs() {
        let tmp = TempDir::new().unwrap();
        let mut raw = ExtensionsConfig::new(
            tmp.path().join("bundled"),
            tmp.path().join("user"),
            tmp.path().join("packages"),
            Version::new(6, 0, 0),
        );
        raw.package_manager = "false".to_string();
        let failing = PackageInstaller::new(Arc::new(raw));

        assert!(failing.install("broken", Path::new("/src/broken")).await.is_err());
        // A second install must still acquire the lock and run.
        assert!(failing.install("broken", Path::new("/src/broken")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_symlink_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let installer = PackageInstaller::new(config.clone());

        installer.remove_symlink("never-installed").await.unwrap();

        #[cfg(unix)]
        {
            let target = tmp.path().join("target-ext");
            std::fs::create_dir_all(&target).unwrap();
            std::fs::create_dir_all(config.node_modules_dir()).unwrap();
            std::os::unix::fs::symlink(&target, config.symlink_path("linked")).unwrap();

            installer.remove_symlink("linked").await.unwrap();
            assert!(!config.symlink_path("linked").exists());
            installer.remove_symlink("linked").await.unwrap();
        }
    }
}
