//! Installed packages on the local filesystem.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::config::PathsConfig;
use crate::error::{BazaarError, Result};
use crate::package::{Package, PackageType};

/// A package found in an install directory.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    /// Directory name below the type directory.
    pub dir_name: String,
    pub path: PathBuf,
    pub package: Package,
}

/// Reads descriptors and install metadata below the configured directories.
#[derive(Debug, Clone)]
pub struct LocalPackageStore {
    paths: PathsConfig,
}

impl LocalPackageStore {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    pub fn install_dir(&self, package_type: PackageType, dir_name: &str) -> PathBuf {
        self.paths.install_dir(package_type, dir_name)
    }

    /// Descriptor of one installed package.
    pub async fn read_descriptor(
        &self,
        package_type: PackageType,
        dir_name: &str,
    ) -> Result<Package> {
        read_descriptor_at(&self.install_dir(package_type, dir_name), package_type).await
    }

    /// Every installed package of a type, in directory name order.
    ///
    /// Directories without a readable descriptor are skipped.
    pub async fn list_installed(
        &self,
        package_type: PackageType,
    ) -> Result<Vec<InstalledPackage>> {
        let type_dir = self.paths.type_dir(package_type);
        let mut entries = match tokio::fs::read_dir(&type_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut installed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            match read_descriptor_at(&path, package_type).await {
                Ok(package) => installed.push(InstalledPackage {
                    dir_name,
                    path,
                    package,
                }),
                Err(e) if e.is_not_found() => {
                    debug!("Skipping {:?}: no {}", path, package_type.descriptor_file());
                }
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }

        installed.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(installed)
    }
}

/// Read and parse the descriptor in an install directory.
///
/// The descriptor `url` is normalized without a trailing `/`.
pub async fn read_descriptor_at(dir: &Path, package_type: PackageType) -> Result<Package> {
    let path = dir.join(package_type.descriptor_file());
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BazaarError::NotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut package: Package = serde_json::from_slice(&data).map_err(|e| {
        warn!("Parse {:?} failed: {}", path, e);
        BazaarError::Parse {
            source_id: path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    package.url = package.url.trim_end_matches('/').to_string();
    Ok(package)
}

/// Total size of the regular files below `path`.
pub async fn dir_size(path: &Path) -> Result<u64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || dir_size_blocking(&path))
        .await
        .map_err(|e| BazaarError::IoError(std::io::Error::other(e)))?
}

fn dir_size_blocking(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size_blocking(&entry.path())?;
        } else if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Last modification date of an install directory, `YYYY-MM-DD`.
pub async fn install_date(path: &Path) -> Result<String> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Local>::from(modified).format("%Y-%m-%d").to_string())
}
