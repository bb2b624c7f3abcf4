//! Package installation and removal.
//!
//! An install moves through `Idle -> Downloaded -> Extracted -> Placed`;
//! an uninstall goes straight from `Idle` to `Removed`. Any failure ends
//! in `Failed` and stops the pipeline. Work for one install path is
//! serialized, so an install and an uninstall of the same package never
//! interleave.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info};

use crate::cache::PackageMetadataCache;
use crate::config::PathsConfig;
use crate::download::{DownloadCoordinator, LockRegistry, ProgressCallback};
use crate::error::{BazaarError, Result};
use crate::extract::ArchiveExtractor;
use crate::package::ArtifactId;

const ARCHIVE_NAME: &str = "package.zip";
const UNPACKED_DIR: &str = "unpacked";

/// Progress of one install or uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstallStage {
    /// Nothing done yet
    #[default]
    Idle,
    /// Archive bytes are in memory
    Downloaded,
    /// Archive unpacked into scratch space
    Extracted,
    /// Files copied over the install path
    Placed,
    /// Install path removed
    Removed,
    /// Error occurred
    Failed(String),
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Downloaded => f.write_str("downloaded"),
            Self::Extracted => f.write_str("extracted"),
            Self::Placed => f.write_str("placed"),
            Self::Removed => f.write_str("removed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Receives every stage transition together with the install path.
pub type StageCallback = Arc<dyn Fn(&Path, &InstallStage) + Send + Sync>;

/// Installs archive packages into their install directories.
pub struct PackageInstaller {
    downloads: Arc<DownloadCoordinator>,
    metadata: Arc<PackageMetadataCache>,
    extractor: Arc<dyn ArchiveExtractor>,
    scratch_root: PathBuf,
    keep_scratch: bool,
    locks: LockRegistry,
    stage_callback: Option<StageCallback>,
}

impl PackageInstaller {
    pub fn new(
        downloads: Arc<DownloadCoordinator>,
        metadata: Arc<PackageMetadataCache>,
        extractor: Arc<dyn ArchiveExtractor>,
        paths: &PathsConfig,
        keep_scratch: bool,
    ) -> Self {
        Self {
            downloads,
            metadata,
            extractor,
            scratch_root: paths.scratch_dir(),
            keep_scratch,
            locks: LockRegistry::new("install path"),
            stage_callback: None,
        }
    }

    /// Report stage transitions to `callback`.
    pub fn with_stage_callback(mut self, callback: StageCallback) -> Self {
        self.stage_callback = Some(callback);
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Download `artifact` and install it over `install_path`.
    ///
    /// Filesystem errors name the package by `display_name`.
    pub async fn install(
        &self,
        artifact: &ArtifactId,
        install_path: &Path,
        display_name: &str,
        progress: Option<ProgressCallback>,
        system_id: Option<&str>,
    ) -> Result<()> {
        let _guard = self.locks.lock(&path_key(install_path)).await;
        info!("Installing {} into {:?}", artifact, install_path);

        let data = match self.downloads.download(artifact, progress, system_id).await {
            Ok(data) => data,
            Err(e) => {
                self.report(install_path, InstallStage::Failed(e.to_string()));
                return Err(e);
            }
        };
        self.place(data, artifact, install_path, display_name).await
    }

    /// Install archive bytes that were obtained elsewhere.
    pub async fn install_bytes(
        &self,
        data: Bytes,
        artifact: &ArtifactId,
        install_path: &Path,
        display_name: &str,
    ) -> Result<()> {
        let _guard = self.locks.lock(&path_key(install_path)).await;
        info!("Installing {} from memory into {:?}", artifact, install_path);
        self.place(data, artifact, install_path, display_name).await
    }

    /// Remove an installed package.
    ///
    /// A missing install path counts as already removed. Errors name the
    /// package rather than the path.
    pub async fn uninstall(&self, install_path: &Path, display_name: &str) -> Result<()> {
        let _guard = self.locks.lock(&path_key(install_path)).await;

        match tokio::fs::remove_dir_all(install_path).await {
            Ok(()) => info!("Removed {:?}", install_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{:?} already removed", install_path);
            }
            Err(e) => {
                error!("Remove {:?} failed: {}", install_path, e);
                self.report(install_path, InstallStage::Failed(e.to_string()));
                return Err(BazaarError::filesystem(display_name, e));
            }
        }

        self.metadata.clear_descriptors().await;
        self.report(install_path, InstallStage::Removed);
        Ok(())
    }

    async fn place(
        &self,
        data: Bytes,
        artifact: &ArtifactId,
        install_path: &Path,
        display_name: &str,
    ) -> Result<()> {
        self.report(install_path, InstallStage::Downloaded);

        let placed = self
            .unpack_and_copy(data, install_path)
            .await
            .map_err(|e| match e {
                BazaarError::IoError(io) => BazaarError::filesystem(display_name, io),
                other => other,
            });
        match placed {
            Ok(()) => {
                self.metadata.invalidate_descriptor(artifact).await;
                self.metadata.clear_sizes().await;
                self.report(install_path, InstallStage::Placed);
                info!("Installed {} into {:?}", artifact, install_path);
                Ok(())
            }
            Err(e) => {
                error!("Install of {} failed: {}", artifact, e);
                self.report(install_path, InstallStage::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn unpack_and_copy(&self, data: Bytes, install_path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("pkg-")
            .tempdir_in(&self.scratch_root)?;
        let archive = scratch.path().join(ARCHIVE_NAME);
        let unpacked = scratch.path().join(UNPACKED_DIR);

        let result = async {
            let extractor = Arc::clone(&self.extractor);
            let dest = unpacked.clone();
            blocking(move || {
                fs::write(&archive, &data)?;
                extractor.extract(&archive, &dest)
            })
            .await?;
            self.report(install_path, InstallStage::Extracted);

            let target = install_path.to_path_buf();
            blocking(move || {
                let root = package_root(&unpacked)?;
                copy_dir_all(&root, &target)
            })
            .await
        }
        .await;

        if self.keep_scratch {
            let kept = scratch.keep();
            debug!("Keeping scratch directory {:?}", kept);
        }
        result
    }

    fn report(&self, install_path: &Path, stage: InstallStage) {
        debug!("{:?}: {}", install_path, stage);
        if let Some(callback) = &self.stage_callback {
            callback(install_path, &stage);
        }
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BazaarError::IoError(std::io::Error::other(e)))?
}

/// Directory whose contents form the package.
///
/// Archives that wrap everything in one top-level directory are unwrapped.
fn package_root(unpacked: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(unpacked)?.collect::<std::io::Result<Vec<_>>>()?;
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(unpacked.to_path_buf())
}

/// Recursively copy `src` over `dst`, overwriting files that exist.
fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
