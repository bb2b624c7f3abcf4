//! Package downloads from the registry.
//!
//! Downloads of the same artifact are serialized through a per-artifact
//! lock; different artifacts download in parallel. Each caller still
//! performs its own fetch, the lock only orders them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::package::ArtifactId;
use crate::transport::RegistryTransport;

/// Timeout for the fire-and-forget download counter request.
const USAGE_TIMEOUT_SECS: u64 = 30;

/// Progress callback type for download progress reporting.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Lazily populated map from a key to an async mutual-exclusion handle.
///
/// Entries are never removed. The map itself is only locked for the
/// lookup; the returned handle is awaited outside of it.
pub struct LockRegistry {
    name: &'static str,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The handle for `key`, created on first use.
    pub fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let handle = self.handle(key);
        if handle.try_lock().is_err() {
            debug!("Waiting for {} lock on {}", self.name, key);
        }
        handle.lock_owned().await
    }

    /// Number of keys ever locked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches package archives and assets, deduplicating per artifact.
pub struct DownloadCoordinator {
    transport: Arc<dyn RegistryTransport>,
    registry: RegistryConfig,
    locks: LockRegistry,
}

impl DownloadCoordinator {
    pub fn new(transport: Arc<dyn RegistryTransport>, registry: RegistryConfig) -> Self {
        Self {
            transport,
            registry,
            locks: LockRegistry::new("download"),
        }
    }

    /// Download an artifact into memory.
    ///
    /// When `system_id` is given and the artifact is not a markdown asset,
    /// a successful download is reported to the usage endpoint in the
    /// background. That report never affects the result.
    pub async fn download(
        &self,
        artifact: &ArtifactId,
        progress: Option<ProgressCallback>,
        system_id: Option<&str>,
    ) -> Result<Bytes> {
        let _guard = self.locks.lock(&artifact.to_string()).await;

        let url = self.registry.package_url(&artifact.relative_path());
        info!("Downloading {}", url);

        let data = self
            .transport
            .get(&url, self.registry.download_timeout(), progress)
            .await
            .map_err(|e| {
                error!("Download of {} failed: {}", url, e);
                e
            })?;

        info!("Downloaded {} ({} bytes)", artifact, data.len());
        self.report_usage(artifact, system_id);
        Ok(data)
    }

    fn report_usage(&self, artifact: &ArtifactId, system_id: Option<&str>) {
        let Some(system_id) = system_id.filter(|s| !s.is_empty()) else {
            return;
        };
        if artifact.is_markdown() {
            return;
        }

        let transport = Arc::clone(&self.transport);
        let url = self.registry.download_count_url();
        let repo = artifact.repo_path().to_string();
        let body = serde_json::json!({
            "systemID": system_id,
            "repo": repo,
        });

        tokio::spawn(async move {
            let timeout = Duration::from_secs(USAGE_TIMEOUT_SECS);
            match transport.post_json(&url, &body, timeout).await {
                Ok(()) => debug!("Reported download of {}", repo),
                Err(e) => debug!("Reporting download of {} failed: {}", repo, e),
            }
        });
    }

    /// Number of distinct artifacts downloaded so far.
    pub fn tracked_artifacts(&self) -> usize {
        self.locks.len()
    }
}

/// Download progress information.
///
/// Provides information about the current state of a download,
/// including bytes downloaded and total size. `total` is zero when
/// the server did not announce a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Total bytes to download.
    pub total: u64,
}

impl DownloadProgress {
    /// Create a new progress instance.
    pub fn new(downloaded: u64, total: u64) -> Self {
        Self { downloaded, total }
    }

    /// Get download progress as a fraction (0.0 to 1.0).
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.downloaded as f32 / self.total as f32
        }
    }

    /// Get download progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.total as f64) * 100.0
        }
    }

    /// Check if the download is complete.
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.total && self.total > 0
    }

    /// Get remaining bytes to download.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.downloaded)
    }
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} bytes ({:.1}%)",
            self.downloaded,
            self.total,
            self.percentage()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BazaarError;
    use crate::testing::{MemoryTransport, REGISTRY};

    fn coordinator(transport: Arc<MemoryTransport>) -> DownloadCoordinator {
        let registry = RegistryConfig {
            base_url: REGISTRY.to_string(),
            cloud_base_url: "https://cloud.test".to_string(),
            download_count_path: "/apis/count".to_string(),
            ..RegistryConfig::default()
        };
        DownloadCoordinator::new(transport, registry)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_download_progress() {
        let progress = DownloadProgress::new(50, 100);
        assert_eq!(progress.percentage(), 50.0);
        assert_eq!(progress.fraction(), 0.5);
        assert!(!progress.is_complete());
        assert_eq!(progress.remaining(), 50);

        let complete = DownloadProgress::new(100, 100);
        assert!(complete.is_complete());
        assert_eq!(complete.remaining(), 0);
    }

    #[test]
    fn test_download_progress_unknown_total() {
        let progress = DownloadProgress::new(10, 0);
        assert_eq!(progress.percentage(), 0.0);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_download_progress_display() {
        let progress = DownloadProgress::new(25, 100);
        assert_eq!(format!("{}", progress), "25/100 bytes (25.0%)");
    }

    #[test]
    fn test_lock_registry_reuses_handles() {
        let registry = LockRegistry::new("test");
        let a = registry.handle("k");
        let b = registry.handle("k");
        assert!(Arc::ptr_eq(&a, &b));
        registry.handle("other");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_download_fetches_package_path() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(format!("{}/package/a/b@h1", REGISTRY), "zipdata");

        let coordinator = coordinator(transport.clone());
        let artifact = ArtifactId::new("https://github.com/a/b", "h1");
        let data = coordinator.download(&artifact, None, None).await.unwrap();
        assert_eq!(&data[..], b"zipdata");
    }

    #[tokio::test]
    async fn test_download_failure_is_reported() {
        let transport = Arc::new(MemoryTransport::new());
        let coordinator = coordinator(transport.clone());
        let artifact = ArtifactId::new("https://github.com/a/b", "missing");

        let err = coordinator
            .download(&artifact, None, Some("sys"))
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::HttpStatus { status: 404, .. }));
        settle().await;
        assert!(transport.posts().is_empty());
    }

    #[tokio::test]
    async fn test_same_artifact_downloads_never_overlap() {
        let transport = Arc::new(MemoryTransport::new());
        let url = format!("{}/package/a/b@h1", REGISTRY);
        transport.route(url.clone(), "zipdata");
        transport.set_delay(Duration::from_millis(20));

        let coordinator = Arc::new(coordinator(transport.clone()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                let artifact = ArtifactId::new("https://github.com/a/b", "h1");
                coordinator.download(&artifact, None, None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.get_count(&url), 4);
        assert_eq!(transport.max_same_url(), 1);
        assert_eq!(coordinator.tracked_artifacts(), 1);
    }

    #[tokio::test]
    async fn test_distinct_artifacts_download_in_parallel() {
        let transport = Arc::new(MemoryTransport::new());
        for i in 0..4 {
            transport.route(format!("{}/package/a/p{}@h", REGISTRY, i), "zipdata");
        }
        transport.set_delay(Duration::from_millis(50));

        let coordinator = Arc::new(coordinator(transport.clone()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                let artifact = ArtifactId::new(&format!("https://github.com/a/p{}", i), "h");
                coordinator.download(&artifact, None, None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(transport.max_total() >= 2);
    }

    #[tokio::test]
    async fn test_usage_reported_for_archives() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(format!("{}/package/a/b@h1", REGISTRY), "zipdata");
        let coordinator = coordinator(transport.clone());

        let artifact = ArtifactId::new("https://github.com/a/b", "h1");
        coordinator.download(&artifact, None, Some("sys-1")).await.unwrap();
        settle().await;

        let posts = transport.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "https://cloud.test/apis/count");
        assert_eq!(posts[0].1, serde_json::json!({"systemID": "sys-1", "repo": "a/b"}));
    }

    #[tokio::test]
    async fn test_usage_skipped_for_markdown_or_missing_id() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(format!("{}/package/a/b@h1/README.md", REGISTRY), "# hi");
        transport.route(format!("{}/package/a/b@h1", REGISTRY), "zipdata");
        let coordinator = coordinator(transport.clone());

        let readme = ArtifactId::new("https://github.com/a/b", "h1").with_asset("README.md");
        coordinator.download(&readme, None, Some("sys-1")).await.unwrap();
        let archive = ArtifactId::new("https://github.com/a/b", "h1");
        coordinator.download(&archive, None, None).await.unwrap();
        coordinator.download(&archive, None, Some("")).await.unwrap();
        settle().await;

        assert!(transport.posts().is_empty());
    }

    #[tokio::test]
    async fn test_progress_forwarded() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(format!("{}/package/a/b@h1", REGISTRY), "zipdata");
        let coordinator = coordinator(transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        let artifact = ArtifactId::new("https://github.com/a/b", "h1");
        coordinator
            .download(&artifact, Some(callback), None)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().last(), Some(&DownloadProgress::new(7, 7)));
    }
}
