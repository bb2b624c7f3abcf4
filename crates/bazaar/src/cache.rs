//! TTL caches for registry indexes and package metadata.
//!
//! [`TtlCache`] is the shared building block: a keyed map guarded by one
//! async mutex that is held across a refresh, so concurrent misses on the
//! same cache instance are serialized and only one fetch runs at a time.
//! A failed refresh falls back to the previous value when there is one.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CacheConfig, RegistryConfig};
use crate::error::{BazaarError, Result};
use crate::package::{ArtifactId, DownloadStats, Package, PackageType, StageIndex};
use crate::transport::RegistryTransport;

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup<V> {
    /// Served from a live entry or freshly fetched.
    Fresh(V),
    /// Refresh failed; the previous value is returned alongside the error.
    Stale(V, BazaarError),
    /// Refresh failed and nothing was cached.
    Failed(BazaarError),
}

impl<V> Lookup<V> {
    /// The value, stale or not, or the refresh error when there is none.
    pub fn into_result(self) -> Result<V> {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v, _) => Ok(v),
            Lookup::Failed(e) => Err(e),
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v, _) => Some(v),
            Lookup::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&BazaarError> {
        match self {
            Lookup::Fresh(_) => None,
            Lookup::Stale(_, e) | Lookup::Failed(e) => Some(e),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }
}

/// Counters for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub refreshes: u64,
    pub failures: u64,
}

struct Entry<V> {
    value: V,
    refreshed: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    last_sweep: Instant,
    stats: CacheStats,
}

/// Keyed cache whose entries expire `ttl` after their last refresh.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    /// `None` means expired entries are only replaced on access.
    sweep_interval: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration, sweep_interval: Option<Duration>) -> Self {
        Self {
            name,
            ttl,
            sweep_interval,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Return the live entry for `key`, or run `fetch` and store its result.
    ///
    /// The cache lock is held while `fetch` runs.
    pub async fn get_or_refresh<F, Fut>(&self, key: K, fetch: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        self.sweep(&mut inner, now);

        if let Some(entry) = inner.entries.get(&key) {
            if now.duration_since(entry.refreshed) <= self.ttl {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Lookup::Fresh(value);
            }
        }

        debug!("{} cache miss for {:?}", self.name, key);
        match fetch().await {
            Ok(value) => {
                inner.stats.refreshes += 1;
                inner.entries.insert(
                    key,
                    Entry {
                        value: value.clone(),
                        refreshed: Instant::now(),
                    },
                );
                Lookup::Fresh(value)
            }
            Err(e) => {
                inner.stats.failures += 1;
                match inner.entries.get(&key) {
                    Some(entry) => {
                        warn!("{} refresh for {:?} failed, serving stale: {}", self.name, key, e);
                        Lookup::Stale(entry.value.clone(), e)
                    }
                    None => {
                        warn!("{} refresh for {:?} failed: {}", self.name, key, e);
                        Lookup::Failed(e)
                    }
                }
            }
        }
    }

    /// Live value for `key` without refreshing.
    pub async fn peek(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .filter(|e| e.refreshed.elapsed() <= self.ttl)
            .map(|e| e.value.clone())
    }

    pub async fn invalidate(&self, key: &K) {
        if self.inner.lock().await.entries.remove(key).is_some() {
            debug!("{} cache invalidated {:?}", self.name, key);
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        debug!("{} cache cleared ({} entries)", self.name, inner.entries.len());
        inner.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    fn sweep(&self, inner: &mut Inner<K, V>, now: Instant) {
        let Some(interval) = self.sweep_interval else {
            return;
        };
        if now.duration_since(inner.last_sweep) < interval {
            return;
        }

        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.duration_since(e.refreshed) <= ttl);
        inner.last_sweep = now;

        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!("{} cache swept {} expired entries", self.name, removed);
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| BazaarError::Parse {
        source_id: url.to_string(),
        reason: e.to_string(),
    })
}

/// Registry-wide listings: per-type stage indexes and download statistics.
pub struct RemoteIndexCache {
    transport: Arc<dyn RegistryTransport>,
    registry: RegistryConfig,
    indexes: TtlCache<PackageType, Arc<StageIndex>>,
    stats: TtlCache<(), Arc<DownloadStats>>,
}

impl RemoteIndexCache {
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        registry: RegistryConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            indexes: TtlCache::new("stage index", cache.index_ttl(), None),
            stats: TtlCache::new("download stats", cache.index_ttl(), None),
        }
    }

    /// Stage index for one package type.
    pub async fn stage_index(&self, package_type: PackageType) -> Lookup<Arc<StageIndex>> {
        let url = self.registry.stage_index_url(package_type);
        let timeout = self.registry.request_timeout();
        self.indexes
            .get_or_refresh(package_type, || async move {
                let bytes = self.transport.get(&url, timeout, None).await?;
                let index: StageIndex = parse_json(&url, &bytes)?;
                debug!("Loaded {} {} from {}", index.repos.len(), package_type, url);
                Ok(Arc::new(index))
            })
            .await
    }

    /// Stage index only if one is already cached and live.
    pub async fn cached_stage_index(&self, package_type: PackageType) -> Option<Arc<StageIndex>> {
        self.indexes.peek(&package_type).await
    }

    /// Download counters keyed by `owner/repo`.
    pub async fn download_stats(&self) -> Lookup<Arc<DownloadStats>> {
        let url = self.registry.stats_url();
        let timeout = self.registry.request_timeout();
        self.stats
            .get_or_refresh((), || async move {
                let bytes = self.transport.get(&url, timeout, None).await?;
                let stats: DownloadStats = parse_json(&url, &bytes)?;
                Ok(Arc::new(stats))
            })
            .await
    }

    pub async fn clear(&self) {
        self.indexes.clear().await;
        self.stats.clear().await;
    }

    pub async fn index_stats(&self) -> CacheStats {
        self.indexes.stats().await
    }
}

/// Per-package metadata: remote descriptors and computed install sizes,
/// both keyed by `owner/repo@hash`.
pub struct PackageMetadataCache {
    transport: Arc<dyn RegistryTransport>,
    registry: RegistryConfig,
    descriptors: TtlCache<String, Package>,
    sizes: TtlCache<String, u64>,
}

impl PackageMetadataCache {
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        registry: RegistryConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            descriptors: TtlCache::new(
                "descriptor",
                cache.descriptor_ttl(),
                Some(cache.descriptor_sweep()),
            ),
            sizes: TtlCache::new("install size", cache.size_ttl(), Some(cache.size_sweep())),
        }
    }

    /// Descriptor published with a package version.
    pub async fn descriptor(
        &self,
        artifact: &ArtifactId,
        package_type: PackageType,
    ) -> Lookup<Package> {
        let file = artifact.clone().with_asset(package_type.descriptor_file());
        let url = self.registry.package_url(&file.relative_path());
        let timeout = self.registry.request_timeout();
        self.descriptors
            .get_or_refresh(artifact.cache_key(), || async move {
                let bytes = self.transport.get(&url, timeout, None).await?;
                let mut pkg: Package = parse_json(&url, &bytes)?;
                pkg.url = pkg.url.trim_end_matches('/').to_string();
                Ok(pkg)
            })
            .await
    }

    /// Install size of a package version, computed by `compute` on a miss.
    pub async fn install_size<F, Fut>(&self, key: &str, compute: F) -> Lookup<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        self.sizes.get_or_refresh(key.to_string(), compute).await
    }

    pub async fn invalidate_descriptor(&self, artifact: &ArtifactId) {
        self.descriptors.invalidate(&artifact.cache_key()).await;
    }

    pub async fn clear_descriptors(&self) {
        self.descriptors.clear().await;
    }

    pub async fn clear_sizes(&self) {
        self.sizes.clear().await;
    }

    pub async fn descriptor_stats(&self) -> CacheStats {
        self.descriptors.stats().await
    }

    pub async fn size_stats(&self) -> CacheStats {
        self.sizes.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryTransport, REGISTRY};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> RegistryConfig {
        RegistryConfig {
            base_url: REGISTRY.to_string(),
            registry_hash: "r1".to_string(),
            stat_base_url: REGISTRY.to_string(),
            ..RegistryConfig::default()
        }
    }

    fn index_json(count: usize) -> String {
        let repos: Vec<_> = (0..count)
            .map(|i| serde_json::json!({"url": format!("o/p{}@h{}", i, i)}))
            .collect();
        serde_json::json!({ "repos": repos }).to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_served_within_ttl() {
        let transport = Arc::new(MemoryTransport::new());
        let url = registry().stage_index_url(PackageType::Theme);
        transport.route(url.clone(), index_json(2));

        let cache = RemoteIndexCache::new(transport.clone(), registry(), &CacheConfig::default());
        let first = cache.stage_index(PackageType::Theme).await.into_result().unwrap();
        assert_eq!(first.repos.len(), 2);
        assert_eq!(transport.get_count(&url), 1);

        tokio::time::advance(Duration::from_secs(3599)).await;
        cache.stage_index(PackageType::Theme).await.into_result().unwrap();
        assert_eq!(transport.get_count(&url), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.stage_index(PackageType::Theme).await.into_result().unwrap();
        assert_eq!(transport.get_count(&url), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale() {
        let transport = Arc::new(MemoryTransport::new());
        let url = registry().stage_index_url(PackageType::Plugin);
        transport.route(url.clone(), index_json(1));

        let cache = RemoteIndexCache::new(transport.clone(), registry(), &CacheConfig::default());
        assert!(cache.stage_index(PackageType::Plugin).await.is_fresh());

        transport.unroute(&url);
        tokio::time::advance(Duration::from_secs(3601)).await;
        let lookup = cache.stage_index(PackageType::Plugin).await;
        assert!(matches!(lookup, Lookup::Stale(_, _)));
        assert_eq!(lookup.value().unwrap().repos.len(), 1);
        assert_eq!(cache.index_stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_value() {
        let transport = Arc::new(MemoryTransport::new());
        let cache = RemoteIndexCache::new(transport, registry(), &CacheConfig::default());
        let lookup = cache.stage_index(PackageType::Widget).await;
        assert!(lookup.value().is_none());
        assert!(lookup.into_result().is_err());
    }

    #[tokio::test]
    async fn test_index_types_are_independent() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(registry().stage_index_url(PackageType::Theme), index_json(1));
        transport.route(registry().stage_index_url(PackageType::Icon), index_json(3));

        let cache = RemoteIndexCache::new(transport, registry(), &CacheConfig::default());
        let themes = cache.stage_index(PackageType::Theme).await.into_result().unwrap();
        let icons = cache.stage_index(PackageType::Icon).await.into_result().unwrap();
        assert_eq!(themes.repos.len(), 1);
        assert_eq!(icons.repos.len(), 3);
        assert!(cache.cached_stage_index(PackageType::Template).await.is_none());
    }

    #[tokio::test]
    async fn test_download_stats() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(
            registry().stats_url(),
            r#"{"a/b":{"name":"a/b","downloads":42}}"#,
        );
        let cache = RemoteIndexCache::new(transport, registry(), &CacheConfig::default());
        let stats = cache.download_stats().await.into_result().unwrap();
        assert_eq!(stats["a/b"].downloads, 42);
    }

    #[tokio::test]
    async fn test_unparseable_index() {
        let transport = Arc::new(MemoryTransport::new());
        transport.route(registry().stage_index_url(PackageType::Theme), "<html>");
        let cache = RemoteIndexCache::new(transport, registry(), &CacheConfig::default());
        let err = cache
            .stage_index(PackageType::Theme)
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(err, BazaarError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_descriptor_trims_url_and_invalidates() {
        let transport = Arc::new(MemoryTransport::new());
        let artifact = ArtifactId::new("https://github.com/a/b", "h1");
        let url = format!("{}/package/a/b@h1/theme.json", REGISTRY);
        transport.route(
            url.clone(),
            r#"{"name":"b","version":"1.0.0","url":"https://github.com/a/b/"}"#,
        );

        let cache =
            PackageMetadataCache::new(transport.clone(), registry(), &CacheConfig::default());
        let pkg = cache
            .descriptor(&artifact, PackageType::Theme)
            .await
            .into_result()
            .unwrap();
        assert_eq!(pkg.url, "https://github.com/a/b");

        cache.descriptor(&artifact, PackageType::Theme).await;
        assert_eq!(transport.get_count(&url), 1);

        cache.invalidate_descriptor(&artifact).await;
        cache.descriptor(&artifact, PackageType::Theme).await;
        assert_eq!(transport.get_count(&url), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_expired_entries() {
        let cache: TtlCache<String, u64> = TtlCache::new(
            "test",
            Duration::from_secs(10),
            Some(Duration::from_secs(5)),
        );
        cache.get_or_refresh("a".to_string(), || async { Ok(1) }).await;
        cache.get_or_refresh("b".to_string(), || async { Ok(2) }).await;
        assert_eq!(cache.stats().await.entries, 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.get_or_refresh("c".to_string(), || async { Ok(3) }).await;
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_install_size_computed_once() {
        let transport = Arc::new(MemoryTransport::new());
        let cache = PackageMetadataCache::new(transport, registry(), &CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        for _ in 0..3 {
            let size = cache
                .install_size("a/b@h", || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1024)
                })
                .await
                .into_result()
                .unwrap();
            assert_eq!(size, 1024);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.clear_sizes().await;
        cache
            .install_size("a/b@h", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(2048)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Arc::new(TtlCache::<u8, u8>::new("test", Duration::from_secs(60), None));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(1, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(9)
                    })
                    .await
                    .into_result()
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
