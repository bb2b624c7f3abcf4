//! Marketplace facade - wires the pipeline together.
//!
//! [`Bazaar`] owns every long-lived piece of state (caches, lock
//! registries) and exposes the operations a host application calls:
//! listing registry and installed packages, installing, uninstalling,
//! and rendering readmes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{PackageMetadataCache, RemoteIndexCache};
use crate::config::BazaarConfig;
use crate::connectivity::{ConnectivityGate, LogNotifier, Notifier};
use crate::download::{DownloadCoordinator, ProgressCallback};
use crate::error::{BazaarError, Result};
use crate::extract::{ArchiveExtractor, ZipExtractor};
use crate::install::{PackageInstaller, StageCallback};
use crate::local::{self, InstalledPackage, LocalPackageStore};
use crate::locale::Locale;
use crate::package::{human_size, ArtifactId, DownloadStats, Package, PackageType};
use crate::readme::{MarkdownRenderer, ReadmeService};
use crate::transport::{HttpTransport, RegistryTransport};
use crate::version::{disallow_display, is_outdated};

/// Main marketplace entry point.
///
/// # Example
///
/// ```ignore
/// use bazaar::{Bazaar, BazaarConfig, PackageType};
///
/// let bazaar = Bazaar::new(BazaarConfig::default(), renderer)?;
/// for pkg in bazaar.stage_packages(PackageType::Theme).await? {
///     println!("{} {}", pkg.preferred_name, pkg.version);
/// }
/// ```
pub struct Bazaar {
    config: BazaarConfig,
    locale: Option<Locale>,
    gate: ConnectivityGate,
    indexes: Arc<RemoteIndexCache>,
    metadata: Arc<PackageMetadataCache>,
    installer: PackageInstaller,
    local: LocalPackageStore,
    readme: ReadmeService,
}

impl Bazaar {
    /// Create a marketplace talking HTTP to the configured registry.
    pub fn new(config: BazaarConfig, renderer: Arc<dyn MarkdownRenderer>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config.registry)?);
        Ok(Self::with_parts(
            config,
            transport,
            Arc::new(ZipExtractor::new()),
            Arc::new(LogNotifier),
            renderer,
        ))
    }

    /// Create a marketplace from explicit collaborators.
    pub fn with_parts(
        config: BazaarConfig,
        transport: Arc<dyn RegistryTransport>,
        extractor: Arc<dyn ArchiveExtractor>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Self {
        let registry = config.registry.clone();
        let locale = config.active_locale();
        if locale.is_none() {
            debug!("Locale {} not recognized, preferring en_US", config.locale);
        }

        let gate = ConnectivityGate::new(
            Arc::clone(&transport),
            notifier,
            registry.base_url.clone(),
            registry.probe_timeout(),
            config.offline_notice(),
        );
        let indexes = Arc::new(RemoteIndexCache::new(
            Arc::clone(&transport),
            registry.clone(),
            &config.cache,
        ));
        let metadata = Arc::new(PackageMetadataCache::new(
            Arc::clone(&transport),
            registry.clone(),
            &config.cache,
        ));
        let downloads = Arc::new(DownloadCoordinator::new(transport, registry));
        let installer = PackageInstaller::new(
            Arc::clone(&downloads),
            Arc::clone(&metadata),
            extractor,
            &config.paths,
            config.keep_scratch,
        );

        Self {
            locale,
            gate,
            indexes,
            metadata,
            installer,
            local: LocalPackageStore::new(config.paths.clone()),
            readme: ReadmeService::new(downloads, renderer),
            config,
        }
    }

    /// Report install stages to `callback`.
    pub fn with_stage_callback(mut self, callback: StageCallback) -> Self {
        self.installer = self.installer.with_stage_callback(callback);
        self
    }

    pub fn config(&self) -> &BazaarConfig {
        &self.config
    }

    pub fn local_store(&self) -> &LocalPackageStore {
        &self.local
    }

    fn system_id(&self) -> Option<&str> {
        Some(self.config.registry.system_id.as_str()).filter(|s| !s.is_empty())
    }

    /// Packages of one type published in the registry.
    ///
    /// Returns an empty list when the registry is unreachable. Packages
    /// requiring a newer application are left out; the rest are marked
    /// installed and outdated against the local installs.
    pub async fn stage_packages(&self, package_type: PackageType) -> Result<Vec<Package>> {
        match self.gate.ensure_online().await {
            Ok(()) => {}
            Err(BazaarError::Offline) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut packages = self.registry_packages(package_type).await?;
        let installed = self.local.list_installed(package_type).await?;
        for pkg in &mut packages {
            if let Some(local) = find_installed(&installed, pkg) {
                pkg.installed = true;
                // Same detector as the installed listing, so both agree.
                let mut local_pkg = local.package.clone();
                if local_pkg.name.is_empty() {
                    local_pkg.name = local.dir_name.clone();
                }
                pkg.outdated = is_outdated(&mut local_pkg, std::slice::from_ref(pkg));
            }
        }

        info!("Listed {} {} from registry", packages.len(), package_type);
        Ok(packages)
    }

    /// Registry packages without connectivity gating or local state.
    async fn registry_packages(&self, package_type: PackageType) -> Result<Vec<Package>> {
        let index = self.indexes.stage_index(package_type).await.into_result()?;
        let stats = match self.indexes.download_stats().await.into_result() {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Download stats unavailable: {}", e);
                Arc::new(DownloadStats::new())
            }
        };

        let base = &self.config.registry.base_url;
        let mut packages = Vec::with_capacity(index.repos.len());
        for repo in &index.repos {
            let Some(mut pkg) = Package::from_stage_repo(repo, base, self.locale) else {
                debug!("Skipping malformed stage repo {}", repo.url);
                continue;
            };
            if disallow_display(&pkg, &self.config.app_version) {
                debug!(
                    "Hiding {} {}: requires app {}",
                    pkg.name, pkg.version, pkg.min_app_version
                );
                continue;
            }
            if let Some(stat) = pkg.artifact().and_then(|a| stats.get(a.repo_path())) {
                pkg.downloads = stat.downloads;
            }
            packages.push(pkg);
        }
        Ok(packages)
    }

    /// Packages of one type installed locally.
    ///
    /// Outdated detection uses the registry listing when the registry is
    /// reachable and the listing loads; otherwise every package is reported
    /// as current.
    pub async fn installed_packages(&self, package_type: PackageType) -> Result<Vec<Package>> {
        let installed = self.local.list_installed(package_type).await?;
        if installed.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = match self.gate.ensure_online().await {
            Ok(()) => match self.registry_packages(package_type).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Registry listing unavailable for outdated check: {}", e);
                    Vec::new()
                }
            },
            Err(BazaarError::Offline) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut packages = Vec::with_capacity(installed.len());
        for InstalledPackage {
            dir_name,
            path,
            package: mut pkg,
        } in installed
        {
            if pkg.name.is_empty() {
                pkg.name = dir_name;
            }
            pkg.apply_locale(self.locale);
            pkg.installed = true;
            pkg.incompatible = disallow_display(&pkg, &self.config.app_version);
            pkg.outdated = is_outdated(&mut pkg, &candidates);

            let size_path = path.clone();
            let key = path.to_string_lossy().into_owned();
            match self
                .metadata
                .install_size(&key, || async move { local::dir_size(&size_path).await })
                .await
                .into_result()
            {
                Ok(size) => {
                    pkg.install_size = size;
                    pkg.h_install_size = human_size(size);
                }
                Err(e) => warn!("Install size of {:?} unavailable: {}", path, e),
            }
            match local::install_date(&path).await {
                Ok(date) => pkg.h_install_date = date,
                Err(e) => debug!("Install date of {:?} unavailable: {}", path, e),
            }

            packages.push(pkg);
        }
        Ok(packages)
    }

    /// Descriptor published with a registry package version.
    pub async fn remote_descriptor(
        &self,
        package_type: PackageType,
        repo_url: &str,
        repo_hash: &str,
    ) -> Result<Package> {
        let artifact = ArtifactId::new(repo_url, repo_hash);
        let mut pkg = self
            .metadata
            .descriptor(&artifact, package_type)
            .await
            .into_result()?;
        pkg.apply_locale(self.locale);
        Ok(pkg)
    }

    /// Download and install a registry package into `<type dir>/<dir_name>`.
    pub async fn install(
        &self,
        package_type: PackageType,
        repo_url: &str,
        repo_hash: &str,
        dir_name: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let artifact = ArtifactId::new(repo_url, repo_hash);
        let install_path = self.local.install_dir(package_type, dir_name);
        let label = self.display_label(package_type, dir_name).await;
        self.installer
            .install(&artifact, &install_path, &label, progress, self.system_id())
            .await
    }

    /// Remove an installed package.
    pub async fn uninstall(&self, package_type: PackageType, dir_name: &str) -> Result<()> {
        let install_path = self.local.install_dir(package_type, dir_name);
        let label = self.display_label(package_type, dir_name).await;
        self.installer.uninstall(&install_path, &label).await
    }

    /// Rendered readme of a registry package.
    ///
    /// Uses the stage index loaded by a previous listing; returns an empty
    /// string when the package is not in it.
    pub async fn package_readme(
        &self,
        repo_url: &str,
        repo_hash: &str,
        package_type: PackageType,
    ) -> String {
        let Some(index) = self.indexes.cached_stage_index(package_type).await else {
            debug!("No cached {} index for readme of {}", package_type, repo_url);
            return String::new();
        };
        let locator = ArtifactId::new(repo_url, repo_hash).cache_key();
        let Some(repo) = index.find(&locator) else {
            debug!("{} not found in {} index", locator, package_type);
            return String::new();
        };
        self.readme
            .remote_readme(repo, repo_url, repo_hash, self.locale)
            .await
    }

    /// Rendered readme of an installed package.
    pub async fn local_readme(
        &self,
        package_type: PackageType,
        dir_name: &str,
        link_base: &str,
    ) -> Result<String> {
        let pkg = self.local.read_descriptor(package_type, dir_name).await?;
        let dir = self.local.install_dir(package_type, dir_name);
        Ok(self
            .readme
            .local_readme(&dir, pkg.readme.as_ref(), self.locale, link_base)
            .await)
    }

    /// Name shown in errors: the installed descriptor's label, else `dir_name`.
    async fn display_label(&self, package_type: PackageType, dir_name: &str) -> String {
        match self.local.read_descriptor(package_type, dir_name).await {
            Ok(mut pkg) => {
                pkg.apply_locale(self.locale);
                pkg.display_label().to_string()
            }
            Err(_) => dir_name.to_string(),
        }
    }

    /// Drop every cached package descriptor.
    pub async fn clean_package_cache(&self) {
        info!("Cleaning package descriptor cache");
        self.metadata.clear_descriptors().await;
    }

    /// Drop cached registry listings.
    pub async fn clean_index_cache(&self) {
        self.indexes.clear().await;
    }
}

/// Local install matching a registry package, by directory name or source URL.
fn find_installed<'a>(
    installed: &'a [InstalledPackage],
    pkg: &Package,
) -> Option<&'a InstalledPackage> {
    installed.iter().find(|i| {
        i.dir_name == pkg.name || (!i.package.url.is_empty() && i.package.url == pkg.url)
    })
}
