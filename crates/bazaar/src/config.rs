//! Configuration structures for the marketplace pipeline.
//!
//! Defines registry endpoints, local install locations, cache lifetimes
//! and presentation settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BazaarError;
use crate::locale::Locale;
use crate::package::PackageType;

/// Main marketplace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BazaarConfig {
    /// Active UI locale code, e.g. `en_US` or `zh_CN`
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Version of the running application, used for compatibility gating
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Keep scratch files and directories left by installs
    #[serde(default)]
    pub keep_scratch: bool,

    /// How long the offline notice stays visible, in milliseconds
    #[serde(default = "default_offline_notice_ms")]
    pub offline_notice_ms: u64,

    /// Registry endpoints and network limits
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Local install locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Cache lifetimes
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for BazaarConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            app_version: default_app_version(),
            keep_scratch: false,
            offline_notice_ms: default_offline_notice_ms(),
            registry: RegistryConfig::default(),
            paths: PathsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl BazaarConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, BazaarError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| BazaarError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), BazaarError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BazaarError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The active locale, or `None` when the code is not recognized.
    pub fn active_locale(&self) -> Option<Locale> {
        Locale::parse(&self.locale)
    }

    /// Duration of the offline notice.
    pub fn offline_notice(&self) -> Duration {
        Duration::from_millis(self.offline_notice_ms)
    }
}

/// Registry endpoints and network limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL serving stage indexes and package files
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Content hash of the current registry snapshot
    #[serde(default)]
    pub registry_hash: String,

    /// Base URL of the download statistics service
    #[serde(default = "default_stat_url")]
    pub stat_base_url: String,

    /// Base URL of the cloud service receiving download counts
    #[serde(default = "default_cloud_url")]
    pub cloud_base_url: String,

    /// Path of the download count endpoint under `cloud_base_url`
    #[serde(default = "default_download_count_path")]
    pub download_count_path: String,

    /// Installation identifier reported with download counts (empty = none)
    #[serde(default)]
    pub system_id: String,

    /// Reachability probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout for index and descriptor requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Timeout for package downloads in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            registry_hash: String::new(),
            stat_base_url: default_stat_url(),
            cloud_base_url: default_cloud_url(),
            download_count_path: default_download_count_path(),
            system_id: String::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_seconds: default_request_timeout(),
            download_timeout_seconds: default_download_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl RegistryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }

    /// Stage index URL for one package type.
    pub fn stage_index_url(&self, package_type: PackageType) -> String {
        format!(
            "{}/bazaar@{}/stage/{}.json",
            self.base_url.trim_end_matches('/'),
            self.registry_hash,
            package_type.stage_name()
        )
    }

    /// URL of a file in a published package, from its host-relative path.
    pub fn package_url(&self, relative_path: &str) -> String {
        format!(
            "{}/package/{}",
            self.base_url.trim_end_matches('/'),
            relative_path
        )
    }

    /// Download statistics index URL.
    pub fn stats_url(&self) -> String {
        format!("{}/bazaar/index.json", self.stat_base_url.trim_end_matches('/'))
    }

    /// Download count endpoint URL.
    pub fn download_count_url(&self) -> String {
        format!(
            "{}{}",
            self.cloud_base_url.trim_end_matches('/'),
            self.download_count_path
        )
    }
}

/// Local install locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Workspace data directory holding `plugins/`, `widgets/`, `templates/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding installed themes (empty = `<data_dir>/themes`)
    #[serde(default)]
    pub themes_dir: Option<PathBuf>,

    /// Directory holding installed icon sets (empty = `<data_dir>/icons`)
    #[serde(default)]
    pub icons_dir: Option<PathBuf>,

    /// Scratch directory for downloads and extraction (empty = system temp)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            themes_dir: None,
            icons_dir: None,
            temp_dir: None,
        }
    }
}

impl PathsConfig {
    /// A layout rooted at one directory, used by tests and embedders.
    pub fn rooted(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            themes_dir: Some(root.join("themes")),
            icons_dir: Some(root.join("icons")),
            temp_dir: Some(root.join("temp")),
        }
    }

    /// Directory containing every installed package of a type.
    pub fn type_dir(&self, package_type: PackageType) -> PathBuf {
        match package_type {
            PackageType::Theme => self
                .themes_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("themes")),
            PackageType::Icon => self
                .icons_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("icons")),
            PackageType::Plugin | PackageType::Widget | PackageType::Template => {
                self.data_dir.join(package_type.stage_name())
            }
        }
    }

    /// Install directory of one package.
    pub fn install_dir(&self, package_type: PackageType, dir_name: &str) -> PathBuf {
        self.type_dir(package_type).join(dir_name)
    }

    /// Root for install scratch space.
    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join("bazaar")
            .join("package")
    }
}

/// Cache lifetimes, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Stage index lifetime
    #[serde(default = "default_index_ttl")]
    pub index_ttl_seconds: u64,

    /// Package descriptor lifetime
    #[serde(default = "default_descriptor_ttl")]
    pub descriptor_ttl_seconds: u64,

    /// Expired descriptor sweep interval
    #[serde(default = "default_descriptor_sweep")]
    pub descriptor_sweep_seconds: u64,

    /// Install size lifetime
    #[serde(default = "default_size_ttl")]
    pub size_ttl_seconds: u64,

    /// Expired install size sweep interval
    #[serde(default = "default_size_sweep")]
    pub size_sweep_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_ttl_seconds: default_index_ttl(),
            descriptor_ttl_seconds: default_descriptor_ttl(),
            descriptor_sweep_seconds: default_descriptor_sweep(),
            size_ttl_seconds: default_size_ttl(),
            size_sweep_seconds: default_size_sweep(),
        }
    }
}

impl CacheConfig {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_seconds)
    }

    pub fn descriptor_ttl(&self) -> Duration {
        Duration::from_secs(self.descriptor_ttl_seconds)
    }

    pub fn descriptor_sweep(&self) -> Duration {
        Duration::from_secs(self.descriptor_sweep_seconds)
    }

    pub fn size_ttl(&self) -> Duration {
        Duration::from_secs(self.size_ttl_seconds)
    }

    pub fn size_sweep(&self) -> Duration {
        Duration::from_secs(self.size_sweep_seconds)
    }
}

// Default value functions for serde
fn default_locale() -> String {
    "en_US".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_offline_notice_ms() -> u64 {
    5000
}

fn default_registry_url() -> String {
    "https://oss.b3logfile.com".to_string()
}

fn default_stat_url() -> String {
    "https://bazaar.b3logfile.com".to_string()
}

fn default_cloud_url() -> String {
    "https://ld246.com".to_string()
}

fn default_download_count_path() -> String {
    "/apis/siyuan/bazaar/addBazaarPackageDownloadCount".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    120 // 2 minutes
}

fn default_user_agent() -> String {
    format!("bazaar/{}", env!("CARGO_PKG_VERSION"))
}

fn default_index_ttl() -> u64 {
    3600
}

fn default_descriptor_ttl() -> u64 {
    6 * 3600
}

fn default_descriptor_sweep() -> u64 {
    30 * 60
}

fn default_size_ttl() -> u64 {
    48 * 3600
}

fn default_size_sweep() -> u64 {
    6 * 3600
}

/// Get the default data directory.
fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join("Bazaar").join("data");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Bazaar")
                .join("data");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(data_home).join("bazaar").join("data");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("bazaar")
                .join("data");
        }
    }

    // Fallback
    PathBuf::from(".").join("data")
}
