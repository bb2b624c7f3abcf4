//! # bazaar
//!
//! Marketplace package pipeline for themes, icon sets, plugins, templates
//! and widgets published in a remote registry.
//!
//! This crate handles:
//! - Registry stage indexes and download statistics behind TTL caches
//! - Deduplicated package downloads with progress reporting
//! - Install and uninstall of zip packages with scratch-space extraction
//! - Semantic-version outdated detection and minimum app version gating
//! - Locale-aware resolution of package names, descriptions and readmes
//!
//! ## Collaborators
//!
//! Network, archive, markdown and notification concerns sit behind traits
//! ([`RegistryTransport`], [`ArchiveExtractor`], [`MarkdownRenderer`],
//! [`Notifier`]) so hosts and tests can supply their own.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod download;
pub mod error;
pub mod extract;
pub mod install;
pub mod local;
pub mod locale;
pub mod manager;
pub mod package;
#[cfg(test)]
mod proptests;
pub mod readme;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod version;

// Re-export main types for convenience
pub use cache::{CacheStats, Lookup, PackageMetadataCache, RemoteIndexCache, TtlCache};
pub use config::{BazaarConfig, CacheConfig, PathsConfig, RegistryConfig};
pub use connectivity::{ConnectivityGate, LogNotifier, Notifier, RecordingNotifier};
pub use download::{DownloadCoordinator, DownloadProgress, LockRegistry, ProgressCallback};
pub use error::{BazaarError, Result};
pub use extract::{ArchiveExtractor, ZipExtractor};
pub use install::{InstallStage, PackageInstaller, StageCallback};
pub use local::{InstalledPackage, LocalPackageStore};
pub use locale::{Funding, Locale, LocalizedText};
pub use manager::Bazaar;
pub use package::{
    ArtifactId, DownloadStat, DownloadStats, Package, PackageType, StageIndex, StagePackage,
    StageRepo,
};
pub use readme::{MarkdownRenderer, ReadmeService};
pub use transport::{HttpTransport, RegistryTransport};
pub use version::{compare_versions, disallow_display, is_outdated};
