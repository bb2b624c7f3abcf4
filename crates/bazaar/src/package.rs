//! Package records, registry listing shapes and artifact identifiers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use humansize::{format_size, DECIMAL};
use serde::{Deserialize, Serialize};

use crate::error::BazaarError;
use crate::locale::{self, Funding, Locale, LocalizedText};
use crate::version::SOURCE_HOST_PREFIX;

/// Kind of marketplace package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Plugin,
    Widget,
    Icon,
    Template,
    Theme,
}

impl PackageType {
    pub const ALL: [PackageType; 5] = [
        PackageType::Plugin,
        PackageType::Widget,
        PackageType::Icon,
        PackageType::Template,
        PackageType::Theme,
    ];

    /// Name of the registry stage index for this type (`plugins`, ...).
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Widget => "widgets",
            Self::Icon => "icons",
            Self::Template => "templates",
            Self::Theme => "themes",
        }
    }

    /// Descriptor file shipped at the root of every package of this type.
    pub fn descriptor_file(&self) -> &'static str {
        match self {
            Self::Plugin => "plugin.json",
            Self::Widget => "widget.json",
            Self::Icon => "icon.json",
            Self::Template => "template.json",
            Self::Theme => "theme.json",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_name())
    }
}

impl FromStr for PackageType {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| {
                t.stage_name() == s || t.descriptor_file().trim_end_matches(".json") == s
            })
            .ok_or_else(|| BazaarError::ConfigError(format!("unknown package type: {}", s)))
    }
}

/// Merged view of a package's registry metadata and local install state.
///
/// Deserialized from local descriptor files and built from stage index
/// entries. `outdated` and `incompatible` are always computed and never read
/// from input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Package {
    pub author: String,
    pub url: String,
    pub version: String,
    pub min_app_version: String,
    pub backends: Vec<String>,
    pub frontends: Vec<String>,
    pub display_name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub readme: Option<LocalizedText>,
    pub funding: Option<Funding>,
    pub keywords: Vec<String>,

    pub preferred_funding: String,
    pub preferred_name: String,
    pub preferred_desc: String,
    pub preferred_readme: String,

    pub name: String,
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub repo_hash: String,
    #[serde(rename = "previewURL")]
    pub preview_url: String,
    #[serde(rename = "previewURLThumb")]
    pub preview_url_thumb: String,
    #[serde(rename = "iconURL")]
    pub icon_url: String,

    pub installed: bool,
    #[serde(skip_deserializing)]
    pub outdated: bool,
    /// Set by the host for the theme or icon set in use; never computed here.
    pub current: bool,
    pub updated: String,
    pub stars: u64,
    pub open_issues: u64,
    pub size: u64,
    pub h_size: String,
    pub install_size: u64,
    pub h_install_size: String,
    pub h_install_date: String,
    pub h_updated: String,
    pub downloads: u64,

    #[serde(skip_deserializing)]
    pub incompatible: bool,
}

impl Package {
    /// Fill the `preferred_*` fields for the active locale.
    pub fn apply_locale(&mut self, active: Option<Locale>) {
        self.preferred_name =
            locale::preferred_name(self.display_name.as_ref(), active, &self.name);
        self.preferred_desc = locale::preferred_description(self.description.as_ref(), active);
        self.preferred_readme = locale::preferred_readme(self.readme.as_ref(), active);
        self.preferred_funding = locale::preferred_funding(self.funding.as_ref());
    }

    /// Name to use in user-facing messages.
    pub fn display_label(&self) -> &str {
        if !self.preferred_name.is_empty() {
            &self.preferred_name
        } else {
            &self.name
        }
    }

    /// The artifact this package would be downloaded from, when known.
    pub fn artifact(&self) -> Option<ArtifactId> {
        if self.repo_url.is_empty() || self.repo_hash.is_empty() {
            return None;
        }
        Some(ArtifactId::new(&self.repo_url, &self.repo_hash))
    }

    /// Build a listing entry from a stage index repo.
    ///
    /// Returns `None` for repos without a package descriptor or with a
    /// malformed `owner/repo@hash` locator.
    pub fn from_stage_repo(
        repo: &StageRepo,
        registry_base: &str,
        active: Option<Locale>,
    ) -> Option<Self> {
        let stage = repo.package.as_ref()?;
        let (path, hash) = repo.url.rsplit_once('@')?;
        let name = path.rsplit('/').next().filter(|n| !n.is_empty())?;
        let base = registry_base.trim_end_matches('/');

        let mut pkg = Package {
            author: stage.author.clone(),
            url: stage.url.trim_end_matches('/').to_string(),
            version: stage.version.clone(),
            min_app_version: stage.min_app_version.clone(),
            display_name: stage.display_name.clone(),
            description: stage.description.clone(),
            readme: stage.readme.clone(),
            funding: stage.funding.clone(),
            keywords: stage.keywords.clone(),
            name: name.to_string(),
            repo_url: format!("{}{}", SOURCE_HOST_PREFIX, path),
            repo_hash: hash.to_string(),
            preview_url: format!("{}/package/{}/preview.png?imageslim", base, repo.url),
            preview_url_thumb: format!(
                "{}/package/{}/preview.png?imageView2/2/w/436/h/232",
                base, repo.url
            ),
            icon_url: format!("{}/package/{}/icon.png", base, repo.url),
            updated: repo.updated.clone(),
            stars: repo.stars,
            open_issues: repo.open_issues,
            size: repo.size,
            h_size: human_size(repo.size),
            install_size: repo.install_size,
            h_install_size: human_size(repo.install_size),
            h_updated: format_updated(&repo.updated),
            ..Package::default()
        };
        pkg.apply_locale(active);
        Some(pkg)
    }
}

/// Package descriptor as published in a stage index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StagePackage {
    pub author: String,
    pub url: String,
    pub version: String,
    pub min_app_version: String,
    pub display_name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub readme: Option<LocalizedText>,
    #[serde(rename = "i18n")]
    pub i18n: Vec<String>,
    pub funding: Option<Funding>,
    pub keywords: Vec<String>,
}

/// One published repository in a stage index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StageRepo {
    /// Host-relative locator, `owner/repo@hash`.
    pub url: String,
    pub updated: String,
    pub stars: u64,
    pub open_issues: u64,
    pub size: u64,
    pub install_size: u64,
    pub package: Option<StagePackage>,
}

/// Registry listing for one package type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageIndex {
    pub repos: Vec<StageRepo>,
}

impl StageIndex {
    /// Find a repo by its host-relative `owner/repo@hash` locator.
    pub fn find(&self, locator: &str) -> Option<&StageRepo> {
        self.repos.iter().find(|r| r.url == locator)
    }
}

/// Aggregate download counter for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadStat {
    pub name: String,
    pub downloads: u64,
}

/// Registry-wide download statistics, keyed by `owner/repo`.
pub type DownloadStats = HashMap<String, DownloadStat>;

/// Identifier of one downloadable artifact: `originURL@contentHash[/asset]`.
///
/// Without an asset the identifier names the package archive; with one it
/// names a single file (for example a readme) inside the published package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    origin: String,
    hash: String,
    asset: Option<String>,
}

impl ArtifactId {
    pub fn new(origin: &str, hash: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            hash: hash.to_string(),
            asset: None,
        }
    }

    /// Same artifact, narrowed to one file inside the package.
    pub fn with_asset(mut self, asset: &str) -> Self {
        let asset = asset.trim_start_matches('/');
        self.asset = (!asset.is_empty()).then(|| asset.to_string());
        self
    }

    /// Parse `originURL@hash[/asset]`.
    pub fn parse(raw: &str) -> Result<Self, BazaarError> {
        let (origin, rest) = raw
            .rsplit_once('@')
            .ok_or_else(|| BazaarError::InvalidArtifact(raw.to_string()))?;
        let (hash, asset) = match rest.split_once('/') {
            Some((hash, asset)) => (hash, Some(asset)),
            None => (rest, None),
        };
        if origin.is_empty() || hash.is_empty() {
            return Err(BazaarError::InvalidArtifact(raw.to_string()));
        }

        let id = Self::new(origin, hash);
        Ok(match asset {
            Some(asset) => id.with_asset(asset),
            None => id,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn asset(&self) -> Option<&str> {
        self.asset.as_deref()
    }

    /// Origin with the canonical source-host prefix stripped (`owner/repo`).
    pub fn repo_path(&self) -> &str {
        self.origin
            .strip_prefix(SOURCE_HOST_PREFIX)
            .unwrap_or(&self.origin)
    }

    /// Normalized cache key, `owner/repo@hash`, shared by every asset of the
    /// same package version.
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.repo_path(), self.hash)
    }

    /// Host-relative download path, `owner/repo@hash[/asset]`.
    pub fn relative_path(&self) -> String {
        match &self.asset {
            Some(asset) => format!("{}/{}", self.cache_key(), asset),
            None => self.cache_key(),
        }
    }

    /// True for markdown assets; those downloads are not counted as installs.
    pub fn is_markdown(&self) -> bool {
        self.asset.as_deref().is_some_and(|a| a.contains(".md"))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.origin, self.hash)?;
        if let Some(asset) = &self.asset {
            write!(f, "/{}", asset)?;
        }
        Ok(())
    }
}

impl FromStr for ArtifactId {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Human readable byte count, e.g. `1.50 MB`.
pub fn human_size(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Reduce a registry timestamp to `YYYY-MM-DD`.
///
/// Unparseable input is cut at the first `T`; failing that, `T` and `Z`
/// characters are dropped.
pub fn format_updated(updated: &str) -> String {
    if let Ok(t) = DateTime::parse_from_rfc3339(updated) {
        return t.format("%Y-%m-%d").to_string();
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(updated, fmt) {
            return t.format("%Y-%m-%d").to_string();
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(updated, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }

    match updated.find('T') {
        Some(idx) => updated[..idx].to_string(),
        None => updated.replace(['T', 'Z'], ""),
    }
}
