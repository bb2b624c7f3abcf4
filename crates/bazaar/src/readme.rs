//! Package readme retrieval and rendering.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::download::DownloadCoordinator;
use crate::locale::{self, Locale, LocalizedText};
use crate::package::{ArtifactId, StageRepo};
use crate::version::SOURCE_HOST_PREFIX;

/// CDN serving raw repository files, used as the link base of remote readmes.
pub const CDN_LINK_BASE: &str = "https://cdn.jsdelivr.net/gh/";

/// Converts markdown to HTML. Supplied by the host application.
pub trait MarkdownRenderer: Send + Sync {
    /// Render `markdown`, resolving relative links and images against
    /// `link_base`.
    fn render(&self, markdown: &str, link_base: &str) -> String;
}

/// Decode readme bytes, honoring UTF-16 and UTF-8 byte order marks.
pub fn decode_readme(data: &[u8]) -> String {
    match data {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

fn decode_utf16(data: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Link base for a readme served from the registry.
pub fn remote_link_base(repo_url: &str) -> String {
    let repo = repo_url.strip_prefix(SOURCE_HOST_PREFIX).unwrap_or(repo_url);
    format!("{}{}", CDN_LINK_BASE, repo.trim_end_matches('/'))
}

/// Fetches and renders package readmes.
pub struct ReadmeService {
    downloads: Arc<DownloadCoordinator>,
    renderer: Arc<dyn MarkdownRenderer>,
}

impl ReadmeService {
    pub fn new(downloads: Arc<DownloadCoordinator>, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        Self {
            downloads,
            renderer,
        }
    }

    /// Rendered readme of a published package version.
    ///
    /// The locale's readme is tried first, then the default readme. When
    /// both fail the result is an error message meant for display.
    pub async fn remote_readme(
        &self,
        repo: &StageRepo,
        repo_url: &str,
        repo_hash: &str,
        active: Option<Locale>,
    ) -> String {
        let field = repo.package.as_ref().and_then(|p| p.readme.as_ref());
        let readme = locale::preferred_readme(field, active);
        let artifact = ArtifactId::new(repo_url, repo_hash);

        let data = match self.fetch(&artifact, &readme).await {
            Ok(data) => data,
            Err(mut message) => {
                let default = field.map(|f| f.default.as_str()).unwrap_or_default();
                if readme == default || default.trim().is_empty() {
                    return message;
                }
                match self.fetch(&artifact, default).await {
                    Ok(data) => data,
                    Err(fallback) => {
                        message.push_str("<br>");
                        message.push_str(&fallback);
                        return message;
                    }
                }
            }
        };

        let markdown = decode_readme(&data);
        self.renderer.render(&markdown, &remote_link_base(repo_url))
    }

    /// Rendered readme of an installed package.
    pub async fn local_readme(
        &self,
        install_dir: &Path,
        field: Option<&LocalizedText>,
        active: Option<Locale>,
        link_base: &str,
    ) -> String {
        let readme = locale::preferred_readme(field, active);
        let path = install_dir.join(&readme);
        match tokio::fs::read(&path).await {
            Ok(data) => self.renderer.render(&decode_readme(&data), link_base),
            Err(e) => {
                warn!("Read {:?} failed: {}", path, e);
                format!("Load package's README.md({}) failed: {}", readme, e)
            }
        }
    }

    async fn fetch(&self, artifact: &ArtifactId, readme: &str) -> Result<bytes::Bytes, String> {
        let asset = artifact.clone().with_asset(readme);
        debug!("Loading readme {}", asset);
        self.downloads
            .download(&asset, None, None)
            .await
            .map_err(|e| {
                format!(
                    "Load bazaar package's README.md({}) failed: {}",
                    readme,
                    e.user_message()
                )
            })
    }
}
