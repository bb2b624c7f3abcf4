//! Error types for the marketplace pipeline.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BazaarError>;

/// Errors that can occur while browsing, downloading, or installing packages.
#[derive(Debug, Error)]
pub enum BazaarError {
    /// A local descriptor file does not exist
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Transport-level failure while talking to the registry
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Registry answered with a non-success status
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Connectivity probe failed before any listing work
    #[error("marketplace is offline")]
    Offline,

    /// Writing, copying or removing package files failed
    #[error("filesystem operation on package [{package}] failed: {reason}")]
    Filesystem { package: String, reason: String },

    /// A descriptor, index or version string could not be parsed
    #[error("parse error in {source_id}: {reason}")]
    Parse { source_id: String, reason: String },

    /// Archive could not be read or unpacked
    #[error("archive error: {0}")]
    Archive(String),

    /// Artifact identifier is malformed
    #[error("invalid artifact identifier: {0}")]
    InvalidArtifact(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BazaarError {
    /// Message suitable for showing to a user.
    ///
    /// Internal detail (URLs, paths, status text) stays in the `Display`
    /// output, which is meant for logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => "package is not installed".to_string(),
            Self::Network { .. } => {
                "get bazaar package failed, please check your network".to_string()
            }
            Self::HttpStatus { status, .. } => format!("get bazaar package failed: {}", status),
            Self::Offline => {
                "marketplace is unreachable, please check your network connection".to_string()
            }
            Self::Filesystem { package, .. } => {
                format!("remove or write community package [{}] failed", package)
            }
            Self::Parse { source_id, .. } => format!("invalid package data in {}", source_id),
            Self::Archive(_) => "package archive is damaged".to_string(),
            Self::InvalidArtifact(id) => format!("invalid package reference: {}", id),
            Self::ConfigError(_) => "marketplace configuration is invalid".to_string(),
            Self::JsonError(_) => "invalid package data".to_string(),
            Self::IoError(_) => "file operation failed".to_string(),
        }
    }

    /// True when the error means "does not exist" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Build a filesystem error that names the package instead of its path.
    pub fn filesystem(package: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            package: package.into(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for BazaarError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        BazaarError::Network {
            url,
            reason: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for BazaarError {
    fn from(err: zip::result::ZipError) -> Self {
        BazaarError::Archive(err.to_string())
    }
}

impl From<semver::Error> for BazaarError {
    fn from(err: semver::Error) -> Self {
        BazaarError::Parse {
            source_id: "version".to_string(),
            reason: err.to_string(),
        }
    }
}
