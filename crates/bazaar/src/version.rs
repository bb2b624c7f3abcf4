//! Version ordering, outdated detection and compatibility gating.
//!
//! Registry versions are loose semantic versions: `1.2`, `3` and
//! `1.2.0-beta.1+build` all occur in the wild. They are read as if tagged
//! with a `v` prefix, padded to three components, and compared by semver
//! precedence (build metadata ignored). Anything that still fails to parse
//! sorts below every valid version.

use std::cmp::Ordering;

use semver::Version;
use tracing::debug;

use crate::package::Package;

/// Canonical source-host prefix; only packages mirrored from here are
/// checked for updates.
pub const SOURCE_HOST_PREFIX: &str = "https://github.com/";

/// Parse a loose version string, returning `None` when it is not valid.
///
/// Descriptor versions are untagged; `raw` is valid exactly when `v{raw}`
/// is a valid version tag, so an already tagged `v1.0.0` is rejected.
pub fn parse_version(raw: &str) -> Option<Version> {
    // Split off pre-release/build so padding only touches the core.
    let core_end = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, rest) = raw.split_at(core_end);
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    // A shorthand like `1.2` may not carry pre-release or build suffixes.
    if parts.len() < 3 && !rest.is_empty() {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), rest)).ok()
}

/// Compare two loose version strings.
///
/// Invalid versions compare less than valid ones and equal to each other.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp_precedence(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Split a canonical source URL into `(owner, repo)`.
///
/// Returns `None` for URLs outside [`SOURCE_HOST_PREFIX`] or without exactly
/// two non-empty path segments.
pub fn source_repo(url: &str) -> Option<(&str, &str)> {
    let repo = url.strip_prefix(SOURCE_HOST_PREFIX)?;
    let mut parts = repo.split('/');
    let owner = parts.next()?;
    let name = parts.next()?;
    if parts.next().is_some() || owner.trim().is_empty() || name.trim().is_empty() {
        return None;
    }
    Some((owner, name))
}

/// Check whether an installed package has a newer registry release.
///
/// On a match the local `repo_hash` is replaced with the candidate's hash,
/// which is what a subsequent update download needs.
pub fn is_outdated(local: &mut Package, candidates: &[Package]) -> bool {
    if source_repo(&local.url).is_none() {
        return false;
    }

    for candidate in candidates {
        if local.url == candidate.url
            && local.name == candidate.name
            && compare_versions(&local.version, &candidate.version) == Ordering::Less
        {
            debug!(
                "Package {} is outdated: {} -> {}",
                local.name, local.version, candidate.version
            );
            local.repo_hash = candidate.repo_hash.clone();
            return true;
        }
    }
    false
}

/// Whether a registry package must be hidden from listings.
///
/// Packages that declare a minimum application version above the running
/// version are hidden. Packages without the field are always shown.
pub fn disallow_display(pkg: &Package, app_version: &str) -> bool {
    if pkg.min_app_version.is_empty() {
        return false;
    }
    compare_versions(&pkg.min_app_version, app_version) == Ordering::Greater
}
