//! Property-based tests for bazaar.
//!
//! These tests use proptest to verify correctness properties across
//! randomly generated inputs.
//!
//! # Properties Tested
//!
//! - Locale resolution fallback chain
//! - Funding URL priority
//! - Loose version ordering and outdated detection
//! - Registry date formatting

#![cfg(test)]

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveTime};
use proptest::prelude::*;
use semver::Version;

use crate::locale::{resolve, Funding, Locale, LocalizedText};
use crate::package::{format_updated, Package};
use crate::version::{compare_versions, is_outdated};

// =============================================================================
// Generators
// =============================================================================

/// Generate a recognized locale.
fn arb_locale() -> impl Strategy<Value = Locale> {
    prop::sample::select(Locale::ALL.to_vec())
}

/// Generate an active locale, `None` standing for an unrecognized one.
fn arb_active() -> impl Strategy<Value = Option<Locale>> {
    prop::option::of(arb_locale())
}

/// Generate a non-empty display string.
fn arb_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ]{1,24}"
}

/// Generate a random version.
fn arb_version() -> impl Strategy<Value = Version> {
    (0u64..50, 0u64..50, 0u64..50)
        .prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

/// Generate an optional funding handle.
fn arb_handle() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z]{1,12}"]
}

// =============================================================================
// Locale resolution
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A field with only a default resolves to it for every active locale.
    #[test]
    fn prop_default_only_resolves_to_default(
        default in arb_text(),
        active in arb_active(),
        fallback in arb_text(),
    ) {
        let field = LocalizedText::with_default(default.clone());
        prop_assert_eq!(resolve(Some(&field), active, &fallback), default);
    }

    /// With an empty default, only the overridden locale sees the override.
    #[test]
    fn prop_single_override(
        locale in arb_locale(),
        active in arb_active(),
        value in arb_text(),
        fallback in arb_text(),
    ) {
        let field = LocalizedText::default().with(locale, value.clone());
        let effective = active.unwrap_or(Locale::EnUs);
        let expected = if effective == locale { value } else { fallback.clone() };
        prop_assert_eq!(resolve(Some(&field), active, &fallback), expected);
    }

    /// A recognized locale with an override never falls through.
    #[test]
    fn prop_override_beats_default(
        locale in arb_locale(),
        default in arb_text(),
        value in arb_text(),
    ) {
        let field = LocalizedText::with_default(default).with(locale, value.clone());
        prop_assert_eq!(resolve(Some(&field), Some(locale), "x"), value);
    }

    /// The first configured provider wins.
    #[test]
    fn prop_funding_priority(
        open_collective in arb_handle(),
        patreon in arb_handle(),
        github in arb_handle(),
        custom in prop::collection::vec("https://[a-z]{1,8}\\.org", 0..3),
    ) {
        let funding = Funding {
            open_collective: open_collective.clone(),
            patreon: patreon.clone(),
            github: github.clone(),
            custom: custom.clone(),
        };
        let expected = if !open_collective.is_empty() {
            format!("https://opencollective.com/{}", open_collective)
        } else if !patreon.is_empty() {
            format!("https://www.patreon.com/{}", patreon)
        } else if !github.is_empty() {
            format!("https://github.com/sponsors/{}", github)
        } else {
            custom.first().cloned().unwrap_or_default()
        };
        prop_assert_eq!(funding.preferred_url(), expected);
    }
}

// =============================================================================
// Versions
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Full versions order like semver.
    #[test]
    fn prop_compare_matches_semver(a in arb_version(), b in arb_version()) {
        prop_assert_eq!(compare_versions(&a.to_string(), &b.to_string()), a.cmp(&b));
    }

    /// Missing minor and patch components count as zero.
    #[test]
    fn prop_shorthand_is_zero_padded(major in 0u64..50, minor in 0u64..50) {
        let short = format!("{}.{}", major, minor);
        let full = format!("{}.{}.0", major, minor);
        prop_assert_eq!(compare_versions(&short, &full), Ordering::Equal);
        prop_assert_eq!(
            compare_versions(&major.to_string(), &format!("{}.0.0", major)),
            Ordering::Equal
        );
    }

    /// Unparseable versions sort below every valid one.
    #[test]
    fn prop_invalid_sorts_lowest(v in arb_version(), junk in "[a-z]{1,8}") {
        prop_assert_eq!(compare_versions(&junk, &v.to_string()), Ordering::Less);
        prop_assert_eq!(compare_versions(&v.to_string(), &junk), Ordering::Greater);
    }

    /// A package is outdated exactly when the registry has a newer version,
    /// and only then is the registry hash adopted.
    #[test]
    fn prop_outdated_iff_newer(local_v in arb_version(), remote_v in arb_version()) {
        let url = "https://github.com/owner/pkg".to_string();
        let mut local = Package {
            url: url.clone(),
            name: "pkg".to_string(),
            version: local_v.to_string(),
            repo_hash: "local".to_string(),
            ..Package::default()
        };
        let remote = Package {
            url,
            name: "pkg".to_string(),
            version: remote_v.to_string(),
            repo_hash: "remote".to_string(),
            ..Package::default()
        };

        let outdated = is_outdated(&mut local, &[remote]);
        prop_assert_eq!(outdated, local_v < remote_v);
        prop_assert_eq!(local.repo_hash == "remote", outdated);
    }
}

// =============================================================================
// Dates
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Timestamps in the registry's formats reduce to their calendar date.
    #[test]
    fn prop_format_updated_keeps_date(
        days in 0i64..20000,
        secs in 0u32..86400,
        rfc3339 in any::<bool>(),
    ) {
        let date = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + chrono::Duration::days(days);
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap();
        let stamp = date.and_time(time);
        let raw = if rfc3339 {
            stamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
        } else {
            stamp.format("%Y-%m-%d %H:%M:%S").to_string()
        };
        prop_assert_eq!(format_updated(&raw), date.format("%Y-%m-%d").to_string());
    }
}
