//! Lenient semantic version parsing and precedence.
//!
//! Tags published by the release feed and strings printed by `leafpress --version`
//! are not always strict semver, so components that fail to parse count as zero.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use semver::{BuildMetadata, Prerelease};

/// Semver precedence over a leniently parsed version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(semver::Version);

impl Version {
    pub const ZERO: Self = Self(semver::Version::new(0, 0, 0));

    /// Parse `major.minor.patch[-prerelease]` with an optional leading `v`.
    /// Build metadata (`+...`) is ignored, and an invalid pre-release is dropped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let raw = raw.split('+').next().unwrap_or(raw);

        let (base, pre) = match raw.split_once('-') {
            Some((base, pre)) => (base, Prerelease::new(pre).unwrap_or(Prerelease::EMPTY)),
            None => (raw, Prerelease::EMPTY),
        };

        let mut numbers = base.split('.').map(|part| part.parse::<u64>().unwrap_or(0));
        Self(semver::Version {
            major: numbers.next().unwrap_or(0),
            minor: numbers.next().unwrap_or(0),
            patch: numbers.next().unwrap_or(0),
            pre,
            build: BuildMetadata::EMPTY,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Compare two version strings, returning -1, 0 or 1.
pub fn compare_versions(a: &str, b: &str) -> i32 {
    match Version::parse(a).cmp(&Version::parse(b)) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Pull the first version-looking token out of free-form `--version` output.
pub fn extract_version(output: &str) -> Option<Version> {
    static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION_RE
        .get_or_init(|| Regex::new(r"v?(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z.-]+))?").ok())
        .as_ref()?;
    re.find(output).map(|m| Version::parse(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_rules() {
        assert!(compare_versions("1.0.0", "1.0.1") < 0);
        assert!(compare_versions("1.0.0-alpha", "1.0.0") < 0);
        assert!(compare_versions("1.0.0-alpha.1", "1.0.0-alpha.2") < 0);
        assert!(compare_versions("1.0.0-alpha", "1.0.0-alpha.1") < 0);
        assert!(compare_versions("2.0.0", "1.9.9") > 0);
        assert_eq!(compare_versions("v1.2.3", "1.2.3"), 0);
    }

    #[test]
    fn semver_spec_ordering_chain() {
        let chain = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
        ];
        for pair in chain.windows(2) {
            assert_eq!(compare_versions(pair[0], pair[1]), -1, "{pair:?}");
            assert_eq!(compare_versions(pair[1], pair[0]), 1, "{pair:?}");
        }
    }

    #[test]
    fn lenient_components_default_to_zero() {
        assert_eq!(Version::parse("garbage"), Version::ZERO);
        assert_eq!(Version::parse("1.x.3").to_string(), "1.0.3");
        assert_eq!(Version::parse("2").to_string(), "2.0.0");
        assert_eq!(compare_versions("1.2.3+build.5", "1.2.3"), 0);
        assert!(!Version::parse("1.0.0-alpha..1").is_prerelease());
        assert!(Version::parse("v1.0.0-rc.1").is_prerelease());
    }

    #[test]
    fn numeric_compare_is_not_lexical() {
        assert!(compare_versions("1.10.0", "1.9.0") > 0);
    }

    #[test]
    fn extracts_version_from_cli_output() {
        assert_eq!(
            extract_version("leafpress version v0.4.2\n").unwrap().to_string(),
            "0.4.2"
        );
        assert_eq!(
            extract_version("leafpress 1.0.0-rc.1 (abc123)").unwrap().to_string(),
            "1.0.0-rc.1"
        );
        assert!(extract_version("unknown").is_none());
    }
}
