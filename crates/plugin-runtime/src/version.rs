//! Semantic version parsing and comparison, and the range grammar used to
//! declare dependency constraints (`4.1` in the component design).
//!
//! Deliberately hand-rolled rather than built on the `semver` crate: this
//! runtime's prerelease-matching rule (a range with no prerelease in its
//! lower bound still matches prerelease versions of the same core) and its
//! tolerance for short forms (`1`, `1.2`) diverge from `semver`'s defaults.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

impl Version {
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    #[must_use]
    pub fn with_prerelease(major: u64, minor: u64, patch: u64, prerelease: &str) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Some(prerelease.to_string()),
        }
    }

    /// `current >= min`, tolerant of differing segment counts. A blank or
    /// absent `min` is always satisfied.
    #[must_use]
    pub fn is_compatible_with_min(&self, min: Option<&Version>) -> bool {
        match min {
            None => true,
            Some(min) => self >= min,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // Absence of a prerelease sorts higher than presence.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }

        let (core, prerelease) = match raw.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            _ => (raw, None),
        };

        let mut parts = core.split('.');
        let major = parse_segment(parts.next(), raw)?;
        let minor = match parts.next() {
            Some(s) => parse_segment(Some(s), raw)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(s) => parse_segment(Some(s), raw)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(VersionError::Malformed(raw.to_string()));
        }

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

fn parse_segment(segment: Option<&str>, whole: &str) -> Result<u64, VersionError> {
    let segment = segment.ok_or_else(|| VersionError::Malformed(whole.to_string()))?;
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::Malformed(whole.to_string()));
    }
    segment
        .parse::<u64>()
        .map_err(|_| VersionError::Malformed(whole.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,
    #[error("invalid version: {0}")]
    Malformed(String),
}

impl VersionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty | Self::Malformed(_) => "PLUGIN_VERSION_INVALID",
        }
    }
}

/// A dependency version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    Exact(Version),
    Caret(Version),
    Tilde(Version),
    Comparators(Vec<Comparator>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: ComparatorOp,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorOp {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
}

impl Range {
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Range::Exact(v) => version.major == v.major && version.minor == v.minor && version.patch == v.patch,
            Range::Caret(v) => {
                let (lo, hi) = caret_bounds(v);
                version_core_ge(version, &lo) && version_core_lt(version, &hi)
            }
            Range::Tilde(v) => {
                let hi = Version::new(v.major, v.minor + 1, 0);
                version_core_ge(version, v) && version_core_lt(version, &hi)
            }
            Range::Comparators(cmps) => cmps.iter().all(|c| comparator_matches(c, version)),
        }
    }
}

/// Compares core components only (major.minor.patch), ignoring prerelease,
/// so that a range with no prerelease in its bound still matches
/// prereleases of the same core (per the component design's stated rule).
fn version_core_ge(v: &Version, bound: &Version) -> bool {
    (v.major, v.minor, v.patch) >= (bound.major, bound.minor, bound.patch)
}

fn version_core_lt(v: &Version, bound: &Version) -> bool {
    (v.major, v.minor, v.patch) < (bound.major, bound.minor, bound.patch)
}

fn caret_bounds(v: &Version) -> (Version, Version) {
    let hi = if v.major >= 1 {
        Version::new(v.major + 1, 0, 0)
    } else {
        Version::new(0, v.minor + 1, 0)
    };
    (v.clone(), hi)
}

fn comparator_matches(c: &Comparator, version: &Version) -> bool {
    let core_cmp = (version.major, version.minor, version.patch).cmp(&(
        c.version.major,
        c.version.minor,
        c.version.patch,
    ));
    match c.op {
        ComparatorOp::Eq => core_cmp == Ordering::Equal,
        ComparatorOp::Ge => core_cmp != Ordering::Less,
        ComparatorOp::Gt => core_cmp == Ordering::Greater,
        ComparatorOp::Le => core_cmp != Ordering::Greater,
        ComparatorOp::Lt => core_cmp == Ordering::Less,
    }
}

impl FromStr for Range {
    type Err = RangeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RangeError::Empty);
        }
        if let Some(rest) = trimmed.strip_prefix('^') {
            return Ok(Range::Caret(
                rest.trim()
                    .parse()
                    .map_err(|e| RangeError::InvalidVersion(rest.to_string(), e))?,
            ));
        }
        if let Some(rest) = trimmed.strip_prefix('~') {
            return Ok(Range::Tilde(
                rest.trim()
                    .parse()
                    .map_err(|e| RangeError::InvalidVersion(rest.to_string(), e))?,
            ));
        }
        if trimmed
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
        {
            return Ok(Range::Exact(
                trimmed
                    .parse()
                    .map_err(|e| RangeError::InvalidVersion(trimmed.to_string(), e))?,
            ));
        }

        let mut comparators = Vec::new();
        for token in trimmed.split_whitespace() {
            comparators.push(parse_comparator(token)?);
        }
        if comparators.is_empty() {
            return Err(RangeError::Malformed(trimmed.to_string()));
        }
        Ok(Range::Comparators(comparators))
    }
}

fn parse_comparator(token: &str) -> Result<Comparator, RangeError> {
    let (op, rest) = if let Some(r) = token.strip_prefix(">=") {
        (ComparatorOp::Ge, r)
    } else if let Some(r) = token.strip_prefix("<=") {
        (ComparatorOp::Le, r)
    } else if let Some(r) = token.strip_prefix('>') {
        (ComparatorOp::Gt, r)
    } else if let Some(r) = token.strip_prefix('<') {
        (ComparatorOp::Lt, r)
    } else if let Some(r) = token.strip_prefix('=') {
        (ComparatorOp::Eq, r)
    } else {
        return Err(RangeError::Malformed(token.to_string()));
    };
    let version = rest
        .parse()
        .map_err(|e| RangeError::InvalidVersion(rest.to_string(), e))?;
    Ok(Comparator { op, version })
}

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("range string is empty")]
    Empty,
    #[error("invalid range: {0}")]
    Malformed(String),
    #[error("invalid version {0} in range: {1}")]
    InvalidVersion(String, #[source] VersionError),
}

impl RangeError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        "PLUGIN_VERSION_INVALID_RANGE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_forms_with_zero_padding() {
        assert_eq!("1".parse::<Version>().unwrap(), Version::new(1, 0, 0));
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0));
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn parses_prerelease() {
        let v: Version = "1.2.3-beta.1".parse().unwrap();
        assert_eq!(v.prerelease.as_deref(), Some("beta.1"));
    }

    #[test]
    fn rejects_malformed() {
        assert!("1.x.3".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
    }

    #[test]
    fn ordering_places_release_above_prerelease() {
        let release = Version::new(1, 0, 0);
        let pre = Version::with_prerelease(1, 0, 0, "rc.1");
        assert!(release > pre);
    }

    #[test]
    fn caret_matches_same_major() {
        let range: Range = "^1.0.0".parse().unwrap();
        assert!(range.matches(&"1.2.3".parse().unwrap()));
        assert!(!range.matches(&"2.0.0".parse().unwrap()));
    }

    #[test]
    fn caret_zero_major_is_minor_locked() {
        let range: Range = "^0.1.0".parse().unwrap();
        assert!(range.matches(&"0.1.9".parse().unwrap()));
        assert!(!range.matches(&"0.2.0".parse().unwrap()));
    }

    #[test]
    fn tilde_locks_minor() {
        let range: Range = "~1.2.0".parse().unwrap();
        assert!(range.matches(&"1.2.9".parse().unwrap()));
        assert!(!range.matches(&"1.3.0".parse().unwrap()));
    }

    #[test]
    fn comparator_list_is_conjunctive() {
        let range: Range = ">=1.0.0 <2.0.0".parse().unwrap();
        assert!(range.matches(&"1.5.0".parse().unwrap()));
        assert!(!range.matches(&"2.0.0".parse().unwrap()));
        assert!(!range.matches(&"0.9.0".parse().unwrap()));
    }

    #[test]
    fn range_without_prerelease_bound_still_matches_prerelease_of_same_core() {
        let range: Range = "^1.0.0".parse().unwrap();
        let prerelease = Version::with_prerelease(1, 0, 0, "rc.1");
        assert!(range.matches(&prerelease));
    }

    #[test]
    fn exact_range_requires_same_core() {
        let range: Range = "1.2.3".parse().unwrap();
        assert!(range.matches(&"1.2.3".parse().unwrap()));
        assert!(!range.matches(&"1.2.4".parse().unwrap()));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let v = Version::new(2, 5, 1);
        let s = v.to_string();
        assert_eq!(s.parse::<Version>().unwrap(), v);
    }
}
