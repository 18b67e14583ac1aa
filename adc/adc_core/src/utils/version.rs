//! Version utilities.
//!
//! [`Version`] is a semantic version. [`VersionReq`] is the requirement
//! grammar manifests use to pick an installed module version:
//!
//! | requirement | matches |
//! |---|---|
//! | `1.2.3`, `=1.2.3` | exactly 1.2.3 |
//! | `1.2`, `1.2.x` | any 1.2.* |
//! | `^1.2.3` | `>=1.2.3, <2.0.0` (`^0.2.3` → `<0.3.0`) |
//! | `~1.2.3` | `>=1.2.3, <1.3.0` |
//! | `>=1.0, <2` | comma-separated conjunction |
//! | `*`, empty | anything |

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Error parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError {
    /// The invalid version string.
    pub version: String,

    /// The reason for the error.
    pub reason: String,
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid version '{}': {}", self.version, self.reason)
    }
}

impl std::error::Error for VersionParseError {}

/// A semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Create a new version with no prerelease or build metadata.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    pub fn with_prerelease(mut self, prerelease: impl Into<String>) -> Self {
        self.prerelease = Some(prerelease.into());
        self
    }

    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Semver precedence. Build metadata is ignored.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.triple().cmp(&other.triple()) {
            Ordering::Equal => {}
            ordering => return ordering,
        }

        match (&self.prerelease, &other.prerelease) {
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => Ordering::Equal,
            (Some(a), Some(b)) => compare_prerelease(a, b),
        }
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();

    for (a_part, b_part) in a_parts.iter().zip(b_parts.iter()) {
        // Numeric identifiers always have lower precedence than alphanumeric ones
        let ordering = match (a_part.parse::<u64>(), b_part.parse::<u64>()) {
            (Ok(a_num), Ok(b_num)) => a_num.cmp(&b_num),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a_part.cmp(b_part),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a_parts.len().cmp(&b_parts.len())
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;

        if let Some(prerelease) = &self.prerelease {
            write!(f, "-{}", prerelease)?;
        }

        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }

        Ok(())
    }
}

fn valid_identifiers(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason: &str| VersionParseError {
            version: s.to_string(),
            reason: reason.to_string(),
        };

        let (version_and_prerelease, build) = match s.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (s, None),
        };
        let (version, prerelease) = match version_and_prerelease.split_once('-') {
            Some((head, pre)) => (head, Some(pre.to_string())),
            None => (version_and_prerelease, None),
        };

        let numbers: Vec<&str> = version.split('.').collect();
        if numbers.len() != 3 {
            return Err(error("Expected major.minor.patch"));
        }
        let component = |part: &str, label: &str| {
            part.parse::<u32>()
                .map_err(|_| error(&format!("Invalid {} version", label)))
        };
        let major = component(numbers[0], "major")?;
        let minor = component(numbers[1], "minor")?;
        let patch = component(numbers[2], "patch")?;

        if let Some(prerelease) = &prerelease {
            if !valid_identifiers(prerelease) {
                return Err(error("Invalid prerelease identifier"));
            }
        }
        if let Some(build) = &build {
            if !valid_identifiers(build) {
                return Err(error("Invalid build metadata"));
            }
        }

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Tilde,
    Caret,
}

/// One comparator of a requirement, e.g. `^1.2` or `<2.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    major: u32,
    minor: Option<u32>,
    patch: Option<u32>,
    prerelease: Option<String>,
}

/// Inclusive/exclusive bound.
struct Bound {
    version: Version,
    inclusive: bool,
}

impl Comparator {
    fn floor(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
            build: None,
        }
    }

    fn is_full(&self) -> bool {
        self.minor.is_some() && self.patch.is_some()
    }

    /// Exclusive ceiling for a partial version: `1` → `2.0.0`, `1.2` → `1.3.0`.
    fn partial_ceiling(&self) -> Version {
        match self.minor {
            Some(minor) if self.patch.is_none() => Version::new(self.major, minor + 1, 0),
            Some(minor) => Version::new(self.major, minor, self.patch.unwrap_or(0) + 1),
            None => Version::new(self.major + 1, 0, 0),
        }
    }

    fn bounds(&self) -> (Option<Bound>, Option<Bound>) {
        let incl = |version| Some(Bound { version, inclusive: true });
        let excl = |version| Some(Bound { version, inclusive: false });

        match self.op {
            Op::Exact if self.is_full() => (incl(self.floor()), incl(self.floor())),
            Op::Exact => (incl(self.floor()), excl(self.partial_ceiling())),
            Op::Greater if self.is_full() => (excl(self.floor()), None),
            Op::Greater => (incl(self.partial_ceiling()), None),
            Op::GreaterEq => (incl(self.floor()), None),
            Op::Less => (None, excl(self.floor())),
            Op::LessEq if self.is_full() => (None, incl(self.floor())),
            Op::LessEq => (None, excl(self.partial_ceiling())),
            Op::Tilde => {
                let ceiling = match self.minor {
                    Some(minor) => Version::new(self.major, minor + 1, 0),
                    None => Version::new(self.major + 1, 0, 0),
                };
                (incl(self.floor()), excl(ceiling))
            }
            Op::Caret => {
                let ceiling = match (self.major, self.minor, self.patch) {
                    (0, None, _) => Version::new(1, 0, 0),
                    (0, Some(0), None) => Version::new(0, 1, 0),
                    (0, Some(0), Some(patch)) => Version::new(0, 0, patch + 1),
                    (0, Some(minor), _) => Version::new(0, minor + 1, 0),
                    (major, _, _) => Version::new(major + 1, 0, 0),
                };
                (incl(self.floor()), excl(ceiling))
            }
        }
    }

    fn matches(&self, version: &Version) -> bool {
        let (lower, upper) = self.bounds();
        let above = lower.map_or(true, |b| match version.cmp(&b.version) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        });
        let below = upper.map_or(true, |b| match version.cmp(&b.version) {
            Ordering::Less => true,
            Ordering::Equal => b.inclusive,
            Ordering::Greater => false,
        });
        above && below
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = [
            (">=", Op::GreaterEq),
            ("<=", Op::LessEq),
            (">", Op::Greater),
            ("<", Op::Less),
            ("=", Op::Exact),
            ("^", Op::Caret),
            ("~", Op::Tilde),
        ]
        .into_iter()
        .find_map(|(prefix, op)| s.strip_prefix(prefix).map(|rest| (op, rest.trim())))
        .unwrap_or((Op::Exact, s));

        let rest = rest.strip_prefix('v').unwrap_or(rest);
        let (numbers, prerelease) = match rest.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre.to_string())),
            None => (rest, None),
        };
        if let Some(pre) = &prerelease {
            if !valid_identifiers(pre) {
                return Err(format!("invalid prerelease in '{}'", s));
            }
        }

        let mut parts = [None; 3];
        let mut wildcard = false;
        let pieces: Vec<&str> = numbers.split('.').collect();
        if pieces.is_empty() || pieces.len() > 3 {
            return Err(format!("expected at most major.minor.patch in '{}'", s));
        }
        for (slot, piece) in parts.iter_mut().zip(&pieces) {
            if matches!(*piece, "x" | "X" | "*") {
                wildcard = true;
                continue;
            }
            if wildcard {
                return Err(format!("number after wildcard in '{}'", s));
            }
            *slot = Some(
                piece
                    .parse::<u32>()
                    .map_err(|_| format!("invalid number '{}' in '{}'", piece, s))?,
            );
        }

        let major = parts[0].ok_or_else(|| format!("missing major version in '{}'", s))?;
        let comparator = Comparator {
            op,
            major,
            minor: parts[1],
            patch: parts[2],
            prerelease,
        };
        if comparator.prerelease.is_some() && !comparator.is_full() {
            return Err(format!("prerelease requires a full version in '{}'", s));
        }
        Ok(comparator)
    }
}

/// A version requirement: a conjunction of comparators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReq {
    raw: String,
    comparators: Vec<Comparator>,
}

impl VersionReq {
    /// The requirement matching every release.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            comparators: Vec::new(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }

    /// Whether `version` satisfies every comparator.
    ///
    /// Prereleases only match when some comparator names a prerelease of the
    /// same `major.minor.patch`.
    pub fn matches(&self, version: &Version) -> bool {
        if version.is_prerelease() {
            let allowed = self.comparators.iter().any(|c| {
                c.prerelease.is_some() && c.floor().triple() == version.triple()
            });
            if !allowed {
                return false;
            }
        }
        self.comparators.iter().all(|c| c.matches(version))
    }

    /// Highest version in `candidates` that satisfies this requirement.
    pub fn best_match<'a>(&self, candidates: impl IntoIterator<Item = &'a Version>) -> Option<&'a Version> {
        candidates.into_iter().filter(|v| self.matches(v)).max()
    }
}

impl FromStr for VersionReq {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || matches!(trimmed, "*" | "x" | "X" | "latest") {
            return Ok(Self {
                raw: trimmed.to_string(),
                comparators: Vec::new(),
            });
        }

        let comparators = trimmed
            .split(',')
            .map(str::parse::<Comparator>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            comparators,
        })
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl Default for VersionReq {
    fn default() -> Self {
        Self::any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    fn req(s: &str) -> VersionReq {
        VersionReq::from_str(s).unwrap()
    }

    #[test]
    fn test_version_parsing() {
        let version = v("1.2.3-alpha.1+build.456");
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 2);
        assert_eq!(version.patch, 3);
        assert_eq!(version.prerelease, Some("alpha.1".to_string()));
        assert_eq!(version.build, Some("build.456".to_string()));
        assert_eq!(version.to_string(), "1.2.3-alpha.1+build.456");

        assert!(Version::from_str("").is_err());
        assert!(Version::from_str("1.2").is_err());
        assert!(Version::from_str("1.2.3.4").is_err());
        assert!(Version::from_str("a.b.c").is_err());
        assert!(Version::from_str("1.2.3-").is_err());
        assert!(Version::from_str("1.2.3+").is_err());
    }

    #[test]
    fn test_version_comparison() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.2.3") < v("1.3.0"));
        assert!(v("1.9.9") < v("2.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.11"));
        assert_eq!(v("1.0.0+a").cmp(&v("1.0.0+b")), Ordering::Equal);
    }

    #[test]
    fn test_exact_and_partial() {
        assert!(req("1.2.3").matches(&v("1.2.3")));
        assert!(!req("1.2.3").matches(&v("1.2.4")));
        assert!(req("=1.2.3").matches(&v("1.2.3")));
        assert!(req("1.2").matches(&v("1.2.9")));
        assert!(!req("1.2").matches(&v("1.3.0")));
        assert!(req("1.x").matches(&v("1.7.0")));
        assert!(!req("1.x").matches(&v("2.0.0")));
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(req("^1.2.3").matches(&v("1.9.0")));
        assert!(!req("^1.2.3").matches(&v("2.0.0")));
        assert!(!req("^1.2.3").matches(&v("1.2.2")));
        assert!(req("^0.2.3").matches(&v("0.2.9")));
        assert!(!req("^0.2.3").matches(&v("0.3.0")));
        assert!(req("^0.0.3").matches(&v("0.0.3")));
        assert!(!req("^0.0.3").matches(&v("0.0.4")));

        assert!(req("~1.2.3").matches(&v("1.2.9")));
        assert!(!req("~1.2.3").matches(&v("1.3.0")));
        assert!(req("~1").matches(&v("1.9.9")));
    }

    #[test]
    fn test_ranges() {
        let range = req(">=1.0, <2");
        assert!(range.matches(&v("1.0.0")));
        assert!(range.matches(&v("1.99.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("0.9.0")));

        assert!(req(">1.2").matches(&v("1.3.0")));
        assert!(!req(">1.2").matches(&v("1.2.5")));
        assert!(req("<=1.2").matches(&v("1.2.5")));
        assert!(!req("<=1.2").matches(&v("1.3.0")));
    }

    #[test]
    fn test_prerelease_needs_opt_in() {
        assert!(!req("*").matches(&v("2.0.0-beta.1")));
        assert!(!req("^1.0.0").matches(&v("1.5.0-rc.1")));
        assert!(req(">=2.0.0-beta.1").matches(&v("2.0.0-beta.2")));
    }

    #[test]
    fn test_best_match_picks_highest() {
        let installed = vec![v("1.0.0"), v("1.4.2"), v("2.0.0"), v("1.5.0-rc.1")];
        assert_eq!(req("^1.0").best_match(&installed), Some(&installed[1]));
        assert_eq!(VersionReq::any().best_match(&installed), Some(&installed[2]));
        assert_eq!(req("^3").best_match(&installed), None);
    }

    #[test]
    fn test_invalid_requirements() {
        assert!(VersionReq::from_str("one.two").is_err());
        assert!(VersionReq::from_str("1.x.3").is_err());
        assert!(VersionReq::from_str("^1.2-beta").is_err());
        assert_eq!(req("").to_string(), "*");
    }
}
