//! Semantic version parsing.

use crate::error::{BackupError, BackupResult};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::str::FromStr;

/// A `MAJOR.MINOR.PATCH[-pre][+build]` version.
///
/// Ordering and equality follow semver precedence, so build metadata is
/// ignored by both.
#[derive(Debug, Clone)]
pub struct Version(semver::Version);

impl Version {
    /// Creates a release version.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parses a version string. A leading `v` is accepted.
    pub fn parse(input: &str) -> BackupResult<Self> {
        let s = input.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        semver::Version::parse(s)
            .map(Self)
            .map_err(|_| BackupError::InvalidVersion(input.to_string()))
    }

    /// Returns true for pre-1.0 versions.
    #[must_use]
    pub fn is_pre_1_0(&self) -> bool {
        self.0.major == 0
    }

    /// Returns true if a pre-release tag is present.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }
}

impl Deref for Version {
    type Target = semver::Version;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Version {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.major, self.0.minor, self.0.patch).hash(state);
        self.0.pre.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_precedence(&other.0)
    }
}
