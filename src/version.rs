//! Schema versioning utilities
//!
//! A snapshot may carry the semantic version it is released under. The
//! checker turns its change set into the smallest bump that honestly
//! describes it and checks the declared candidate version against that.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic version of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion {
    pub version: Version,
}

impl SchemaVersion {
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    /// Create from a version string
    pub fn parse(version_str: &str) -> Result<Self, semver::Error> {
        // Strip leading 'v' if present
        let version_str = version_str.strip_prefix('v').unwrap_or(version_str);
        Ok(Self::new(Version::parse(version_str)?))
    }

    /// Get the version string (e.g., "1.2.3")
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }

    /// The bump that leads from `previous` to `self`
    pub fn bump_from(&self, previous: &SchemaVersion) -> VersionBump {
        let (old, new) = (&previous.version, &self.version);
        if new <= old {
            VersionBump::None
        } else if new.major > old.major {
            VersionBump::Major
        } else if new.minor > old.minor {
            VersionBump::Minor
        } else {
            VersionBump::Patch
        }
    }

    /// Apply a bump
    pub fn bumped(&self, bump: VersionBump) -> Self {
        let v = &self.version;
        let version = match bump {
            VersionBump::None => v.clone(),
            VersionBump::Patch => Version::new(v.major, v.minor, v.patch + 1),
            VersionBump::Minor => Version::new(v.major, v.minor + 1, 0),
            VersionBump::Major => Version::new(v.major + 1, 0, 0),
        };
        Self::new(version)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

/// Size of a semantic version step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
    None,
    Patch,
    Minor,
    Major,
}

impl VersionBump {
    /// Smallest bump for a change set
    pub fn required(has_breaking: bool, has_additions: bool, has_changes: bool) -> Self {
        if has_breaking {
            VersionBump::Major
        } else if has_additions {
            VersionBump::Minor
        } else if has_changes {
            VersionBump::Patch
        } else {
            VersionBump::None
        }
    }

    /// Under 0.x any minor step may break
    pub fn satisfies(self, required: VersionBump, previous: &SchemaVersion) -> bool {
        if previous.version.major == 0 && required == VersionBump::Major {
            return self >= VersionBump::Minor;
        }
        self >= required
    }
}

impl fmt::Display for VersionBump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionBump::None => write!(f, "none"),
            VersionBump::Patch => write!(f, "patch"),
            VersionBump::Minor => write!(f, "minor"),
            VersionBump::Major => write!(f, "major"),
        }
    }
}

/// Declared versus required bump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheck {
    pub base: SchemaVersion,
    pub candidate: SchemaVersion,
    pub declared: VersionBump,
    pub required: VersionBump,
    pub satisfied: bool,
}

impl VersionCheck {
    pub fn new(base: &SchemaVersion, candidate: &SchemaVersion, required: VersionBump) -> Self {
        let declared = candidate.bump_from(base);
        Self {
            base: base.clone(),
            candidate: candidate.clone(),
            declared,
            required,
            satisfied: declared.satisfies(required, base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_with_v_prefix() {
        let v = SchemaVersion::parse("v1.2.3").unwrap();
        assert_eq!(v.version_string(), "1.2.3");
        assert_eq!(v.to_string(), "v1.2.3");
    }

    #[test]
    fn test_bump_detection() {
        let base = SchemaVersion::parse("1.2.3").unwrap();
        assert_eq!(base.bumped(VersionBump::Major).bump_from(&base), VersionBump::Major);
        assert_eq!(base.bumped(VersionBump::Minor).version_string(), "1.3.0");
        assert_eq!(base.bumped(VersionBump::Patch).bump_from(&base), VersionBump::Patch);
        assert_eq!(base.bump_from(&base), VersionBump::None);
    }

    #[test]
    fn test_breaking_change_needs_major() {
        let base = SchemaVersion::parse("1.4.0").unwrap();
        let candidate = SchemaVersion::parse("1.5.0").unwrap();
        let check = VersionCheck::new(&base, &candidate, VersionBump::Major);
        assert!(!check.satisfied);

        let pre_release_base = SchemaVersion::parse("0.4.0").unwrap();
        let check = VersionCheck::new(&pre_release_base, &SchemaVersion::parse("0.5.0").unwrap(), VersionBump::Major);
        assert!(check.satisfied);
    }
}
