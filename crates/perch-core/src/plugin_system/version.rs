use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

/// Error type for version parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Invalid version format: '{0}'")]
    InvalidFormat(String),
    #[error("Version parse error: {0}")]
    ParseError(String),
}

/// A plugin version as written in its manifest.
///
/// Manifests in the wild carry versions like `"1.2"` or `"v2"`, so parsing is
/// lenient: a leading `v` is dropped and missing minor/patch components are
/// filled with zero before handing the string to `semver`. The original text
/// is kept for display.
#[derive(Debug, Clone)]
pub struct PluginVersion {
    raw: String,
    version: Version,
}

impl PluginVersion {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err(VersionError::InvalidFormat(input.to_string()));
        }

        let split_at = body.find(['-', '+']).unwrap_or(body.len());
        let (core, suffix) = body.split_at(split_at);
        let mut parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(VersionError::InvalidFormat(input.to_string()));
        }
        while parts.len() < 3 {
            parts.push("0");
        }

        let normalized = format!("{}{}", parts.join("."), suffix);
        let version = Version::parse(&normalized)
            .map_err(|e| VersionError::ParseError(format!("'{}': {}", input, e)))?;
        Ok(Self {
            raw: trimmed.to_string(),
            version,
        })
    }

    pub fn as_semver(&self) -> &Version {
        &self.version
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Semver precedence; build metadata is ignored.
    pub fn cmp_precedence(&self, other: &PluginVersion) -> Ordering {
        self.version.cmp_precedence(&other.version)
    }

    pub fn is_newer_than(&self, other: &PluginVersion) -> bool {
        self.cmp_precedence(other) == Ordering::Greater
    }
}

impl FromStr for PluginVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginVersion::parse(s)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    req: VersionReq,
}

impl VersionRange {
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let req = VersionReq::parse(constraint).map_err(|e| {
            VersionError::ParseError(format!("Invalid version constraint '{}': {}", constraint, e))
        })?;
        Ok(Self {
            constraint: constraint.to_string(),
            req,
        })
    }

    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}

/// The contract version this host implements.
pub fn host_api_version() -> Version {
    Version::parse(crate::kernel::constants::API_VERSION).unwrap_or_else(|_| Version::new(1, 0, 0))
}
