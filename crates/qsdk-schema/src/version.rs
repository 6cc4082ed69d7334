//! Qt version triples and version range specifiers.
//!
//! Versions are semantic triples with optional pre-release tags, backed by
//! [`semver::Version`] so ordering follows semver rules (a pre-release sorts
//! below the release it precedes). The repository additionally encodes
//! versions into folder names without separators (`5152` for 5.15.2); the
//! codec for that form lives here too.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing versions or version specifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string is not a valid version triple.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// The string is not a recognized version specifier.
    #[error("invalid version specifier '{0}'")]
    InvalidSpec(String),

    /// A folder-encoded version could not be decoded.
    #[error("invalid folder version code '{0}'")]
    InvalidFolderCode(String),
}

/// A Qt release version: a semantic triple with optional pre-release tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(semver::Version);

impl Version {
    /// Build a release version from its triple.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Major component.
    pub fn major(&self) -> u64 {
        self.0.major
    }

    /// Minor component.
    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    /// Patch component.
    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// Whether this version carries a pre-release tag.
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Encode into the separator-free form used in repository folder names:
    /// 5.15.2 becomes `5152`, 6.8.0 becomes `680`.
    pub fn folder_code(&self) -> String {
        format!("{}{}{}", self.0.major, self.0.minor, self.0.patch)
    }

    /// Decode a folder code back into a version.
    ///
    /// The first digit is the major, the trailing digits the patch, the middle
    /// the minor. Codes of five or more digits read a two-digit minor so that
    /// double-digit patch levels (`51510` = 5.15.10) decode correctly.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidFolderCode`] for empty or non-numeric
    /// input.
    pub fn from_folder_code(code: &str) -> Result<Self, VersionError> {
        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::InvalidFolderCode(code.to_string()));
        }
        let digits: Vec<char> = code.chars().collect();
        let major = u64::from(digits[0] as u8 - b'0');
        let (minor, patch) = match digits.len() {
            1 => (0, 0),
            2 => (u64::from(digits[1] as u8 - b'0'), 0),
            3 | 4 => {
                let minor: String = digits[1..digits.len() - 1].iter().collect();
                let patch = u64::from(digits[digits.len() - 1] as u8 - b'0');
                (parse_component(&minor, code)?, patch)
            }
            _ => {
                let minor: String = digits[1..3].iter().collect();
                let patch: String = digits[3..].iter().collect();
                (parse_component(&minor, code)?, parse_component(&patch, code)?)
            }
        };
        Ok(Self::new(major, minor, patch))
    }
}

fn parse_component(s: &str, code: &str) -> Result<u64, VersionError> {
    s.parse()
        .map_err(|_| VersionError::InvalidFolderCode(code.to_string()))
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept two-segment versions ("6.8") by padding the patch.
        let candidate = if s.bytes().filter(|b| *b == b'.').count() == 1
            && s.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        {
            format!("{s}.0")
        } else {
            s.to_string()
        };
        semver::Version::parse(&candidate)
            .map(Self)
            .map_err(|_| VersionError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A version range predicate.
///
/// Accepted spellings:
/// - `"5.15.2"` -- exact match
/// - `"5.12"` / `"6"` -- prefix match (any 5.12.x / any 6.x.y)
/// - `">=6.2, <6.5"`, `"^6.2"`, `"~5.15"` -- semver requirement
/// - `"*"` -- any version
/// - `"latest"` -- sentinel for the highest available version
#[derive(Debug, Clone, PartialEq)]
pub enum VersionSpec {
    /// Exactly this version.
    Exact(Version),
    /// Match on leading numeric segments.
    Prefix(Vec<u64>),
    /// A semver requirement (comparison operators, `^`, `~`, ranges).
    Req(semver::VersionReq),
    /// Any version at all.
    Any,
    /// The highest available version.
    Latest,
}

impl VersionSpec {
    /// Parse a specifier string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidSpec`] when none of the accepted
    /// spellings apply.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        match s {
            "" => return Err(VersionError::InvalidSpec(s.to_string())),
            "*" => return Ok(Self::Any),
            "latest" => return Ok(Self::Latest),
            _ => {}
        }

        if s.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            let segments: Vec<&str> = s.split('.').collect();
            if segments.iter().any(|seg| seg.is_empty()) {
                return Err(VersionError::InvalidSpec(s.to_string()));
            }
            if segments.len() >= 3 {
                return s.parse().map(Self::Exact);
            }
            let parsed: Result<Vec<u64>, _> = segments.iter().map(|seg| seg.parse()).collect();
            return parsed
                .map(Self::Prefix)
                .map_err(|_| VersionError::InvalidSpec(s.to_string()));
        }

        semver::VersionReq::parse(s)
            .map(Self::Req)
            .map_err(|_| VersionError::InvalidSpec(s.to_string()))
    }

    /// Whether `version` satisfies this specifier.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Prefix(segments) => {
                let triple = [version.major(), version.minor(), version.patch()];
                segments
                    .iter()
                    .zip(triple.iter())
                    .all(|(want, have)| want == have)
            }
            Self::Req(req) => req.matches(&version.0),
            Self::Any | Self::Latest => true,
        }
    }

    /// Pick the highest version satisfying this specifier.
    pub fn select_highest<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.matches(v)).max()
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Prefix(segments) => {
                let parts: Vec<String> = segments.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join("."))
            }
            Self::Req(req) => write!(f, "{req}"),
            Self::Any => write!(f, "*"),
            Self::Latest => write!(f, "latest"),
        }
    }
}
