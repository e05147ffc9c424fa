//! Version specifications and exact interpreter versions
//!
//! A [`VersionSpec`] is what the user asks for: either `major.minor`
//! (partial, any patch) or `major.minor.patch` (exact). An [`ExactVersion`]
//! is what an asset or installed instance actually is.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ForgeError, Result};

/// A requested version, exact or partial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    pub major: u32,
    pub minor: u32,
    /// `None` marks a partial spec
    pub patch: Option<u32>,
}

/// A fully specified `major.minor.patch` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionSpec {
    /// Parse a spec such as `3.12` or `3.12.5`
    ///
    /// Components past the third are a build/variant suffix and carry no
    /// numeric meaning; they are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();

        if trimmed.is_empty() || parts.len() < 2 {
            return Err(ForgeError::version_format(
                text,
                "at least major and minor components are required",
            ));
        }

        let major = parse_component(text, parts[0], "major")?;
        let minor = parse_component(text, parts[1], "minor")?;
        let patch = match parts.get(2) {
            Some(raw) => Some(parse_component(text, raw, "patch")?),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    pub fn is_partial(&self) -> bool {
        self.patch.is_none()
    }

    /// Canonical `X.Y.Z` form, with `0` standing in for a missing patch
    pub fn normalize(&self) -> String {
        self.to_exact().to_string()
    }

    /// The exact version this spec denotes once normalized
    pub fn to_exact(&self) -> ExactVersion {
        ExactVersion {
            major: self.major,
            minor: self.minor,
            patch: self.patch.unwrap_or(0),
        }
    }

    /// Whether `candidate` satisfies this spec
    ///
    /// Exact specs require full equality; partial specs only compare
    /// major and minor.
    pub fn matches(&self, candidate: &ExactVersion) -> bool {
        if self.major != candidate.major || self.minor != candidate.minor {
            return false;
        }
        match self.patch {
            Some(patch) => patch == candidate.patch,
            None => true,
        }
    }
}

/// Numeric comparison on `(major, minor, patch)`, missing patch as `0`
pub fn compare(a: &VersionSpec, b: &VersionSpec) -> Ordering {
    a.to_exact().cmp(&b.to_exact())
}

fn parse_component(input: &str, raw: &str, label: &str) -> Result<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ForgeError::version_format(
            input,
            format!("{label} component '{raw}' is not a non-negative integer"),
        ));
    }
    raw.parse::<u32>().map_err(|_| {
        ForgeError::version_format(input, format!("{label} component '{raw}' is out of range"))
    })
}

impl ExactVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a strict `X.Y.Z` string
    pub fn parse(text: &str) -> Result<Self> {
        let spec = VersionSpec::parse(text)?;
        match spec.patch {
            Some(_) => Ok(spec.to_exact()),
            None => Err(ForgeError::version_format(
                text,
                "an exact version needs a patch component",
            )),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromStr for ExactVersion {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl fmt::Display for ExactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for ExactVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExactVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ExactVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}
