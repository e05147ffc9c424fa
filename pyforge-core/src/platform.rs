//! Host platform detection
//!
//! Maps the running OS/architecture onto the target triple used in
//! release asset names, and checks minimum OS prerequisites.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ForgeError, Result};

/// Target triples for which standalone builds are published
pub const SUPPORTED_TRIPLES: &[&str] = &[
    "x86_64-unknown-linux-gnu",
    "aarch64-unknown-linux-gnu",
    "x86_64-apple-darwin",
    "aarch64-apple-darwin",
    "x86_64-pc-windows-msvc",
    "aarch64-pc-windows-msvc",
];

/// Oldest macOS release the published builds target
const MIN_MACOS: (u32, u32) = (10, 13);

/// Oldest Linux kernel the gnu builds support
const MIN_LINUX_KERNEL: (u32, u32) = (3, 2);

/// A detected platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// OS: "linux", "macos", "windows"
    pub os: String,
    /// Architecture: "x86_64", "aarch64"
    pub arch: String,
    /// Asset filter, e.g. "x86_64-unknown-linux-gnu"
    pub target_triple: String,
}

impl std::fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.os, self.arch, self.target_triple)
    }
}

/// Platform collaborator used by the acquisition pipeline
pub trait PlatformProbe: Send + Sync {
    /// Identify the platform, failing if no builds exist for it
    fn detect(&self) -> Result<PlatformInfo>;

    /// Check OS version prerequisites
    fn validate_minimum_os_version(&self) -> Result<()>;
}

/// The platform this process runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl PlatformProbe for HostPlatform {
    fn detect(&self) -> Result<PlatformInfo> {
        platform_for(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn validate_minimum_os_version(&self) -> Result<()> {
        match std::env::consts::OS {
            "linux" => {
                let release = std::fs::read_to_string("/proc/sys/kernel/osrelease")
                    .unwrap_or_default();
                check_minimum("linux", &release, MIN_LINUX_KERNEL)
            }
            "macos" => {
                let plist = std::fs::read_to_string(Path::new(
                    "/System/Library/CoreServices/SystemVersion.plist",
                ))
                .unwrap_or_default();
                let version = macos_product_version(&plist).unwrap_or_default();
                check_minimum("macos", &version, MIN_MACOS)
            }
            _ => Ok(()),
        }
    }
}

/// Resolve the target triple for an OS/architecture pair
pub fn platform_for(os: &str, arch: &str) -> Result<PlatformInfo> {
    let triple = match (os, arch) {
        ("linux", "x86_64") => "x86_64-unknown-linux-gnu",
        ("linux", "aarch64") => "aarch64-unknown-linux-gnu",
        ("macos", "x86_64") => "x86_64-apple-darwin",
        ("macos", "aarch64") => "aarch64-apple-darwin",
        ("windows", "x86_64") => "x86_64-pc-windows-msvc",
        ("windows", "aarch64") => "aarch64-pc-windows-msvc",
        _ => {
            return Err(unsupported(
                os,
                arch,
                "no standalone builds are published for this platform",
            ));
        }
    };

    Ok(PlatformInfo {
        os: os.to_string(),
        arch: arch.to_string(),
        target_triple: triple.to_string(),
    })
}

pub(crate) fn unsupported(os: &str, arch: &str, reason: impl Into<String>) -> ForgeError {
    ForgeError::PlatformUnsupported {
        os: os.to_string(),
        arch: arch.to_string(),
        reason: reason.into(),
        supported: SUPPORTED_TRIPLES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Compare the leading `major.minor` of `version` against `minimum`
///
/// An unreadable version is accepted: the check only rejects hosts it can
/// positively identify as too old.
fn check_minimum(os: &str, version: &str, minimum: (u32, u32)) -> Result<()> {
    static LEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\.(\d+)").unwrap());

    let Some(caps) = LEADING.captures(version) else {
        tracing::debug!("Could not determine {} version from {:?}", os, version);
        return Ok(());
    };
    let major: u32 = caps[1].parse().unwrap_or(0);
    let minor: u32 = caps[2].parse().unwrap_or(0);

    if (major, minor) < minimum {
        return Err(unsupported(
            os,
            std::env::consts::ARCH,
            format!(
                "OS version {major}.{minor} is older than the required {}.{}",
                minimum.0, minimum.1
            ),
        ));
    }
    Ok(())
}

fn macos_product_version(plist: &str) -> Option<String> {
    static PRODUCT_VERSION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"<key>ProductVersion</key>\s*<string>([^<]+)</string>").unwrap()
    });
    PRODUCT_VERSION
        .captures(plist)
        .map(|caps| caps[1].trim().to_string())
}
