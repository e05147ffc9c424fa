//! Error types with clear, actionable messages
//!
//! Every user-facing failure carries the context needed to act on it
//! (requested version, build date, target triple) so callers never have to
//! re-derive it.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::pipeline::AcquisitionState;

/// Errors raised by version resolution, acquisition and the catalog
#[derive(Error, Debug)]
pub enum ForgeError {
    /// A version specification could not be parsed
    #[error("Invalid version specification '{input}': {reason}\n\nExpected 'major.minor' (e.g. 3.12) or 'major.minor.patch' (e.g. 3.12.5)")]
    VersionFormat { input: String, reason: String },

    /// The host cannot run the managed interpreter builds
    #[error("Unsupported platform {os}/{arch}: {reason}\n\nSupported target triples:\n  {}", .supported.join("\n  "))]
    PlatformUnsupported {
        os: String,
        arch: String,
        reason: String,
        supported: Vec<String>,
    },

    /// No release asset satisfies the requested spec, date and platform
    #[error("No release asset found for Python {spec} (minimum build date: {}, target: {target_triple})\n\nCheck that the version exists for this platform, or relax the build date.", display_date(.min_build_date))]
    AssetNotFound {
        spec: String,
        min_build_date: Option<NaiveDate>,
        target_triple: String,
    },

    /// The extracted archive did not produce the expected interpreter layout
    #[error("Extraction verification failed for {path}: {reason}")]
    ExtractionVerification { path: PathBuf, reason: String },

    /// An instance record document could not be read or parsed
    #[error("Instance metadata at {path} is corrupt or unreadable: {reason}")]
    MetadataCorrupt { path: PathBuf, reason: String },

    /// Environment creation collided with an entry pointing elsewhere
    #[error("Virtual environment '{name}' already exists at {}\n\nRequested location: {}\n\nDelete the existing environment first or pick another name.", .existing.display(), .requested.display())]
    VirtualEnvironmentConflict {
        name: String,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// No environment with that name is registered on the instance
    #[error("Virtual environment '{name}' not found for Python {version}")]
    VirtualEnvironmentNotFound { name: String, version: String },

    /// Environment names become directory names
    #[error("Invalid virtual environment name '{name}': {reason}")]
    InvalidEnvironmentName { name: String, reason: String },

    /// A remote call failed
    #[error("Network request to {url} failed: {reason}")]
    Network {
        url: String,
        reason: String,
        retryable: bool,
    },

    /// The acquisition was cancelled by the caller
    #[error("Acquisition cancelled during {stage:?}")]
    Cancelled { stage: AcquisitionState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    /// Whether the failure may succeed on another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            ForgeError::Network { retryable, .. } => *retryable,
            ForgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub(crate) fn version_format(input: &str, reason: impl Into<String>) -> Self {
        ForgeError::VersionFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

fn display_date(date: &Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => "latest".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_not_found_message_carries_context() {
        let err = ForgeError::AssetNotFound {
            spec: "3.10".to_string(),
            min_build_date: NaiveDate::from_ymd_opt(2024, 1, 20),
            target_triple: "x86_64-unknown-linux-gnu".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3.10"));
        assert!(msg.contains("2024-01-20"));
        assert!(msg.contains("x86_64-unknown-linux-gnu"));
    }

    #[test]
    fn test_platform_unsupported_lists_supported_triples() {
        let err = ForgeError::PlatformUnsupported {
            os: "freebsd".to_string(),
            arch: "x86_64".to_string(),
            reason: "no builds published".to_string(),
            supported: vec![
                "x86_64-unknown-linux-gnu".to_string(),
                "aarch64-apple-darwin".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("freebsd/x86_64"));
        assert!(msg.contains("aarch64-apple-darwin"));
    }

    #[test]
    fn test_transient_classification() {
        let network = ForgeError::Network {
            url: "https://example.com".to_string(),
            reason: "HTTP 503".to_string(),
            retryable: true,
        };
        assert!(network.is_transient());

        let not_found = ForgeError::Network {
            url: "https://example.com".to_string(),
            reason: "HTTP 404".to_string(),
            retryable: false,
        };
        assert!(!not_found.is_transient());

        let format = ForgeError::version_format("3", "too few components");
        assert!(!format.is_transient());

        // A truncated stream is a property of the file, not of the attempt
        let eof = ForgeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "incomplete deflate stream",
        ));
        assert!(!eof.is_transient());
    }
}
