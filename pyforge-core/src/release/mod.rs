//! Remote releases and their downloadable assets
//!
//! A release is tagged by build date (e.g. `20240726`) and carries one
//! asset per interpreter version, platform and archive flavor, all encoded
//! in the asset file name:
//!
//! ```text
//! cpython-3.12.5+20240726-x86_64-unknown-linux-gnu-install_only.tar.gz
//!         └─────┘ └──────┘ └──────────────────────┘ └──────────┘
//!         version  build    target triple            archive kind
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::archive::is_extractable;
use crate::error::Result;
use crate::version::ExactVersion;

#[cfg(feature = "github")]
pub mod github;
pub mod locator;

pub use locator::{LocatedAsset, ReleaseLocator};

/// Build flavors that are never installed
const EXCLUDED_VARIANTS: &[&str] = &["debug", "freethreaded", "noopt"];

/// A published release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release tag, usually the build date
    pub tag: String,

    /// When the release was published
    pub published_at: DateTime<Utc>,

    /// Downloadable artifacts
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// One downloadable artifact of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// File name, which encodes version, platform and kind
    pub name: String,

    /// Where the asset can be fetched from
    pub download_url: String,

    /// Size in bytes, when known
    #[serde(default)]
    pub size: Option<u64>,

    /// Content digest (`sha256:<hex>`), when published
    #[serde(default)]
    pub digest: Option<String>,
}

/// Archive flavor of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArchiveKind {
    /// Minimal, relocatable runtime layout
    InstallOnly,
    /// Complete build tree including build artifacts
    Full,
}

/// One page of a release listing
#[derive(Debug, Clone, Default)]
pub struct ReleasePage {
    pub releases: Vec<Release>,
    /// Token for the following page, `None` when drained
    pub next_page: Option<String>,
}

/// Remote release collaborator
///
/// Implementations own the wire protocol; callers wrap each call in the
/// configured retry policy.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// List releases, newest first, one page at a time
    async fn list_releases(&self, page: Option<String>) -> Result<ReleasePage>;

    /// Fetch a single release by tag
    async fn get_release_by_tag(&self, tag: &str) -> Result<Release>;

    /// Download `asset` into `dest_dir`, returning the local file path
    async fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf>;

    /// Source identifier for logging
    fn name(&self) -> &str;
}

/// Extract the build date encoded in a release tag
///
/// Accepts an 8-digit `YYYYMMDD` run or an ISO `YYYY-MM-DD` date anywhere in
/// the tag.
pub fn build_date_from_tag(tag: &str) -> Option<NaiveDate> {
    static ISO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap());
    static COMPACT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})(?:\D|$)").unwrap());

    [&*COMPACT, &*ISO].into_iter().find_map(|re| {
        re.captures_iter(tag).find_map(|caps| {
            let year = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            let day = caps[3].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
    })
}

impl Release {
    /// Build date parsed from the tag, if the tag carries one
    pub fn build_date(&self) -> Option<NaiveDate> {
        build_date_from_tag(&self.tag)
    }

    /// Build date, falling back to today when the tag has none
    pub fn build_date_or_today(&self) -> NaiveDate {
        self.build_date().unwrap_or_else(|| {
            tracing::debug!(
                "Release tag '{}' has no build date; using acquisition date",
                self.tag
            );
            Utc::now().date_naive()
        })
    }
}

impl Asset {
    /// Interpreter version encoded in the name
    ///
    /// Pre-release names (`3.13.0rc1`) do not yield a version.
    pub fn version(&self) -> Option<ExactVersion> {
        static VERSION: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"-(\d+)\.(\d+)\.(\d+)[+-]").unwrap());

        let caps = VERSION.captures(&self.name)?;
        Some(ExactVersion::new(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        ))
    }

    pub fn archive_kind(&self) -> ArchiveKind {
        if self.name.contains("install_only") {
            ArchiveKind::InstallOnly
        } else {
            ArchiveKind::Full
        }
    }

    /// Stripped install-only archives drop debug symbols
    pub fn is_stripped(&self) -> bool {
        self.name.contains("stripped")
    }

    pub fn matches_triple(&self, target_triple: &str) -> bool {
        self.name.contains(target_triple)
    }

    /// Whether the asset is an interpreter archive this crate can install
    ///
    /// Formats the extractor cannot unpack (`.tar.zst`, `.zip`) are never
    /// candidates, so they are not downloaded only to fail.
    pub fn is_installable(&self) -> bool {
        let excluded = EXCLUDED_VARIANTS.iter().any(|v| self.name.contains(v));
        is_extractable(&self.name) && !excluded && self.version().is_some()
    }
}
