//! Release and asset selection
//!
//! Two release policies:
//! - no minimum build date: the most recently published release
//! - minimum build date: the *earliest* release built on or after it,
//!   scanning every page in ascending chronological order
//!
//! Within a release the asset must match the target triple and version
//! spec; the highest patch wins, then install-only over full archives.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;

use super::{ArchiveKind, Asset, Release, ReleasePage, ReleaseSource};
use crate::error::{ForgeError, Result};
use crate::platform::PlatformInfo;
use crate::retry::RetryPolicy;
use crate::version::{ExactVersion, VersionSpec};

/// The asset chosen for an acquisition
#[derive(Debug, Clone)]
pub struct LocatedAsset {
    /// Tag of the release the asset belongs to
    pub release_tag: String,
    /// Build date of that release
    pub build_date: NaiveDate,
    /// Exact interpreter version of the asset
    pub version: ExactVersion,
    pub asset: Asset,
}

/// Selects the single best installable asset for a request
pub struct ReleaseLocator<'a> {
    source: &'a dyn ReleaseSource,
    retry: &'a RetryPolicy,
}

impl<'a> ReleaseLocator<'a> {
    pub fn new(source: &'a dyn ReleaseSource, retry: &'a RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Locate the asset for `spec` on `platform`
    pub async fn locate(
        &self,
        spec: &VersionSpec,
        min_build_date: Option<NaiveDate>,
        platform: &PlatformInfo,
    ) -> Result<LocatedAsset> {
        let triple = platform.target_triple.as_str();

        let located = match min_build_date {
            Some(min) => self.locate_earliest_on_or_after(spec, min, triple).await?,
            None => self.locate_in_latest(spec, triple).await?,
        };

        match located {
            Some(found) => {
                tracing::info!(
                    asset = %found.asset.name,
                    release = %found.release_tag,
                    "Located Python {} built {}",
                    found.version,
                    found.build_date
                );
                Ok(found)
            }
            None => Err(ForgeError::AssetNotFound {
                spec: spec.to_string(),
                min_build_date,
                target_triple: triple.to_string(),
            }),
        }
    }

    async fn locate_in_latest(
        &self,
        spec: &VersionSpec,
        triple: &str,
    ) -> Result<Option<LocatedAsset>> {
        let page = self.fetch_page(None).await?;
        let Some(latest) = page.releases.iter().max_by_key(|r| r.published_at) else {
            tracing::debug!("Release source '{}' returned no releases", self.source.name());
            return Ok(None);
        };

        tracing::debug!("Latest release is '{}'", latest.tag);
        Ok(select_asset(latest, spec, triple)
            .map(|(version, asset)| located(latest, version, asset)))
    }

    async fn locate_earliest_on_or_after(
        &self,
        spec: &VersionSpec,
        min: NaiveDate,
        triple: &str,
    ) -> Result<Option<LocatedAsset>> {
        // A release tagged with the minimum date itself is the earliest candidate
        let tag = min.format("%Y%m%d").to_string();
        match self
            .retry
            .run("release lookup", || self.source.get_release_by_tag(&tag))
            .await
        {
            Ok(release) if release.build_date() == Some(min) => {
                if let Some((version, asset)) = select_asset(&release, spec, triple) {
                    return Ok(Some(located(&release, version, asset)));
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("No release tagged '{}': {}", tag, e),
        }

        let mut releases = self.all_releases().await?;
        releases.sort_by_key(|r| r.published_at);

        for release in &releases {
            if release.build_date_or_today() < min {
                continue;
            }
            match select_asset(release, spec, triple) {
                Some((version, asset)) => return Ok(Some(located(release, version, asset))),
                None => {
                    tracing::debug!(
                        "Release '{}' qualifies by date but has no asset for {} on {}",
                        release.tag,
                        spec,
                        triple
                    );
                }
            }
        }

        Ok(None)
    }

    async fn fetch_page(&self, page: Option<String>) -> Result<ReleasePage> {
        self.retry
            .run("release listing", || self.source.list_releases(page.clone()))
            .await
    }

    /// Drain every page of the release listing
    async fn all_releases(&self) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token = None;

        loop {
            let page = self.fetch_page(token.clone()).await?;
            releases.extend(page.releases);

            match page.next_page {
                Some(next) if seen_tokens.insert(next.clone()) => token = Some(next),
                Some(next) => {
                    tracing::warn!("Release source repeated page token '{}'; stopping", next);
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(
            "Fetched {} releases from '{}'",
            releases.len(),
            self.source.name()
        );
        Ok(releases)
    }
}

fn located(release: &Release, version: ExactVersion, asset: &Asset) -> LocatedAsset {
    LocatedAsset {
        release_tag: release.tag.clone(),
        build_date: release.build_date_or_today(),
        version,
        asset: asset.clone(),
    }
}

/// Pick the best asset of `release` for `spec` on `triple`
pub fn select_asset<'r>(
    release: &'r Release,
    spec: &VersionSpec,
    triple: &str,
) -> Option<(ExactVersion, &'r Asset)> {
    release
        .assets
        .iter()
        .filter(|a| a.is_installable() && a.matches_triple(triple))
        .filter_map(|a| a.version().map(|v| (v, a)))
        .filter(|(v, _)| spec.matches(v))
        .max_by(|(va, a), (vb, b)| rank(va, a, vb, b))
}

/// Ordering where "greater" is preferred
fn rank(va: &ExactVersion, a: &Asset, vb: &ExactVersion, b: &Asset) -> Ordering {
    va.cmp(vb)
        .then_with(|| kind_preference(a.archive_kind()).cmp(&kind_preference(b.archive_kind())))
        .then_with(|| b.is_stripped().cmp(&a.is_stripped()))
        .then_with(|| b.name.cmp(&a.name))
}

fn kind_preference(kind: ArchiveKind) -> u8 {
    match kind {
        ArchiveKind::InstallOnly => 1,
        ArchiveKind::Full => 0,
    }
}
