//! Acquisition pipeline
//!
//! Turns a version request into a verified, registered instance:
//!
//! ```text
//! Idle → PlatformValidated → AssetLocated → Downloaded → Extracted → Verified → Registered
//! ```
//!
//! Any failure or cancellation before `Registered` removes every directory
//! and temporary file the call created. The smoke test between `Verified`
//! and `Registered` is advisory and never fails an acquisition.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{
    find_installation_root, verify_digest, ArchiveExtractor, TarballExtractor, MAX_ROOT_DEPTH,
};
use crate::catalog::{instance_dir_name, InstanceCatalog, InstanceRecord, InstanceRepository};
use crate::error::{ForgeError, Result};
use crate::platform::{self, HostPlatform, PlatformInfo, PlatformProbe};
use crate::release::{Asset, ReleaseLocator, ReleaseSource};
use crate::retry::RetryPolicy;
use crate::smoke::{InterpreterSmokeTest, SmokeOutcome, SmokeTest};
use crate::version::VersionSpec;

/// Pipeline states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AcquisitionState {
    Idle,
    PlatformValidated,
    AssetLocated,
    Downloaded,
    Extracted,
    Verified,
    Registered,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::PlatformValidated => "platform-validated",
            AcquisitionState::AssetLocated => "asset-located",
            AcquisitionState::Downloaded => "downloaded",
            AcquisitionState::Extracted => "extracted",
            AcquisitionState::Verified => "verified",
            AcquisitionState::Registered => "registered",
        };
        f.write_str(name)
    }
}

/// What to acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub version: VersionSpec,
    /// Earliest acceptable build date; `None` asks for the newest release
    pub min_build_date: Option<NaiveDate>,
}

impl AcquisitionRequest {
    pub fn new(version: VersionSpec, min_build_date: Option<NaiveDate>) -> Self {
        Self {
            version,
            min_build_date,
        }
    }

    pub fn parse(version: &str, min_build_date: Option<NaiveDate>) -> Result<Self> {
        Ok(Self::new(VersionSpec::parse(version)?, min_build_date))
    }
}

/// Anything able to produce registered instances
#[async_trait]
pub trait InstanceAcquirer: Send + Sync {
    /// Download, install and register an instance for `request`
    async fn acquire(
        &self,
        catalog: &mut InstanceCatalog,
        request: &AcquisitionRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord>;

    /// Return a catalogued instance for `version`, acquiring one on a miss
    async fn ensure(
        &self,
        catalog: &mut InstanceCatalog,
        version: &str,
        min_build_date: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        let request = AcquisitionRequest::parse(version, min_build_date)?;
        if let Some(record) = catalog.find_spec(&request.version, request.min_build_date) {
            debug!(
                "Python {} ({}) already installed",
                record.python_version, record.build_date
            );
            return Ok(record.clone());
        }
        self.acquire(catalog, &request, cancel).await
    }
}

/// Default pipeline wiring remote, archive, process and platform collaborators
pub struct AcquisitionPipeline {
    platform: Arc<dyn PlatformProbe>,
    source: Arc<dyn ReleaseSource>,
    extractor: Arc<dyn ArchiveExtractor>,
    smoke: Arc<dyn SmokeTest>,
    runtime_name: String,
    retry: RetryPolicy,
    smoke_timeout: Duration,
}

impl AcquisitionPipeline {
    /// Pipeline over `source` with host defaults for everything else
    pub fn new(source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            platform: Arc::new(HostPlatform),
            source,
            extractor: Arc::new(TarballExtractor),
            smoke: Arc::new(InterpreterSmokeTest),
            runtime_name: "python".to_string(),
            retry: RetryPolicy::default(),
            smoke_timeout: Duration::from_secs(10),
        }
    }

    /// Pipeline backed by the configured GitHub repository
    #[cfg(feature = "github")]
    pub fn from_config(config: &crate::config::ForgeConfig) -> Result<Self> {
        let source = crate::release::github::GitHubReleaseSource::new(
            &config.release_repository,
            config.github_token(),
            config.request_timeout(),
        )?;
        Ok(Self::new(Arc::new(source))
            .with_runtime_name(&config.runtime_name)
            .with_retry(config.retry.clone())
            .with_smoke_timeout(config.smoke_timeout()))
    }

    pub fn with_platform(mut self, platform: Arc<dyn PlatformProbe>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_smoke_test(mut self, smoke: Arc<dyn SmokeTest>) -> Self {
        self.smoke = smoke;
        self
    }

    pub fn with_runtime_name(mut self, runtime_name: &str) -> Self {
        self.runtime_name = runtime_name.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_smoke_timeout(mut self, timeout: Duration) -> Self {
        self.smoke_timeout = timeout;
        self
    }

    fn validate_platform(&self) -> Result<PlatformInfo> {
        let info = self.platform.detect().map_err(|e| match e {
            e @ ForgeError::PlatformUnsupported { .. } => e,
            other => platform::unsupported(
                std::env::consts::OS,
                std::env::consts::ARCH,
                other.to_string(),
            ),
        })?;

        self.platform
            .validate_minimum_os_version()
            .map_err(|e| match e {
                e @ ForgeError::PlatformUnsupported { .. } => e,
                other => platform::unsupported(&info.os, &info.arch, other.to_string()),
            })?;

        Ok(info)
    }

    /// Download into `dir`, checking the published size and digest when known
    ///
    /// A short or corrupted file is a transient failure so the next attempt
    /// fetches the archive again.
    async fn download(&self, asset: &Asset, dir: &Path) -> Result<PathBuf> {
        let path = self.source.download_asset(asset, dir).await?;

        if let Some(expected) = asset.size {
            let actual = tokio::fs::metadata(&path).await?.len();
            if actual != expected {
                return Err(ForgeError::Network {
                    url: asset.download_url.clone(),
                    reason: format!("incomplete download: got {actual} of {expected} bytes"),
                    retryable: true,
                });
            }
        }

        if let Some(digest) = asset.digest.clone() {
            let file = path.clone();
            tokio::task::spawn_blocking(move || verify_digest(&file, &digest))
                .await
                .map_err(|e| anyhow::anyhow!("Digest task failed: {e}"))??;
            debug!("Digest verified for {}", asset.name);
        }
        Ok(path)
    }

    /// Extract into an empty `instance_dir`, discarding any partial attempt
    async fn extract_fresh(&self, archive: &Path, instance_dir: &Path) -> Result<()> {
        if instance_dir.exists() {
            tokio::fs::remove_dir_all(instance_dir).await?;
        }
        tokio::fs::create_dir_all(instance_dir).await?;
        self.extractor.extract(archive, instance_dir).await
    }

    /// One download-then-extract attempt
    ///
    /// Each attempt downloads into its own temporary directory, removed when
    /// the attempt ends. `downloaded` is raised once the archive is on disk.
    async fn fetch_and_extract(
        &self,
        asset: &Asset,
        instance_dir: &Path,
        downloaded: &AtomicBool,
    ) -> Result<()> {
        downloaded.store(false, Ordering::SeqCst);
        let download_dir = tempfile::Builder::new()
            .prefix("pyforge-download-")
            .tempdir()?;

        let archive = self.download(asset, download_dir.path()).await?;
        downloaded.store(true, Ordering::SeqCst);
        debug!("Downloaded {} to {:?}", asset.name, archive);

        self.extract_fresh(&archive, instance_dir).await
    }

    async fn run(
        &self,
        catalog: &mut InstanceCatalog,
        request: &AcquisitionRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        let mut state = AcquisitionState::Idle;
        info!(
            version = %request.version,
            min_build_date = ?request.min_build_date,
            "Acquiring Python {}",
            request.version
        );
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled { stage: state });
        }

        let platform = self.validate_platform()?;
        advance(&mut state, AcquisitionState::PlatformValidated);

        let locator = ReleaseLocator::new(self.source.as_ref(), &self.retry);
        let located = cancellable(
            cancel,
            || state,
            locator.locate(&request.version, request.min_build_date, &platform),
        )
        .await?;
        advance(&mut state, AcquisitionState::AssetLocated);

        let was_latest_build = request.min_build_date.is_none();
        if let Some(existing) = catalog.get_mut_by_identity((located.version, located.build_date)) {
            info!(
                "Python {} ({}) is already installed at {:?}",
                existing.python_version,
                existing.build_date,
                existing.directory()
            );
            if was_latest_build && !existing.was_latest_build {
                existing.was_latest_build = true;
                existing.save()?;
            }
            return Ok(existing.clone());
        }

        let instance_dir = catalog.root().join(instance_dir_name(
            &self.runtime_name,
            &located.version,
            located.build_date,
        ));
        if instance_dir.exists() {
            warn!("Removing stale instance directory {:?}", instance_dir);
            tokio::fs::remove_dir_all(&instance_dir).await?;
        }

        let mut guard = InstallGuard::default();
        guard.track(instance_dir.clone());

        let downloaded = AtomicBool::new(false);
        cancellable(
            cancel,
            || {
                if downloaded.load(Ordering::SeqCst) {
                    AcquisitionState::Downloaded
                } else {
                    state
                }
            },
            self.retry.run("download and extraction", || {
                self.fetch_and_extract(&located.asset, &instance_dir, &downloaded)
            }),
        )
        .await?;
        advance(&mut state, AcquisitionState::Downloaded);
        advance(&mut state, AcquisitionState::Extracted);

        let root = find_installation_root(self.extractor.as_ref(), &instance_dir).ok_or_else(
            || ForgeError::ExtractionVerification {
                path: instance_dir.clone(),
                reason: format!(
                    "no interpreter found within {} levels of the archive root",
                    MAX_ROOT_DEPTH
                ),
            },
        )?;
        if root != instance_dir {
            let staging = staging_path(&instance_dir);
            guard.track(staging.clone());
            let target = instance_dir.clone();
            tokio::task::spawn_blocking(move || flatten(&root, &target, &staging))
                .await
                .map_err(|e| anyhow::anyhow!("Flatten task failed: {e}"))??;
        }
        if !self.extractor.verify_layout(&instance_dir) {
            return Err(ForgeError::ExtractionVerification {
                path: instance_dir,
                reason: "interpreter layout missing after flattening".to_string(),
            });
        }
        advance(&mut state, AcquisitionState::Verified);

        match cancellable(cancel, || state, self.smoke.run(&instance_dir, self.smoke_timeout)).await
        {
            Ok(SmokeOutcome::Passed { reported }) => debug!("Smoke test passed: {}", reported),
            Ok(SmokeOutcome::Failed { detail }) => {
                warn!("Smoke test failed for {:?}: {}", instance_dir, detail)
            }
            Err(e @ ForgeError::Cancelled { .. }) => return Err(e),
            Err(e) => warn!("Smoke test could not run for {:?}: {}", instance_dir, e),
        }

        let record = InstanceRecord::new(
            located.version,
            located.build_date,
            was_latest_build,
            instance_dir,
        );
        record.save()?;
        guard.commit();
        catalog.add(record.clone());
        advance(&mut state, AcquisitionState::Registered);

        info!(
            "Installed Python {} ({}) at {:?}",
            record.python_version,
            record.build_date,
            record.directory()
        );
        Ok(record)
    }
}

#[async_trait]
impl InstanceAcquirer for AcquisitionPipeline {
    async fn acquire(
        &self,
        catalog: &mut InstanceCatalog,
        request: &AcquisitionRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        self.run(catalog, request, cancel).await
    }
}

fn advance(state: &mut AcquisitionState, next: AcquisitionState) {
    debug!(from = %state, to = %next, "acquisition state");
    *state = next;
}

/// Race `operation` against cancellation
///
/// `stage` is read when cancellation wins, reporting the last state reached.
async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: impl FnOnce() -> AcquisitionState,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let stage = stage();
            info!("Acquisition cancelled after {}", stage);
            Err(ForgeError::Cancelled { stage })
        }
        result = operation => result,
    }
}

/// Removes tracked paths on drop unless committed
#[derive(Debug, Default)]
struct InstallGuard {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl InstallGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if path.exists() {
                match std::fs::remove_dir_all(path) {
                    Ok(()) => debug!("Cleaned up {:?}", path),
                    Err(e) => warn!("Failed to clean up {:?}: {}", path, e),
                }
            }
        }
    }
}

fn staging_path(instance_dir: &Path) -> PathBuf {
    let mut name = instance_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".payload");
    instance_dir.with_file_name(name)
}

/// Make `root` (nested inside `instance_dir`) the instance directory itself
fn flatten(root: &Path, instance_dir: &Path, staging: &Path) -> Result<()> {
    debug!("Flattening {:?} into {:?}", root, instance_dir);
    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::rename(root, staging)?;
    std::fs::remove_dir_all(instance_dir)?;
    std::fs::rename(staging, instance_dir)?;
    Ok(())
}
