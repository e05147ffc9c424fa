//! Shared fixtures for integration tests
//!
//! Fake remote, platform and process collaborators plus a tarball builder
//! producing archives shaped like published standalone builds.

// Each test binary uses a different subset
#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use pyforge_core::platform::platform_for;
use pyforge_core::release::ReleasePage;
use pyforge_core::smoke::{SmokeOutcome, SmokeTest};
use pyforge_core::{
    AcquisitionPipeline, Asset, ForgeError, PlatformInfo, PlatformProbe, Release, ReleaseSource,
    Result, RetryPolicy,
};

pub const TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Lay out an interpreter installation under `root`
pub fn write_interpreter_layout(root: &Path) -> std::io::Result<()> {
    let (exe, stdlib) = if cfg!(windows) {
        (root.join("python.exe"), root.join("Lib"))
    } else {
        (root.join("bin").join("python3"), root.join("lib"))
    };
    std::fs::create_dir_all(exe.parent().unwrap_or(root))?;
    std::fs::write(&exe, b"#!/bin/sh\necho 'Python fake'\n")?;
    std::fs::create_dir_all(stdlib.join("python3"))?;
    std::fs::write(stdlib.join("python3").join("os.py"), b"# stdlib\n")?;
    Ok(())
}

/// Write `dest/name` as a gzip tarball with the payload under `prefix`
///
/// With `with_interpreter` unset the payload holds only a README, which
/// fails layout verification.
pub fn build_tarball(
    dest: &Path,
    name: &str,
    prefix: &str,
    with_interpreter: bool,
) -> std::io::Result<PathBuf> {
    let staging = tempfile::TempDir::new()?;
    let payload = staging.path().join("payload");
    std::fs::create_dir_all(&payload)?;
    if with_interpreter {
        write_interpreter_layout(&payload)?;
    } else {
        std::fs::write(payload.join("README"), b"not an interpreter\n")?;
    }

    let path = dest.join(name);
    let encoder = GzEncoder::new(File::create(&path)?, Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(prefix, &payload)?;
    builder.into_inner()?.finish()?;
    Ok(path)
}

pub fn install_only_asset(version: &str, tag: &str) -> Asset {
    let name = format!("cpython-{version}+{tag}-{TRIPLE}-install_only.tar.gz");
    Asset {
        download_url: format!("https://example.invalid/{tag}/{name}"),
        name,
        size: None,
        digest: None,
    }
}

/// A release published at noon on `day`, carrying install-only assets
pub fn release(tag: &str, day: (i32, u32, u32), versions: &[&str]) -> Release {
    Release {
        tag: tag.to_string(),
        published_at: Utc
            .with_ymd_and_hms(day.0, day.1, day.2, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
        assets: versions
            .iter()
            .map(|v| install_only_asset(v, tag))
            .collect(),
    }
}

/// In-memory release source serving generated tarballs
pub struct FakeSource {
    releases: Vec<Release>,
    pub payload_prefix: String,
    pub with_interpreter: bool,
    pub download_delay: Option<Duration>,
    archive_bytes: Option<Vec<u8>>,
    transient_failures: AtomicUsize,
    truncated_downloads: AtomicUsize,
    pub downloads: AtomicUsize,
    pub download_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeSource {
    pub fn new(releases: Vec<Release>) -> Self {
        let mut releases = releases;
        releases.sort_by_key(|r| std::cmp::Reverse(r.published_at));
        Self {
            releases,
            payload_prefix: "python".to_string(),
            with_interpreter: true,
            download_delay: None,
            archive_bytes: None,
            transient_failures: AtomicUsize::new(0),
            truncated_downloads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            download_dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.payload_prefix = prefix.to_string();
        self
    }

    pub fn without_interpreter(mut self) -> Self {
        self.with_interpreter = false;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    /// Fail the next `count` downloads with a retryable error
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Serve exactly `bytes` for every asset instead of a fresh tarball
    pub fn with_archive_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.archive_bytes = Some(bytes);
        self
    }

    /// Cut the next `count` downloads off halfway, as a dropped connection would
    pub fn with_truncated_downloads(self, count: usize) -> Self {
        self.truncated_downloads.store(count, Ordering::SeqCst);
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn list_releases(&self, page: Option<String>) -> Result<ReleasePage> {
        // Single page source
        assert!(page.is_none(), "unexpected page token {page:?}");
        Ok(ReleasePage {
            releases: self.releases.clone(),
            next_page: None,
        })
    }

    async fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        self.releases
            .iter()
            .find(|r| r.tag == tag)
            .cloned()
            .ok_or_else(|| ForgeError::Network {
                url: format!("https://example.invalid/tags/{tag}"),
                reason: "HTTP 404 Not Found".to_string(),
                retryable: false,
            })
    }

    async fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.download_dirs
            .lock()
            .expect("download_dirs lock")
            .push(dest_dir.to_path_buf());

        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ForgeError::Network {
                url: asset.download_url.clone(),
                reason: "HTTP 503 Service Unavailable".to_string(),
                retryable: true,
            });
        }

        let path = match &self.archive_bytes {
            Some(bytes) => {
                let path = dest_dir.join(&asset.name);
                std::fs::write(&path, bytes)?;
                path
            }
            None => build_tarball(
                dest_dir,
                &asset.name,
                &self.payload_prefix,
                self.with_interpreter,
            )?,
        };

        let remaining = self.truncated_downloads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.truncated_downloads.store(remaining - 1, Ordering::SeqCst);
            let bytes = std::fs::read(&path)?;
            std::fs::write(&path, &bytes[..bytes.len() / 2])?;
        }
        Ok(path)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Platform probe with a fixed answer
pub struct FakePlatform {
    supported: bool,
}

impl FakePlatform {
    pub fn linux() -> Self {
        Self { supported: true }
    }

    pub fn unsupported() -> Self {
        Self { supported: false }
    }
}

impl PlatformProbe for FakePlatform {
    fn detect(&self) -> Result<PlatformInfo> {
        if self.supported {
            platform_for("linux", "x86_64")
        } else {
            platform_for("freebsd", "riscv64")
        }
    }

    fn validate_minimum_os_version(&self) -> Result<()> {
        Ok(())
    }
}

/// Smoke test returning a canned outcome
pub struct FakeSmoke {
    outcome: SmokeOutcome,
    pub runs: AtomicUsize,
}

impl FakeSmoke {
    pub fn passing() -> Self {
        Self {
            outcome: SmokeOutcome::Passed {
                reported: "Python fake".to_string(),
            },
            runs: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: SmokeOutcome::Failed {
                detail: "libpython3.so: cannot open shared object file".to_string(),
            },
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SmokeTest for FakeSmoke {
    async fn run(&self, install_root: &Path, _timeout: Duration) -> Result<SmokeOutcome> {
        assert!(install_root.exists(), "smoke test ran before extraction");
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        exponential_backoff: true,
        max_delay_ms: 5,
    }
}

/// Pipeline over fake collaborators
pub fn pipeline(source: Arc<FakeSource>, smoke: Arc<FakeSmoke>) -> AcquisitionPipeline {
    AcquisitionPipeline::new(source)
        .with_platform(Arc::new(FakePlatform::linux()))
        .with_smoke_test(smoke)
        .with_retry(fast_retry())
}
