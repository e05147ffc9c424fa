//! Archive extraction and interpreter layout checks
//!
//! Handles unpacking downloaded archives into an instance directory,
//! verifying their digest, and recognising a usable interpreter tree.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{ForgeError, Result};

/// How deep below the instance directory an installation root may sit
pub const MAX_ROOT_DEPTH: usize = 2;

/// Archive formats [`TarballExtractor`] can unpack
pub const EXTRACTABLE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz"];

/// Whether `name` has an extension [`TarballExtractor`] can unpack
pub fn is_extractable(name: &str) -> bool {
    EXTRACTABLE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Archive collaborator
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Unpack `archive` into `dest`
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Whether `dir` contains an interpreter installation
    fn verify_layout(&self, dir: &Path) -> bool;
}

/// Extracts gzip-compressed tarballs
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballExtractor;

#[async_trait]
impl ArchiveExtractor for TarballExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_extractable(&name) {
            return Err(ForgeError::ExtractionVerification {
                path: archive.to_path_buf(),
                reason: format!("unsupported archive format '{name}' (expected .tar.gz)"),
            });
        }

        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &dest))
            .await
            .map_err(|e| anyhow::anyhow!("Extraction task failed: {e}"))?
    }

    fn verify_layout(&self, dir: &Path) -> bool {
        has_interpreter_layout(dir)
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let gz_decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(gz_decoder);
    tar.set_preserve_permissions(true);

    std::fs::create_dir_all(dest)?;
    tar.unpack(dest)
        .map_err(|e| ForgeError::ExtractionVerification {
            path: archive.to_path_buf(),
            reason: format!("archive could not be unpacked: {e}"),
        })?;

    tracing::debug!("Extracted {:?} into {:?}", archive, dest);
    Ok(())
}

/// Path of the interpreter executable inside an installation root
pub fn interpreter_path(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("python.exe")
    } else {
        root.join("bin").join("python3")
    }
}

/// Standard library directory inside an installation root
fn stdlib_dir(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Lib")
    } else {
        root.join("lib")
    }
}

/// Interpreter executable plus standard library directory
pub fn has_interpreter_layout(dir: &Path) -> bool {
    interpreter_path(dir).is_file() && stdlib_dir(dir).is_dir()
}

/// Find the installation root at or below `instance_dir`
///
/// Some archives nest their payload (`python/`, `python/install/`), so the
/// instance directory is checked first, then each level of subdirectories
/// down to [`MAX_ROOT_DEPTH`].
pub fn find_installation_root(
    extractor: &dyn ArchiveExtractor,
    instance_dir: &Path,
) -> Option<PathBuf> {
    let mut level = vec![instance_dir.to_path_buf()];

    for depth in 0..=MAX_ROOT_DEPTH {
        let mut candidates: Vec<PathBuf> = level.clone();
        candidates.sort();
        if let Some(root) = candidates.iter().find(|d| extractor.verify_layout(d)) {
            tracing::debug!("Installation root found at depth {}: {:?}", depth, root);
            return Some(root.clone());
        }

        level = level
            .iter()
            .filter_map(|d| std::fs::read_dir(d).ok())
            .flat_map(|entries| entries.filter_map(|e| e.ok()))
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
    }

    None
}

/// Verify a `sha256:<hex>` (or bare hex) digest of a file
pub fn verify_digest(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let actual = hex::encode(hasher.finalize());
    let expected_hex = expected.strip_prefix("sha256:").unwrap_or(expected);

    if !actual.eq_ignore_ascii_case(expected_hex) {
        return Err(ForgeError::Network {
            url: path.display().to_string(),
            reason: format!(
                "Digest verification failed! Expected: sha256:{expected_hex} Actual: sha256:{actual}"
            ),
            retryable: true,
        });
    }

    Ok(())
}
