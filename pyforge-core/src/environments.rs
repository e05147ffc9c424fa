//! Named virtual environments derived from an instance
//!
//! The registry itself lives on [`InstanceRecord`]; this module adds the
//! creation and deletion workflows, which touch the filesystem and enforce a
//! stricter collision policy than the registry's plain overwrite.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::interpreter_path;
use crate::catalog::{EnvironmentRecord, InstanceRecord};
use crate::error::{ForgeError, Result};

/// Materialises an environment directory from an interpreter
#[async_trait]
pub trait EnvironmentBuilder: Send + Sync {
    async fn build(&self, interpreter: &Path, target: &Path) -> Result<()>;
}

/// Runs `<python> -m venv <target>`
#[derive(Debug, Clone, Copy, Default)]
pub struct VenvBuilder;

#[async_trait]
impl EnvironmentBuilder for VenvBuilder {
    async fn build(&self, interpreter: &Path, target: &Path) -> Result<()> {
        tracing::debug!("Running {:?} -m venv {:?}", interpreter, target);

        let output = tokio::process::Command::new(interpreter)
            .arg("-m")
            .arg("venv")
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "venv creation at {} failed ({}): {}",
                target.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }
        Ok(())
    }
}

/// Environment workflows over a single instance record
pub struct EnvironmentManager {
    builder: Arc<dyn EnvironmentBuilder>,
}

impl Default for EnvironmentManager {
    fn default() -> Self {
        Self::new(Arc::new(VenvBuilder))
    }
}

impl EnvironmentManager {
    pub fn new(builder: Arc<dyn EnvironmentBuilder>) -> Self {
        Self { builder }
    }

    /// Create `name`, at `external_path` or under the instance's `venvs/`
    ///
    /// A name already registered at the same location is returned as is. A
    /// name registered at a different location is a conflict and leaves the
    /// existing entry untouched.
    pub async fn create(
        &self,
        record: &mut InstanceRecord,
        name: &str,
        external_path: Option<&Path>,
    ) -> Result<EnvironmentRecord> {
        validate_name(name)?;

        let requested = match external_path {
            Some(path) => path.to_path_buf(),
            None => record.environment_path(name),
        };

        if let Some(existing) = record.environment(name).cloned() {
            let existing_path = record.environment_path(name);
            if existing_path != requested {
                return Err(ForgeError::VirtualEnvironmentConflict {
                    name: existing.name,
                    existing: existing_path,
                    requested,
                });
            }
            tracing::info!("Virtual environment '{}' already exists at {:?}", name, requested);
            return Ok(existing);
        }

        let created_target = !requested.exists();
        if let Some(parent) = requested.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let interpreter = interpreter_path(record.directory());
        if let Err(e) = self.builder.build(&interpreter, &requested).await {
            if created_target && requested.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(&requested) {
                    tracing::warn!("Failed to clean up {:?}: {}", requested, cleanup);
                }
            }
            return Err(e);
        }

        let entry = match external_path {
            Some(path) => EnvironmentRecord::external(name, path),
            None => EnvironmentRecord::managed(name),
        };
        record.set_environment(entry.clone());
        record.save()?;

        tracing::info!(
            "Created virtual environment '{}' for Python {} at {:?}",
            name,
            record.python_version,
            requested
        );
        Ok(entry)
    }

    /// Forget `name`, deleting its directory only when `remove_files` is set
    pub fn delete(&self, record: &mut InstanceRecord, name: &str, remove_files: bool) -> Result<()> {
        if record.environment(name).is_none() {
            return Err(not_found(record, name));
        }

        let path = record.environment_path(name);
        if remove_files {
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
                tracing::info!("Removed virtual environment files at {:?}", path);
            }
        } else {
            tracing::debug!("Keeping virtual environment files at {:?}", path);
        }

        record.remove_environment(name);
        record.save()?;
        Ok(())
    }

    pub fn list<'r>(&self, record: &'r InstanceRecord) -> &'r [EnvironmentRecord] {
        record.environments()
    }

    /// Resolved location of a registered environment
    pub fn path(&self, record: &InstanceRecord, name: &str) -> Result<PathBuf> {
        match record.environment(name) {
            Some(_) => Ok(record.environment_path(name)),
            None => Err(not_found(record, name)),
        }
    }
}

fn not_found(record: &InstanceRecord, name: &str) -> ForgeError {
    ForgeError::VirtualEnvironmentNotFound {
        name: name.to_string(),
        version: record.python_version.to_string(),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("name contains a path separator")
    } else if name == "." || name.contains("..") {
        Some("name may not contain '..' or be '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ForgeError::InvalidEnvironmentName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
