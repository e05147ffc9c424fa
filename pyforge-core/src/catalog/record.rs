//! Instance record documents (`pyforge-instance.json`)
//!
//! One document per instance directory records what was installed, when,
//! and which named virtual environments derive from it. The directory the
//! document was loaded from is authoritative and never serialized.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ForgeError, Result};
use crate::version::ExactVersion;

/// Directory-relative file name of the record document
pub const METADATA_FILE: &str = "pyforge-instance.json";

/// Subdirectory holding default-located environments
pub const VENVS_DIR: &str = "venvs";

/// A managed interpreter installation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceRecord {
    /// Exact interpreter version ("X.Y.Z")
    pub python_version: ExactVersion,

    /// Build date of the release the instance came from
    #[serde(deserialize_with = "date_or_datetime")]
    pub build_date: NaiveDate,

    /// Whether the install was requested as "newest available"
    pub was_latest_build: bool,

    /// When the instance was installed
    pub installation_date: DateTime<Utc>,

    /// Named environments derived from this instance
    #[serde(default)]
    pub virtual_environments: Vec<EnvironmentRecord>,

    #[serde(skip)]
    directory: PathBuf,
}

/// A named virtual environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentRecord {
    /// Unique within an instance, compared case-insensitively
    pub name: String,

    /// Location outside the instance tree, if any
    #[serde(default)]
    pub external_path: Option<PathBuf>,

    pub created_date: DateTime<Utc>,
}

impl EnvironmentRecord {
    /// An environment at the default location under the instance
    pub fn managed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_path: None,
            created_date: Utc::now(),
        }
    }

    /// An environment living outside the instance tree
    pub fn external(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            external_path: Some(path.into()),
            created_date: Utc::now(),
        }
    }

    pub fn is_external(&self) -> bool {
        self.external_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }
}

impl InstanceRecord {
    pub fn new(
        python_version: ExactVersion,
        build_date: NaiveDate,
        was_latest_build: bool,
        directory: PathBuf,
    ) -> Self {
        Self {
            python_version,
            build_date,
            was_latest_build,
            installation_date: Utc::now(),
            virtual_environments: Vec::new(),
            directory,
        }
    }

    /// Instance directory this record belongs to
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Identity key
    pub fn identity(&self) -> (ExactVersion, NaiveDate) {
        (self.python_version, self.build_date)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.directory.join(METADATA_FILE)
    }

    /// Load the record stored in `directory`
    pub fn load(directory: &Path) -> Result<Self> {
        let path = directory.join(METADATA_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ForgeError::MetadataCorrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut record: InstanceRecord =
            serde_json::from_str(&content).map_err(|e| ForgeError::MetadataCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        record.directory = directory.to_path_buf();
        Ok(record)
    }

    /// Write the record into its directory
    ///
    /// The document is written to a temporary sibling and renamed into
    /// place, so a crash never leaves a half-written record behind.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize instance record: {e}"))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.directory)?;
        temp.write_all(content.as_bytes())?;
        temp.flush()?;
        temp.persist(self.metadata_path()).map_err(|e| e.error)?;

        tracing::debug!("Saved instance record to {:?}", self.metadata_path());
        Ok(())
    }

    // Environment registry

    pub fn environments(&self) -> &[EnvironmentRecord] {
        &self.virtual_environments
    }

    /// Look up an environment by name, case-insensitively
    pub fn environment(&self, name: &str) -> Option<&EnvironmentRecord> {
        self.virtual_environments
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Insert or overwrite the entry with the same name
    pub fn set_environment(&mut self, record: EnvironmentRecord) {
        match self
            .virtual_environments
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(&record.name))
        {
            Some(existing) => *existing = record,
            None => self.virtual_environments.push(record),
        }
    }

    /// Drop the entry; `false` when no such entry existed
    pub fn remove_environment(&mut self, name: &str) -> bool {
        let before = self.virtual_environments.len();
        self.virtual_environments
            .retain(|e| !e.name.eq_ignore_ascii_case(name));
        self.virtual_environments.len() != before
    }

    /// Where an environment lives: its external path, or `default_root/venvs/name`
    pub fn resolve_environment_path(&self, name: &str, default_root: &Path) -> PathBuf {
        match self.environment(name) {
            Some(env) if env.is_external() => env.external_path.clone().unwrap_or_default(),
            Some(env) => default_root.join(VENVS_DIR).join(&env.name),
            None => default_root.join(VENVS_DIR).join(name),
        }
    }

    /// [`Self::resolve_environment_path`] rooted at this instance's directory
    pub fn environment_path(&self, name: &str) -> PathBuf {
        self.resolve_environment_path(name, &self.directory)
    }
}

/// Accept either `YYYY-MM-DD` or a full RFC 3339 timestamp
fn date_or_datetime<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.date_naive())
        .map_err(|_| serde::de::Error::custom(format!("invalid build date '{raw}'")))
}
