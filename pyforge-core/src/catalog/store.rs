//! Directory-scanned instance catalog
//!
//! The catalog is rebuilt from disk on construction: every immediate
//! subdirectory of the root holding a readable record document becomes an
//! entry. Nothing else is persisted; each record document is the sole
//! source of truth for its instance.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::record::{InstanceRecord, METADATA_FILE};
use crate::error::Result;
use crate::version::VersionSpec;

/// Repository seam over the instance store
///
/// The directory-scanning [`InstanceCatalog`] is one implementation; an
/// indexed store can replace it without touching callers.
pub trait InstanceRepository {
    /// Every known instance
    fn list(&self) -> &[InstanceRecord];

    /// Resolve `version` (exact or partial) and an optional build date
    fn find(&self, version: &str, build_date: Option<NaiveDate>) -> Result<Option<&InstanceRecord>>;

    /// Register a freshly acquired instance
    fn add(&mut self, record: InstanceRecord);

    /// Delete an instance and its directory; `false` if the directory was already gone
    fn remove(&mut self, record: &InstanceRecord) -> Result<bool>;
}

/// In-memory index over a root directory of instances
#[derive(Debug)]
pub struct InstanceCatalog {
    root: PathBuf,
    records: Vec<InstanceRecord>,
}

impl InstanceCatalog {
    /// Scan `root`, creating it if it does not exist yet
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut catalog = Self {
            root,
            records: Vec::new(),
        };
        catalog.rescan()?;
        Ok(catalog)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the index from disk
    ///
    /// Directories without a parseable record are skipped and left in place
    /// for manual inspection.
    pub fn rescan(&mut self) -> Result<()> {
        let mut records = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {:?}: {}", self.root, e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(METADATA_FILE).exists() {
                tracing::debug!("Skipping {:?}: no instance record", path);
                continue;
            }

            match InstanceRecord::load(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping instance directory: {}", e),
            }
        }

        records.sort_by(|a, b| {
            a.python_version
                .cmp(&b.python_version)
                .then(a.build_date.cmp(&b.build_date))
        });

        tracing::debug!("Catalog at {:?} holds {} instances", self.root, records.len());
        self.records = records;
        Ok(())
    }

    /// Resolve a parsed spec to an index into the record list
    ///
    /// Among records matching the version spec: with a build date, the record built
    /// that day; without one, only records flagged as latest build. A build
    /// pinned by date never answers a "newest" lookup. The highest version
    /// wins; ties go to the newest build date.
    fn position(&self, spec: &VersionSpec, build_date: Option<NaiveDate>) -> Option<usize> {
        let matching: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| spec.matches(&r.python_version))
            .map(|(i, _)| i)
            .collect();

        let candidates: Vec<usize> = match build_date {
            Some(date) => matching
                .into_iter()
                .filter(|&i| self.records[i].build_date == date)
                .collect(),
            None => matching
                .into_iter()
                .filter(|&i| self.records[i].was_latest_build)
                .collect(),
        };

        let best = candidates.into_iter().max_by(|&a, &b| {
            let (ra, rb) = (&self.records[a], &self.records[b]);
            ra.python_version
                .cmp(&rb.python_version)
                .then(ra.build_date.cmp(&rb.build_date))
        })?;

        if build_date.is_none() {
            self.note_stale_latest_flags(best);
        }
        Some(best)
    }

    /// The latest-build flag is a stored hint; report records it contradicts
    fn note_stale_latest_flags(&self, chosen: usize) {
        let chosen = &self.records[chosen];
        for other in &self.records {
            if other.python_version == chosen.python_version
                && other.was_latest_build
                && other.build_date != chosen.build_date
            {
                tracing::debug!(
                    "Python {} has several builds flagged latest ({} and {}); using {}",
                    chosen.python_version,
                    other.build_date,
                    chosen.build_date,
                    chosen.build_date.max(other.build_date)
                );
            }
        }
    }

    /// Look up a record for modification (environment management)
    pub fn find_mut(
        &mut self,
        version: &str,
        build_date: Option<NaiveDate>,
    ) -> Result<Option<&mut InstanceRecord>> {
        let spec = VersionSpec::parse(version)?;
        Ok(self
            .position(&spec, build_date)
            .map(move |i| &mut self.records[i]))
    }

    /// Look up a record by a parsed spec
    pub fn find_spec(
        &self,
        spec: &VersionSpec,
        build_date: Option<NaiveDate>,
    ) -> Option<&InstanceRecord> {
        self.position(spec, build_date).map(|i| &self.records[i])
    }

    /// Record with exactly this identity, if present
    pub fn get_mut_by_identity(
        &mut self,
        identity: (crate::version::ExactVersion, NaiveDate),
    ) -> Option<&mut InstanceRecord> {
        self.records.iter_mut().find(|r| r.identity() == identity)
    }
}

impl InstanceRepository for InstanceCatalog {
    fn list(&self) -> &[InstanceRecord] {
        &self.records
    }

    fn find(&self, version: &str, build_date: Option<NaiveDate>) -> Result<Option<&InstanceRecord>> {
        let spec = VersionSpec::parse(version)?;
        Ok(self.find_spec(&spec, build_date))
    }

    fn add(&mut self, record: InstanceRecord) {
        tracing::debug!(
            "Registering Python {} ({}) at {:?}",
            record.python_version,
            record.build_date,
            record.directory()
        );
        self.records.push(record);
    }

    fn remove(&mut self, record: &InstanceRecord) -> Result<bool> {
        let directory = record.directory().to_path_buf();
        let existed = directory.exists();

        if existed {
            std::fs::remove_dir_all(&directory)?;
            tracing::info!(
                "Removed Python {} ({}) from {:?}",
                record.python_version,
                record.build_date,
                directory
            );
        } else {
            tracing::debug!("Instance directory {:?} was already gone", directory);
        }

        self.records
            .retain(|r| !(r.identity() == record.identity() && r.directory() == directory));
        Ok(existed)
    }
}
