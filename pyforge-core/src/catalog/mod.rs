//! Instance catalog - discovery and bookkeeping of installed interpreters
//!
//! # Overview
//!
//! Every installed interpreter lives in its own directory under the catalog
//! root, named `{runtime}-{X.Y.Z}-{YYYYMMDD}`, with a record document next to
//! the installation:
//!
//! ```text
//! <root>/
//!     python-3.12.5-20240726/
//!         pyforge-instance.json   ← InstanceRecord (+ environment registry)
//!         bin/python3
//!         lib/
//!         venvs/dev/              ← default-located environment
//!     python-3.11.9-20240424/
//!         ...
//! ```
//!
//! The catalog has no index of its own; it is rebuilt by scanning the root.

mod record;
mod store;

pub use record::{EnvironmentRecord, InstanceRecord, METADATA_FILE, VENVS_DIR};
pub use store::{InstanceCatalog, InstanceRepository};

/// Directory name for an instance
pub fn instance_dir_name(
    runtime_name: &str,
    version: &crate::version::ExactVersion,
    build_date: chrono::NaiveDate,
) -> String {
    format!(
        "{}-{}-{}",
        runtime_name,
        version,
        build_date.format("%Y%m%d")
    )
}
