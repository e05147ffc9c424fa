//! PyForge library exports
//!
//! Resolves interpreter version requests to verified on-disk installations
//! and keeps a rescannable catalog of them and their virtual environments.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod environments;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod release;
pub mod retry;
pub mod smoke;
pub mod version;

pub use catalog::{EnvironmentRecord, InstanceCatalog, InstanceRecord, InstanceRepository};
pub use config::ForgeConfig;
pub use environments::{EnvironmentBuilder, EnvironmentManager, VenvBuilder};
pub use error::{ForgeError, Result};
pub use pipeline::{AcquisitionPipeline, AcquisitionRequest, AcquisitionState, InstanceAcquirer};
pub use platform::{HostPlatform, PlatformInfo, PlatformProbe};
pub use release::{Asset, Release, ReleaseSource};
pub use retry::RetryPolicy;
pub use version::{ExactVersion, VersionSpec};
