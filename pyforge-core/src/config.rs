//! Configuration discovery and loading
//!
//! Resolution order:
//! 1. Explicit path (CLI `--config`)
//! 2. `PYFORGE_CONFIG` environment variable
//! 3. `config.yaml` in the platform config directory
//! 4. Built-in defaults
//!
//! `PYFORGE_HOME`, when set, overrides the managed root directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::retry::RetryPolicy;

pub const CONFIG_ENV: &str = "PYFORGE_CONFIG";
pub const HOME_ENV: &str = "PYFORGE_HOME";
const CONFIG_FILE: &str = "config.yaml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Managed root holding one directory per instance
    pub root_dir: PathBuf,

    /// Prefix of instance directory names
    pub runtime_name: String,

    /// GitHub `owner/repo` publishing standalone builds
    pub release_repository: String,

    /// Environment variable holding an optional API token
    pub github_token_env: String,

    /// Bound on API calls, and on any stall while downloading an asset
    pub request_timeout_seconds: u64,

    pub smoke_test_timeout_seconds: u64,

    pub retry: RetryPolicy,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            runtime_name: "python".to_string(),
            release_repository: "astral-sh/python-build-standalone".to_string(),
            github_token_env: "GITHUB_TOKEN".to_string(),
            request_timeout_seconds: 60,
            smoke_test_timeout_seconds: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl ForgeConfig {
    /// Load following the documented resolution order
    pub fn load(cli_override: Option<&Path>) -> Result<Self> {
        trace!("Resolving pyforge configuration");

        let mut config = match Self::discover_path(cli_override) {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            Some(path) if cli_override.is_some() => {
                return Err(anyhow::anyhow!(
                    "Config file does not exist: {}",
                    path.display()
                ));
            }
            Some(path) => {
                debug!("No configuration at {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            debug!("{} overrides root directory: {:?}", HOME_ENV, home);
            config.root_dir = PathBuf::from(home);
        }

        Ok(config)
    }

    fn discover_path(cli_override: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_override {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        platform_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_yaml_ng::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Token read from the configured environment variable, if any
    pub fn github_token(&self) -> Option<String> {
        std::env::var(&self.github_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn smoke_timeout(&self) -> Duration {
        Duration::from_secs(self.smoke_test_timeout_seconds)
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    use directories::ProjectDirs;

    // Linux: ~/.config/pyforge, macOS: ~/Library/Application Support/pyforge
    if let Some(proj_dirs) = ProjectDirs::from("", "", "pyforge") {
        return Some(proj_dirs.config_dir().to_path_buf());
    }
    dirs::config_dir().map(|dir| dir.join("pyforge"))
}

/// `<data_dir>/pyforge/instances`
pub fn default_root_dir() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("", "", "pyforge") {
        return proj_dirs.data_dir().join("instances");
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pyforge")
        .join("instances")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    struct EnvGuard(&'static str);

    impl EnvGuard {
        fn set(key: &'static str, value: &Path) -> Self {
            std::env::set_var(key, value);
            Self(key)
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "root_dir: /srv/pythons\nretry:\n  max_attempts: 5\n",
        )
        .unwrap();

        let config = ForgeConfig::load_from_path(&path).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/srv/pythons"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.runtime_name, "python");
        assert_eq!(config.smoke_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.yaml");

        let config = ForgeConfig {
            root_dir: temp.path().join("root"),
            request_timeout_seconds: 5,
            ..Default::default()
        };
        config.save_to_path(&path).unwrap();

        assert_eq!(ForgeConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "retry: [not, a, map]").unwrap();
        assert!(ForgeConfig::load_from_path(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.yaml");
        assert!(ForgeConfig::load(Some(&missing)).is_err());
    }

    #[test]
    #[serial]
    fn test_env_config_and_home_override() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "runtime_name: cpython\nroot_dir: /from/file\n").unwrap();

        let _config = EnvGuard::set(CONFIG_ENV, &path);
        let config = ForgeConfig::load(None).unwrap();
        assert_eq!(config.runtime_name, "cpython");
        assert_eq!(config.root_dir, PathBuf::from("/from/file"));

        let home = temp.path().join("home");
        let _home = EnvGuard::set(HOME_ENV, &home);
        let config = ForgeConfig::load(None).unwrap();
        assert_eq!(config.root_dir, home);
    }

    #[test]
    #[serial]
    fn test_missing_env_config_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let _config = EnvGuard::set(CONFIG_ENV, &temp.path().join("nope.yaml"));

        let config = ForgeConfig::load(None).unwrap();
        assert_eq!(config.release_repository, "astral-sh/python-build-standalone");
    }
}
