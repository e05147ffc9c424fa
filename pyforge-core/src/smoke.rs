//! Post-install smoke test
//!
//! Runs the freshly installed interpreter with `--version`. The outcome is
//! advisory: the calling process may resolve shared libraries differently
//! from whoever eventually runs the interpreter.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::archive::interpreter_path;
use crate::error::Result;

/// Result of a smoke test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutcome {
    /// The interpreter answered, with its reported version
    Passed { reported: String },
    /// The interpreter ran but did not succeed
    Failed { detail: String },
}

/// Process collaborator used after installation
#[async_trait]
pub trait SmokeTest: Send + Sync {
    async fn run(&self, install_root: &Path, timeout: Duration) -> Result<SmokeOutcome>;
}

/// Invokes `<root>/bin/python3 --version`
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterSmokeTest;

#[async_trait]
impl SmokeTest for InterpreterSmokeTest {
    async fn run(&self, install_root: &Path, timeout: Duration) -> Result<SmokeOutcome> {
        let exe = interpreter_path(install_root);

        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&exe)
                .arg("--version")
                .current_dir(install_root)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(result) => result?,
            Err(_) => {
                return Ok(SmokeOutcome::Failed {
                    detail: format!("timed out after {}s", timeout.as_secs()),
                });
            }
        };

        if !output.status.success() {
            return Ok(SmokeOutcome::Failed {
                detail: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        // Older interpreters print the version on stderr
        let mut reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reported.is_empty() {
            reported = String::from_utf8_lossy(&output.stderr).trim().to_string();
        }
        Ok(SmokeOutcome::Passed { reported })
    }
}
