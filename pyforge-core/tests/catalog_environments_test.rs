//! Catalog scanning and environment workflows across rescans

mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{init_test_logging, write_interpreter_layout};
use pretty_assertions::assert_eq;
use pyforge_core::{
    EnvironmentBuilder, EnvironmentManager, ExactVersion, ForgeError, InstanceCatalog,
    InstanceRecord, InstanceRepository, Result,
};
use tempfile::TempDir;

struct DirBuilder;

#[async_trait]
impl EnvironmentBuilder for DirBuilder {
    async fn build(&self, _interpreter: &Path, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target.join("bin"))?;
        std::fs::write(target.join("pyvenv.cfg"), "include-system-site-packages = false\n")?;
        Ok(())
    }
}

fn install(root: &Path, version: &str, date: (i32, u32, u32), latest: bool) -> InstanceRecord {
    let version = ExactVersion::parse(version).unwrap();
    let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
    let dir = root.join(format!("python-{}-{}", version, date.format("%Y%m%d")));
    write_interpreter_layout(&dir).unwrap();
    let record = InstanceRecord::new(version, date, latest, dir);
    record.save().unwrap();
    record
}

#[test]
fn test_partial_spec_picks_highest_installed_patch() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    install(temp.path(), "3.12.5", (2024, 7, 26), true);
    install(temp.path(), "3.12.19", (2024, 7, 26), true);
    install(temp.path(), "3.12.10", (2024, 7, 26), true);
    install(temp.path(), "3.13.0", (2024, 10, 7), true);

    let catalog = InstanceCatalog::open(temp.path()).unwrap();
    assert_eq!(catalog.list().len(), 4);

    let found = catalog.find("3.12", None).unwrap().unwrap();
    assert_eq!(found.python_version, ExactVersion::new(3, 12, 19));
    assert!(catalog.find("3.14", None).unwrap().is_none());
}

#[test]
fn test_remove_is_idempotent_after_external_deletion() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let kept = install(temp.path(), "3.11.9", (2024, 4, 24), true);
    let gone = install(temp.path(), "3.12.5", (2024, 7, 26), true);

    let mut catalog = InstanceCatalog::open(temp.path()).unwrap();
    std::fs::remove_dir_all(gone.directory()).unwrap();

    assert!(!catalog.remove(&gone).unwrap());
    assert_eq!(catalog.list().len(), 1);
    assert_eq!(catalog.list()[0].identity(), kept.identity());
}

#[tokio::test]
async fn test_environment_registry_survives_rescan() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let external = TempDir::new().unwrap();
    install(temp.path(), "3.12.5", (2024, 7, 26), true);

    let manager = EnvironmentManager::new(Arc::new(DirBuilder));
    let mut catalog = InstanceCatalog::open(temp.path()).unwrap();
    {
        let record = catalog.find_mut("3.12", None).unwrap().unwrap();
        manager.create(record, "dev", None).await.unwrap();
        manager
            .create(record, "tools", Some(external.path().join("tools").as_path()))
            .await
            .unwrap();
    }

    let catalog = InstanceCatalog::open(temp.path()).unwrap();
    let record = catalog.find("3.12.5", None).unwrap().unwrap();
    let names: Vec<&str> = manager.list(record).iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["dev", "tools"]);
    assert_eq!(
        manager.path(record, "dev").unwrap(),
        record.directory().join("venvs").join("dev")
    );
    assert_eq!(
        manager.path(record, "TOOLS").unwrap(),
        external.path().join("tools")
    );
}

#[tokio::test]
async fn test_conflicting_create_leaves_entry_unchanged() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let external = TempDir::new().unwrap();
    let a = external.path().join("a");
    let b = external.path().join("b");
    install(temp.path(), "3.12.5", (2024, 7, 26), true);

    let manager = EnvironmentManager::new(Arc::new(DirBuilder));
    let mut catalog = InstanceCatalog::open(temp.path()).unwrap();
    let record = catalog.find_mut("3.12", None).unwrap().unwrap();

    manager.create(record, "env", Some(a.as_path())).await.unwrap();
    let err = manager.create(record, "env", Some(b.as_path())).await.unwrap_err();
    assert!(matches!(err, ForgeError::VirtualEnvironmentConflict { .. }));

    let reloaded = InstanceRecord::load(record.directory()).unwrap();
    assert_eq!(reloaded.environments().len(), 1);
    assert_eq!(reloaded.environments()[0].external_path.as_deref(), Some(a.as_path()));
}

#[tokio::test]
async fn test_delete_with_keep_files() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let external = TempDir::new().unwrap();
    let target = external.path().join("env");
    install(temp.path(), "3.12.5", (2024, 7, 26), true);

    let manager = EnvironmentManager::new(Arc::new(DirBuilder));
    let mut catalog = InstanceCatalog::open(temp.path()).unwrap();
    let record = catalog.find_mut("3.12", None).unwrap().unwrap();

    manager.create(record, "env", Some(target.as_path())).await.unwrap();
    manager.delete(record, "env", false).unwrap();

    assert!(target.join("pyvenv.cfg").exists());
    assert!(manager.list(record).is_empty());
    assert!(matches!(
        manager.delete(record, "env", false),
        Err(ForgeError::VirtualEnvironmentNotFound { .. })
    ));
}

#[tokio::test]
async fn test_removing_instance_removes_managed_environments() {
    init_test_logging();
    let temp = TempDir::new().unwrap();
    let external = TempDir::new().unwrap();
    install(temp.path(), "3.12.5", (2024, 7, 26), true);

    let manager = EnvironmentManager::new(Arc::new(DirBuilder));
    let mut catalog = InstanceCatalog::open(temp.path()).unwrap();
    let record = catalog.find_mut("3.12", None).unwrap().unwrap();
    manager.create(record, "dev", None).await.unwrap();
    manager
        .create(record, "ext", Some(external.path().join("ext").as_path()))
        .await
        .unwrap();
    let record = record.clone();

    assert!(catalog.remove(&record).unwrap());
    assert!(!record.directory().exists());
    // External environments are never relocated or deleted with the instance
    assert!(external.path().join("ext").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_venv_builder_invokes_interpreter() {
    use pyforge_core::VenvBuilder;
    use std::os::unix::fs::PermissionsExt;

    init_test_logging();
    let temp = TempDir::new().unwrap();
    let record = install(temp.path(), "3.12.5", (2024, 7, 26), true);

    // Stand-in interpreter: `python3 -m venv <target>` creates the target
    let exe = record.directory().join("bin").join("python3");
    std::fs::write(&exe, "#!/bin/sh\n[ \"$1\" = \"-m\" ] && [ \"$2\" = \"venv\" ] && mkdir -p \"$3\"\n")
        .unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut record = record;
    let manager = EnvironmentManager::new(Arc::new(VenvBuilder));
    manager.create(&mut record, "dev", None).await.unwrap();
    assert!(record.directory().join("venvs").join("dev").is_dir());
}
