//! Instance commands: install, list, find, remove

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tokio_util::sync::CancellationToken;

use pyforge_core::archive::interpreter_path;
use pyforge_core::{
    AcquisitionPipeline, AcquisitionRequest, ForgeConfig, InstanceAcquirer, InstanceCatalog,
    InstanceRecord, InstanceRepository,
};

pub(crate) fn open_catalog(config: &ForgeConfig) -> Result<InstanceCatalog> {
    InstanceCatalog::open(&config.root_dir)
        .with_context(|| format!("Failed to open instance root {}", config.root_dir.display()))
}

/// Look up an installed instance or explain how to get one
pub(crate) fn find_installed(
    catalog: &InstanceCatalog,
    version: &str,
    build_date: Option<NaiveDate>,
) -> Result<InstanceRecord> {
    catalog.find(version, build_date)?.cloned().ok_or_else(|| {
        let date = build_date
            .map(|d| format!(" built {d}"))
            .unwrap_or_default();
        anyhow!(
            "No installed Python matches {version}{date}\n\nRun 'pyforge install {version}' first, or 'pyforge list' to see what is installed.\nBuilds installed with --min-date are found with --build-date."
        )
    })
}

pub async fn execute_install(
    config: &ForgeConfig,
    version: &str,
    min_date: Option<NaiveDate>,
    cancel: CancellationToken,
) -> Result<()> {
    let request = AcquisitionRequest::parse(version, min_date)?;
    let mut catalog = open_catalog(config)?;
    let pipeline = AcquisitionPipeline::from_config(config)?;

    match min_date {
        Some(date) => println!("Resolving Python {version} built on or after {date}..."),
        None => println!("Resolving newest build of Python {version}..."),
    }

    let record = pipeline.acquire(&mut catalog, &request, &cancel).await?;

    println!(
        "\nPython {} (build {}) ready",
        record.python_version, record.build_date
    );
    println!("Location: {}", record.directory().display());
    println!(
        "Interpreter: {}",
        interpreter_path(record.directory()).display()
    );
    Ok(())
}

/// Table row for installed instances
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Build")]
    build_date: String,
    #[tabled(rename = "Latest")]
    latest: String,
    #[tabled(rename = "Envs")]
    environments: usize,
    #[tabled(rename = "Location")]
    location: String,
}

pub fn execute_list(config: &ForgeConfig, json_output: bool) -> Result<()> {
    let catalog = open_catalog(config)?;
    let mut records: Vec<&InstanceRecord> = catalog.list().iter().collect();
    records.sort_by(|a, b| {
        b.python_version
            .cmp(&a.python_version)
            .then(b.build_date.cmp(&a.build_date))
    });

    if json_output {
        let json: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "version": r.python_version.to_string(),
                    "build_date": r.build_date.to_string(),
                    "was_latest_build": r.was_latest_build,
                    "installed_at": r.installation_date.to_rfc3339(),
                    "directory": r.directory(),
                    "environments": r.environments().iter().map(|e| e.name.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No Python versions installed.");
        println!("\nRun 'pyforge install 3.12' to install one.");
        return Ok(());
    }

    let rows: Vec<InstanceRow> = records
        .iter()
        .map(|r| InstanceRow {
            version: r.python_version.to_string(),
            build_date: r.build_date.to_string(),
            latest: if r.was_latest_build { "yes" } else { "" }.to_string(),
            environments: r.environments().len(),
            location: r.directory().display().to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub fn execute_find(
    config: &ForgeConfig,
    version: &str,
    build_date: Option<NaiveDate>,
    interpreter_only: bool,
) -> Result<()> {
    let catalog = open_catalog(config)?;
    let record = find_installed(&catalog, version, build_date)?;

    if interpreter_only {
        println!("{}", interpreter_path(record.directory()).display());
    } else {
        println!(
            "Python {} (build {}) at {}",
            record.python_version,
            record.build_date,
            record.directory().display()
        );
    }
    Ok(())
}

pub fn execute_remove(
    config: &ForgeConfig,
    version: &str,
    build_date: Option<NaiveDate>,
) -> Result<()> {
    let mut catalog = open_catalog(config)?;
    let record = find_installed(&catalog, version, build_date)?;

    let external: Vec<_> = record
        .environments()
        .iter()
        .filter(|e| e.is_external())
        .collect();
    if !external.is_empty() {
        println!(
            "Note: {} external environment(s) are left in place:",
            external.len()
        );
        for env in external {
            println!("  {} -> {}", env.name, record.environment_path(&env.name).display());
        }
    }

    if catalog.remove(&record)? {
        println!(
            "Removed Python {} (build {})",
            record.python_version, record.build_date
        );
    } else {
        println!(
            "Python {} (build {}) was already deleted from disk; forgot it",
            record.python_version, record.build_date
        );
    }
    Ok(())
}
