//! Virtual environment commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use pyforge_core::{EnvironmentManager, ForgeConfig};

use crate::instance_cli::{find_installed, open_catalog};

/// Environments of one installed Python version
#[derive(Parser, Debug)]
pub struct VenvCommand {
    /// Python version owning the environments, e.g. 3.12
    pub python: String,

    /// Exact build date of that version (YYYY-MM-DD)
    #[clap(long, value_parser = crate::parse_date)]
    pub build_date: Option<NaiveDate>,

    #[clap(subcommand)]
    pub command: VenvSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum VenvSubcommand {
    /// Create a named environment
    Create {
        name: String,

        /// Create outside the instance directory
        #[clap(long)]
        path: Option<PathBuf>,
    },

    /// List environments
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Delete an environment
    Delete {
        name: String,

        /// Forget the environment but leave its files on disk
        #[clap(long)]
        keep_files: bool,
    },

    /// Print the location of an environment
    Path { name: String },
}

/// Table row for environments
#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Path")]
    path: String,
}

impl VenvCommand {
    pub async fn execute(self, config: &ForgeConfig) -> Result<()> {
        let mut catalog = open_catalog(config)?;
        let identity = find_installed(&catalog, &self.python, self.build_date)?.identity();
        let record = catalog
            .get_mut_by_identity(identity)
            .context("Instance disappeared from catalog")?;
        let manager = EnvironmentManager::default();

        match self.command {
            VenvSubcommand::Create { name, path } => {
                let path = match path {
                    Some(p) if p.is_relative() => Some(std::env::current_dir()?.join(p)),
                    other => other,
                };
                manager.create(record, &name, path.as_deref()).await?;
                println!(
                    "Created '{}' for Python {} at {}",
                    name,
                    record.python_version,
                    record.environment_path(&name).display()
                );
            }
            VenvSubcommand::List { json } => {
                let envs = manager.list(record);
                if json {
                    let json: Vec<serde_json::Value> = envs
                        .iter()
                        .map(|e| {
                            serde_json::json!({
                                "name": e.name,
                                "external": e.is_external(),
                                "path": record.environment_path(&e.name),
                                "created_at": e.created_date.to_rfc3339(),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                } else if envs.is_empty() {
                    println!("No environments for Python {}.", record.python_version);
                } else {
                    let rows: Vec<EnvironmentRow> = envs
                        .iter()
                        .map(|e| EnvironmentRow {
                            name: e.name.clone(),
                            kind: if e.is_external() { "external" } else { "managed" }
                                .to_string(),
                            created: e.created_date.format("%Y-%m-%d").to_string(),
                            path: record.environment_path(&e.name).display().to_string(),
                        })
                        .collect();
                    let table = Table::new(&rows)
                        .with(Style::rounded())
                        .with(Modify::new(Rows::first()).with(Alignment::center()))
                        .to_string();
                    println!("{table}");
                }
            }
            VenvSubcommand::Delete { name, keep_files } => {
                let path = manager.path(record, &name)?;
                manager.delete(record, &name, !keep_files)?;
                if keep_files {
                    println!("Forgot '{}'; files kept at {}", name, path.display());
                } else {
                    println!("Deleted '{}'", name);
                }
            }
            VenvSubcommand::Path { name } => {
                println!("{}", manager.path(record, &name)?.display());
            }
        }
        Ok(())
    }
}
