//! Command-line interface.

use crate::config::{Config, parse_setting_value};
use crate::drift::{DriftOverrides, InputGate};
use crate::error::{Error, Result};
use crate::queryset::Queryset;
use crate::remote::{QuerysetClient, read_parquet, write_parquet};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "viewser")]
#[command(version, about = "Fetch, publish and validate querysets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage and fetch querysets
    #[command(subcommand)]
    Queryset(QuerysetCommand),

    /// Inspect and change client settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum QuerysetCommand {
    /// List published querysets
    List,

    /// Show a queryset definition
    Show { name: String },

    /// Delete a queryset
    Delete {
        name: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Publish a queryset definition from a JSON file
    Publish {
        file: PathBuf,
        /// Publish under this name instead of the one in the file
        #[arg(long)]
        name: Option<String>,
        /// Replace an existing queryset with the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Fetch a queryset's data into a Parquet file
    Fetch {
        name: String,
        out_file: PathBuf,
        #[arg(short, long = "start-date")]
        start_date: Option<NaiveDate>,
        #[arg(short, long = "end-date")]
        end_date: Option<NaiveDate>,
    },

    /// Fetch a queryset and run input drift detection on it
    Drift {
        name: String,
        #[arg(short, long = "start-date")]
        start_date: Option<NaiveDate>,
        #[arg(short, long = "end-date")]
        end_date: Option<NaiveDate>,
        /// JSON file with drift check overrides
        #[arg(long)]
        config: Option<PathBuf>,
        /// Known-good Parquet data to self test the checks on first
        #[arg(long = "self-test")]
        self_test: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one setting
    Get { name: String },

    /// Set a setting
    Set {
        name: String,
        value: String,
        /// Replace the value if it is already set
        #[arg(long = "override")]
        overwrite: bool,
    },

    /// Remove a setting
    Unset { name: String },

    /// List all settings
    List,

    /// Restore default values
    Reset,

    /// Print all settings as JSON
    Dump,

    /// Merge settings from a JSON file
    Load { file: PathBuf },
}

/// Execute `cli`, writing user-facing output to `out`.
pub fn run(cli: Cli, out: &mut impl Write) -> Result<ExitCode> {
    match cli.command {
        Command::Queryset(command) => {
            let config = Config::load()?;
            let client = QuerysetClient::from_config(&config)?;
            run_queryset(&client, command, out)
        }
        Command::Config(command) => {
            let mut config = Config::load()?;
            run_config(&mut config, command, out)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub fn run_queryset(
    client: &QuerysetClient,
    command: QuerysetCommand,
    out: &mut impl Write,
) -> Result<ExitCode> {
    match command {
        QuerysetCommand::List => {
            for name in client.list()? {
                writeln!(out, "{name}")?;
            }
        }
        QuerysetCommand::Show { name } => {
            let detail = client.show(&name)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&detail)?)?;
        }
        QuerysetCommand::Delete { name, yes } => {
            if !yes && !confirm(&format!("Delete queryset {name}?"), out)? {
                writeln!(out, "Aborted")?;
                return Ok(ExitCode::FAILURE);
            }
            client.delete(&name)?;
            writeln!(out, "Deleted {name}")?;
        }
        QuerysetCommand::Publish {
            file,
            name,
            overwrite,
        } => {
            let mut queryset = Queryset::from_json_file(&file)?;
            if let Some(name) = name {
                queryset = queryset.renamed(name);
            }
            client.publish(&queryset, overwrite)?;
            writeln!(out, "Published {}", queryset.name)?;
        }
        QuerysetCommand::Fetch {
            name,
            out_file,
            start_date,
            end_date,
        } => {
            let mut df = client.fetch(&name, start_date, end_date)?;
            write_parquet(&mut df, fs::File::create(&out_file)?)?;
            writeln!(out, "Wrote {} rows to {}", df.height(), out_file.display())?;
        }
        QuerysetCommand::Drift {
            name,
            start_date,
            end_date,
            config,
            self_test,
            json,
        } => {
            let overrides = config.as_deref().map(DriftOverrides::from_file).transpose()?;
            let reference = self_test.as_deref().map(read_parquet_file).transpose()?;
            let df = client.fetch(&name, start_date, end_date)?;
            let report = InputGate::new(&df, overrides.as_ref(), reference.as_ref())?
                .assemble_alerts();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                write!(out, "{report}")?;
            }
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_config(config: &mut Config, command: ConfigCommand, out: &mut impl Write) -> Result<()> {
    match command {
        ConfigCommand::Get { name } => {
            let value = config.require(&name)?;
            writeln!(out, "{}", display_value(&value))?;
        }
        ConfigCommand::Set {
            name,
            value,
            overwrite,
        } => {
            if config.set(&name, parse_setting_value(&value), overwrite)? {
                config.save()?;
                writeln!(out, "{name} = {value}")?;
            } else {
                return Err(Error::config(format!(
                    "{name} is already set; pass --override to replace it"
                )));
            }
        }
        ConfigCommand::Unset { name } => {
            config.unset(&name)?;
            config.save()?;
            writeln!(out, "Unset {name}")?;
        }
        ConfigCommand::List => {
            for (key, value) in config.list() {
                writeln!(out, "{key}: {}", display_value(value))?;
            }
        }
        ConfigCommand::Reset => {
            config.reset();
            config.save()?;
            writeln!(out, "Settings reset to defaults")?;
        }
        ConfigCommand::Dump => writeln!(out, "{}", config.dump()?)?,
        ConfigCommand::Load { file } => {
            let value: Value = serde_json::from_str(&fs::read_to_string(&file)?)?;
            config.merge_json(value)?;
            config.save()?;
            writeln!(out, "Loaded settings from {}", file.display())?;
        }
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_parquet_file(path: &Path) -> Result<polars::prelude::DataFrame> {
    read_parquet(fs::read(path)?)
}

fn confirm(prompt: &str, out: &mut impl Write) -> Result<bool> {
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
