#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use viewser::cli::{Cli, run};
use viewser::config::Config;

fn main() -> anyhow::Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    run(cli, &mut stdout).context("viewser")
}

/// `RUST_LOG` wins; otherwise the persisted `LOG_LEVEL` setting, then `info`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = Config::load()
            .ok()
            .and_then(|config| config.log_level())
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(directive(&level)).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Accept Python-style level names (`WARNING`, `CRITICAL`) as well.
fn directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}
