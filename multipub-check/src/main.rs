//! multipub-check - Validate content against platform constraints before publishing

use anyhow::{Context, Result};
use clap::Parser;
use libmultipub::logging::LoggingConfig;
use libmultipub::validation::ValidationReport;
use libmultipub::{ConstraintTable, ContentItem, MultipubError, PlatformKind};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exit code when at least one platform blocks the content
const EXIT_BLOCKED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "multipub-check")]
#[command(version)]
#[command(about = "Validate content against platform constraints before publishing", long_about = None)]
struct Cli {
    /// Content item JSON file (reads from stdin if not provided)
    file: Option<PathBuf>,

    /// Platform(s) to check against (comma-separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    platform: Vec<String>,

    /// Content sub-category (post, reel, story, ...)
    #[arg(short, long)]
    category: Option<String>,

    /// Constraint table TOML replacing the built-in one
    #[arg(long)]
    constraints: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct PlatformCheck {
    platform: PlatformKind,
    sub_category: Option<String>,
    passed: bool,
    #[serde(flatten)]
    report: ValidationReport,
}

fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("error").verbose(cli.verbose).init();

    match run(&cli) {
        Ok(checks) if checks.iter().any(|c| !c.passed) => std::process::exit(EXIT_BLOCKED),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<MultipubError>()
                .map(MultipubError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

fn run(cli: &Cli) -> Result<Vec<PlatformCheck>> {
    if cli.format != "text" && cli.format != "json" {
        return Err(MultipubError::InvalidInput(format!(
            "Invalid format '{}'. Valid options: text, json",
            cli.format
        ))
        .into());
    }

    let platforms = cli
        .platform
        .iter()
        .map(|name| name.parse::<PlatformKind>())
        .collect::<libmultipub::Result<Vec<_>>>()?;

    let table = match &cli.constraints {
        Some(path) => ConstraintTable::from_path(path)
            .with_context(|| format!("Failed to load constraints from {}", path.display()))?,
        None => ConstraintTable::builtin()?,
    };

    let content = read_content(cli.file.as_deref())?;
    debug!(
        "Checking content {} against {} platform(s)",
        content.id,
        platforms.len()
    );

    let checks: Vec<PlatformCheck> = platforms
        .into_iter()
        .map(|platform| {
            let report = table.validate(&content, platform, cli.category.as_deref());
            PlatformCheck {
                platform,
                sub_category: cli.category.clone(),
                passed: !report.is_blocked(),
                report,
            }
        })
        .collect();

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        print_text(&checks);
    }
    Ok(checks)
}

fn read_content(file: Option<&Path>) -> Result<ContentItem> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read content from stdin")?;
            buffer
        }
    };

    serde_json::from_str(&raw).context("Content is not a valid content item")
}

fn print_text(checks: &[PlatformCheck]) {
    for check in checks {
        let name = match &check.sub_category {
            Some(category) => format!("{} ({})", check.platform, category),
            None => check.platform.to_string(),
        };
        match &check.report.blocking {
            Some(error) => println!("{}: blocked: {}", name, error),
            None => println!("{}: ok", name),
        }
        for warning in &check.report.warnings {
            println!("  warning: {}", warning);
        }
    }
}
