//! Contract Mock - CLI Entry Point

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use contract_mock::{
    ConfigLoader, GetTypeValidator, LoadError, LoadedConfig, Mode, NoTransform, NoTypeChecks,
    Resource, TypeValidator,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Test,
    Serve,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Test => Mode::Test,
            ModeArg::Serve => Mode::Serve,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "contract-mock",
    about = "Compile contract/mock resource configurations and report what they define",
    version
)]
struct Args {
    /// Configuration files to load
    #[arg(required = true)]
    configs: Vec<PathBuf>,

    /// Mode the configurations are validated for
    #[arg(short, long, value_enum, default_value = "serve")]
    mode: ModeArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Accept declared body types without checking them
    #[arg(long)]
    skip_type_checks: bool,
}

/// Type checks need a type source; none is built into the CLI.
struct CliTypeValidator {
    skip: bool,
}

#[async_trait]
impl GetTypeValidator for CliTypeValidator {
    async fn get_type_validator(&self) -> Result<Arc<dyn TypeValidator>> {
        if self.skip {
            return Ok(Arc::new(NoTypeChecks));
        }
        anyhow::bail!("configuration declares body types but no type source is available; pass --skip-type-checks to load it anyway")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileReport<'a> {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<&'a [Resource]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixture_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> FileReport<'a> {
    fn new(path: &Path, result: &'a Result<LoadedConfig, LoadError>) -> Self {
        match result {
            Ok(loaded) => Self {
                path: path.display().to_string(),
                resources: Some(loaded.resources.as_slice()),
                fixture_paths: Some(
                    loaded
                        .fixture_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                ),
                error: None,
            },
            Err(e) => Self {
                path: path.display().to_string(),
                resources: None,
                fixture_paths: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn print_text(path: &Path, result: &Result<LoadedConfig, LoadError>) {
    match result {
        Ok(loaded) => {
            println!(
                "{}: {} resources",
                path.display(),
                loaded.resources.len()
            );
            for resource in &loaded.resources {
                println!(
                    "  {} {} {} -> {}",
                    resource.name,
                    resource.request.method(),
                    resource.request.endpoint(),
                    resource.response.code
                );
            }
            for fixture in &loaded.fixture_paths {
                println!("  fixture {}", fixture.display());
            }
        }
        Err(e) => println!("{}: {e}", path.display()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mode = Mode::from(args.mode);
    info!(mode = %mode, files = args.configs.len(), "Loading configurations");

    let loader = ConfigLoader::new(mode);
    let types = CliTypeValidator {
        skip: args.skip_type_checks,
    };
    let results = loader.load_all(&args.configs, &types, &NoTransform).await;

    match args.format {
        OutputFormat::Text => {
            for (path, result) in args.configs.iter().zip(&results) {
                print_text(path, result);
            }
        }
        OutputFormat::Json => {
            let reports: Vec<FileReport<'_>> = args
                .configs
                .iter()
                .zip(&results)
                .map(|(path, result)| FileReport::new(path, result))
                .collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} configuration files failed to load", results.len());
    }

    Ok(())
}
