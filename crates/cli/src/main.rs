//! Ephemera entry point.
//!
//! This binary is the composition root for the entire system:
//!
//! 1. **Parse configuration**: load `ephemera.toml` (or `--config`) and
//!    validate it; an invalid configuration never starts the server.
//! 2. **Wire observability**: a `tracing-subscriber` registry with an
//!    `EnvFilter`, a JSON or pretty fmt layer and, when configured, OTLP
//!    span and metric exporters.
//! 3. **Construct infrastructure**: the GitHub adapter, compute backends,
//!    execution store and idle-watch queue, injected into the orchestrator.
//! 4. **Run**: `serve` hosts the webhook intake with the idle-watch consumer
//!    and the delivery recovery watcher; `validate` prints the findings.
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `ephemera serve` | Run the service until SIGINT or SIGTERM |
//! | `ephemera validate` | Check the configuration and exit non-zero on errors |

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod app;
mod config;
mod observability;

use config::{has_errors, Config, DEFAULT_CONFIG_FILE};
use dispatch::FindingLevel;

#[derive(Debug, Parser)]
#[command(name = "ephemera", version, about = "Ephemeral self-hosted runner dispatcher")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, env = "EPHEMERA_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook intake and background loops.
    Serve,
    /// Validate the configuration and print every finding.
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(&cli.config)?;
    match cli.command {
        Command::Validate => {
            let findings = app::validate(&config);
            for finding in &findings {
                let level = match finding.level {
                    FindingLevel::Error => "error",
                    FindingLevel::Warning => "warning",
                };
                println!("{level}: {}", finding.message);
            }
            if has_errors(&findings) {
                return Ok(ExitCode::FAILURE);
            }
            println!(
                "{}: {} backend(s), configuration is valid",
                cli.config.display(),
                config.backends.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let telemetry = observability::init(&config.observability)?;
            let result = app::run(config).await;
            telemetry.shutdown();
            result.map(|()| ExitCode::SUCCESS)
        }
    }
}
