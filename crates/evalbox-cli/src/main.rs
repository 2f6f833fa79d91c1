//! `evalbox`: run learner submissions against test cases from the command line.
//!
//! ## Commands
//!
//! - `evaluate`: evaluate a request JSON file (or `-` for stdin) and print the response
//! - `health`: run the built-in health check
//! - `stats`: print engine statistics
//! - `config`: print the effective configuration as TOML

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evalbox_engine::{init_tracing, Engine, EngineConfig, EvaluationRequest};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "evalbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed evaluation of learner code against test cases", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "EVALBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a request and print the response JSON
    Evaluate {
        /// Request file, or `-` to read stdin
        #[arg(default_value = "-")]
        request: String,

        /// Override the request's per-test timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Evaluate the built-in health check submission
    Health,

    /// Print engine statistics as JSON
    Stats,

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn read_request(source: &str) -> Result<EvaluationRequest> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading request file {source}"))?
    };
    serde_json::from_str(&text).context("parsing request JSON")
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Evaluate {
            request,
            timeout,
            pretty,
        } => {
            let mut request = read_request(&request)?;
            if let Some(secs) = timeout {
                request.timeout = Some(secs);
            }
            let engine = Engine::new(config)?;
            let response = engine.evaluate(&request);
            let out = if pretty {
                serde_json::to_string_pretty(&response)?
            } else {
                serde_json::to_string(&response)?
            };
            println!("{out}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let engine = Engine::new(config)?;
            if engine.health_check() {
                println!("healthy");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("unhealthy");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Stats => {
            let engine = Engine::new(config)?;
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    init_tracing(cli.json, level);
    info!(version = env!("CARGO_PKG_VERSION"), "evalbox starting");
    run(cli)
}
