//! simlocal - run a set of local services behind one load balancer.
//!
//! Starts every service from the config file with the configured number of
//! replicas, routes HTTP traffic to them by path prefix, and accepts console
//! commands on stdin (`help` lists them).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use simlocal::config::Config;
use simlocal::constants;
use simlocal::logging::{LogConfig, LogFormat, init_logging};
use simlocal::{app, console};

const AFTER_HELP: &str = "\
CONSOLE COMMANDS:
  help              Show available commands
  list              List running replicas
  isolate <name>    Show logs from one replica only
  showall           Show logs from all replicas
  kill <name>       Stop a replica
  quit              Stop everything and exit

EXAMPLES:
  simlocal                          Use ./simlocal.toml
  simlocal -c services.yaml         YAML config
  simlocal -v --log-format json     Debug logs as JSON on stderr";

#[derive(Parser)]
#[command(name = "simlocal")]
#[command(version)]
#[command(about = "Run local service replicas behind a round-robin load balancer")]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// Config file (.toml, .yaml or .yml)
    #[arg(short, long, default_value = constants::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: pretty, json or compact
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Do not read console commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_logging(&LogConfig::default().level(level).format(cli.log_format));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let input = (!cli.no_console).then(console::spawn_stdin_reader);
    if input.is_some() {
        println!("Type 'help' for available commands.");
    }

    app::run(config, CancellationToken::new(), input).await
}
