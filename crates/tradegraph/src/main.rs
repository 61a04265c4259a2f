use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tradegraph::models::config::TradegraphConfig;
use tradegraph::models::request::AnalysisRequest;

#[derive(Parser, Debug)]
#[command(name = "tradegraph", about = "Multi-stage trading recommendation workflow")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tradegraph.toml", global = true)]
    config: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an analysis for an AnalysisRequest JSON
    Analyze {
        /// Read the request from a file instead of stdin
        #[arg(short, long)]
        input: Option<String>,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Print an archived run
    Show {
        run_id: String,

        #[arg(long)]
        pretty: bool,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &str) -> Result<TradegraphConfig> {
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| "Failed to parse config")
}

fn read_request(input: Option<&str>) -> Result<AnalysisRequest> {
    let request_json = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input: {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    serde_json::from_str(&request_json).context("Failed to parse AnalysisRequest JSON")
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Analyze { input, pretty } => {
            let request = read_request(input.as_deref())?;
            let selection = tradegraph::resolve_selection(&config, &request)
                .context("Invalid analyst selection")?;
            let engine =
                tradegraph::build_engine(&config, &selection).context("Failed to build engine")?;
            let archive = tradegraph::open_archive(&config).context("Failed to open run archive")?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; stopping at the next stage boundary");
                    on_signal.cancel();
                }
            });

            let response =
                tradegraph::analyze(&engine, &request, archive.as_ref(), &cancel).await;
            print_json(&response, pretty)?;
        }
        Command::Show { run_id, pretty } => {
            let archive = tradegraph::open_archive(&config)
                .context("Failed to open run archive")?
                .context("No [persistence] section configured")?;
            let response = archive
                .get_str(&run_id)
                .await
                .with_context(|| format!("Failed to read run {run_id}"))?
                .with_context(|| format!("Run {run_id} not found"))?;
            print_json(&response, pretty)?;
        }
    }

    Ok(())
}
