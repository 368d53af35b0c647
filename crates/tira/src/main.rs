use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tira_models::TiraConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tira", about = "Trading Investment Research Agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tira.toml")]
    config: String,

    /// Ticker symbol to analyze
    #[arg(short, long)]
    ticker: String,

    /// Trading date (YYYY-MM-DD)
    #[arg(short, long)]
    date: NaiveDate,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the outcome JSON (respects RUST_LOG)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: TiraConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

    let orchestrator =
        tira::build_orchestrator(&config).context("Failed to build orchestrator")?;

    let outcome = tira::run(&orchestrator, &cli.ticker, cli.date).await;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{output}");

    if !outcome.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}
