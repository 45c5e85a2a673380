mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;

use cli::{Cli, Commands};
use thetafetch::{Config, MarketDataClient, Tabular, ALL_EXPIRATIONS};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config(&cli)?;
    let client = MarketDataClient::new(config).context("Failed to build market data client")?;

    match cli.command {
        Commands::Snapshot { ref root, ref exp } => run_snapshot(&client, root, exp).await?,
        Commands::Status => {
            let status = client
                .terminal_status()
                .await
                .context("Failed to query terminal status")?;
            if !status.is_healthy() {
                warn!("Terminal connection status: {}", status);
            }
            println!("{}", status);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::builtin(),
    };

    let config = match &cli.base_url {
        Some(base_url) => config.with_base_url(base_url.clone()),
        None => config,
    };
    config.validate()?;
    Ok(config)
}

async fn run_snapshot(client: &MarketDataClient, root: &str, exp: &[String]) -> Result<()> {
    let expirations: Vec<String> = if exp.is_empty() {
        vec![ALL_EXPIRATIONS.to_string()]
    } else {
        exp.to_vec()
    };

    let outcome = client
        .snapshots()
        .fetch_all_data(&expirations, root)
        .await
        .context("Failed to start snapshot run")?;

    for (kind, exp, table) in outcome.entries() {
        println!(
            "{:<7} exp={:<10} rows={:>8} columns={}",
            kind,
            exp,
            table.row_count(),
            table.columns().join(",")
        );
    }
    for failure in outcome.failures() {
        println!("{:<7} exp={:<10} FAILED: {}", failure.key.kind, failure.key.exp, failure.reason);
    }
    println!(
        "{} table(s) fetched, {} failure(s)",
        outcome.len(),
        outcome.failures().len()
    );
    Ok(())
}
