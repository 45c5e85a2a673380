pub mod config;
pub mod error;
pub mod fetch;
pub mod records;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use fetch::{FetchRequest, OutputFormat, ALL_EXPIRATIONS};
pub use records::{NormalizedTable, Tabular};
pub use services::{DataKind, FetchOutcome, MarketDataClient, SnapshotOrchestrator};

/// Fetch quotes and greeks for `root` across `expirations` with a fresh client.
pub async fn fetch_all_data<S: AsRef<str>>(
    config: Config,
    expirations: &[S],
    root: &str,
) -> Result<FetchOutcome> {
    let client = MarketDataClient::new(config)?;
    client.snapshots().fetch_all_data(expirations, root).await
}

/// [`fetch_all_data`] for every listed expiration at once.
pub async fn fetch_quotes_greeks_all_exps(config: Config, root: &str) -> Result<FetchOutcome> {
    fetch_all_data(config, &[ALL_EXPIRATIONS], root).await
}
