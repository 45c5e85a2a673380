use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "thetafetch")]
#[command(about = "Bulk option snapshot retrieval from a local market data terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the terminal base URL, e.g. http://localhost:25500/v3
    #[arg(short, long, env = "THETA_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch quotes and greeks for every requested expiration
    Snapshot {
        /// Underlying symbol (e.g. SPY)
        #[arg(short, long)]
        root: String,

        /// Expiration as YYYYMMDD or YYYY-MM-DD; repeat for several. Omit for all.
        #[arg(short, long = "exp")]
        exp: Vec<String>,
    },

    /// Print the terminal's market data connection status
    Status,
}
