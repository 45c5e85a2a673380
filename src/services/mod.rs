pub mod client;
pub mod snapshots;
pub mod status;

pub use client::MarketDataClient;
pub use snapshots::{
    DataKind, FetchOutcome, FetchTask, SnapshotOrchestrator, TaskFailure, TaskKey, TaskState,
};
pub use status::TerminalStatus;
