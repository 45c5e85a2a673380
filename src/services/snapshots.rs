use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{error, info, warn};

use crate::error::{AppError, Result};
use crate::fetch::request::{validate_expiration, validate_root};
use crate::fetch::{Endpoint, FetchRequest, OutputFormat, PaginatingFetcher, ALL_EXPIRATIONS};
use crate::records::{normalize_rows, NormalizedTable, Tabular};

/// Which bulk snapshot a task pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Quotes,
    Greeks,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Greeks, DataKind::Quotes];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Quotes => "quotes",
            DataKind::Greeks => "greeks",
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            DataKind::Quotes => Endpoint::BulkQuote,
            DataKind::Greeks => Endpoint::BulkGreeks,
        }
    }

    /// Columns that are unreliable for this kind and never reach the caller.
    pub fn dropped_columns(&self) -> &'static [&'static str] {
        match self {
            DataKind::Quotes => &[
                "ms_of_day",
                "bid_condition",
                "bid_exchange",
                "ask_exchange",
                "ask_condition",
            ],
            DataKind::Greeks => &["ms_of_day2", "bid", "ask"],
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Identity of one task in the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub kind: DataKind,
    pub exp: String,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exp={}", self.kind, self.exp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Succeeded(NormalizedTable),
    Failed(String),
}

/// One (data-kind, expiration) fetch. Leaves `Pending` exactly once.
#[derive(Debug, Clone)]
pub struct FetchTask {
    key: TaskKey,
    request: FetchRequest,
    state: TaskState,
}

impl FetchTask {
    fn new(kind: DataKind, root: &str, exp: &str) -> Self {
        let request = FetchRequest::new(kind.endpoint())
            .root(root)
            .exp(exp)
            .format(OutputFormat::Csv);
        Self {
            key: TaskKey {
                kind,
                exp: exp.to_string(),
            },
            request,
            state: TaskState::Pending,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    fn settle(mut self, result: Result<NormalizedTable>) -> Self {
        if self.state != TaskState::Pending {
            warn!("Ignoring second outcome for settled task {}", self.key);
            return self;
        }
        self.state = match result {
            Ok(table) => TaskState::Succeeded(table),
            Err(err) => TaskState::Failed(err.to_string()),
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub key: TaskKey,
    pub reason: String,
}

/// Terminal states of every task in one run: tables for the successes, reasons for
/// the failures.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    tables: BTreeMap<TaskKey, NormalizedTable>,
    failures: Vec<TaskFailure>,
}

impl FetchOutcome {
    fn record(&mut self, task: FetchTask) {
        match task.state {
            TaskState::Succeeded(table) => {
                self.tables.insert(task.key, table);
            }
            TaskState::Failed(reason) => {
                error!("Error fetching {}: {}", task.key, reason);
                self.failures.push(TaskFailure {
                    key: task.key,
                    reason,
                });
            }
            TaskState::Pending => {
                error!("Task {} finished without an outcome", task.key);
                self.failures.push(TaskFailure {
                    key: task.key,
                    reason: "task finished without an outcome".to_string(),
                });
            }
        }
    }

    pub fn get(&self, kind: DataKind, exp: &str) -> Option<&NormalizedTable> {
        self.tables.get(&TaskKey {
            kind,
            exp: exp.to_string(),
        })
    }

    /// `(data-kind, expiration, table)` for every successful task.
    pub fn entries(&self) -> impl Iterator<Item = (DataKind, &str, &NormalizedTable)> {
        self.tables
            .iter()
            .map(|(key, table)| (key.kind, key.exp.as_str(), table))
    }

    pub fn into_entries(self) -> Vec<(DataKind, String, NormalizedTable)> {
        self.tables
            .into_iter()
            .map(|(key, table)| (key.kind, key.exp, table))
            .collect()
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Fans bulk snapshot fetches out over every (expiration × data-kind) pair.
///
/// All tasks run concurrently on the caller's task; the shared transport's
/// connection ceilings are the only throttle. A failing task is logged and left out
/// of the result without disturbing its siblings.
pub struct SnapshotOrchestrator {
    fetcher: Arc<PaginatingFetcher>,
}

impl SnapshotOrchestrator {
    pub fn new(fetcher: Arc<PaginatingFetcher>) -> Self {
        Self { fetcher }
    }

    /// One pending task per (expiration × data-kind). Duplicate expirations collapse.
    pub fn build_tasks<S: AsRef<str>>(expirations: &[S], root: &str) -> Result<Vec<FetchTask>> {
        validate_root(root)?;
        if expirations.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one expiration (or \"0\" for all) is required".to_string(),
            ));
        }

        let root = root.trim();
        let mut seen: Vec<&str> = Vec::new();
        let mut tasks = Vec::new();
        for exp in expirations {
            let exp = exp.as_ref().trim();
            validate_expiration(exp)?;
            if seen.contains(&exp) {
                continue;
            }
            seen.push(exp);
            for kind in DataKind::ALL {
                tasks.push(FetchTask::new(kind, root, exp));
            }
        }
        Ok(tasks)
    }

    pub async fn fetch_all_data<S: AsRef<str>>(
        &self,
        expirations: &[S],
        root: &str,
    ) -> Result<FetchOutcome> {
        let tasks = Self::build_tasks(expirations, root)?;
        let total = tasks.len();
        info!("Dispatching {} snapshot tasks for {}", total, root);

        let settled: Vec<FetchTask> = stream::iter(tasks)
            .map(|task| run_task(Arc::clone(&self.fetcher), task))
            .buffer_unordered(total.max(1))
            .collect()
            .await;

        let mut outcome = FetchOutcome::default();
        for task in settled {
            outcome.record(task);
        }

        info!(
            "Snapshot run for {} finished: {} succeeded, {} failed",
            root,
            outcome.len(),
            outcome.failures().len()
        );
        Ok(outcome)
    }

    pub async fn fetch_quotes_greeks_all_exps(&self, root: &str) -> Result<FetchOutcome> {
        self.fetch_all_data(&[ALL_EXPIRATIONS], root).await
    }
}

async fn run_task(fetcher: Arc<PaginatingFetcher>, task: FetchTask) -> FetchTask {
    let result = fetch_and_normalize(&fetcher, &task).await;
    task.settle(result)
}

async fn fetch_and_normalize(fetcher: &PaginatingFetcher, task: &FetchTask) -> Result<NormalizedTable> {
    let merged = fetcher.fetch_all(&task.request).await?;
    let table = normalize_rows(&merged.rows, &merged.columns)?;
    if table.columns().is_empty() {
        return Ok(table);
    }

    let (table, missing) = table.without_columns(task.key.kind.dropped_columns());
    if !missing.is_empty() {
        warn!(
            "Columns {:?} expected for {} were not present; upstream schema may have changed",
            missing, task.key
        );
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffKind, Config};
    use crate::fetch::testing::{ScriptedTransport, Step};
    use crate::fetch::Transport;
    use crate::services::MarketDataClient;
    use serde_json::json;
    use std::time::Duration;

    const BASE: &str = "http://localhost:25500/v3";
    const QUOTES_CSV: &str = "root,expiration,strike,right,ms_of_day,bid_size,bid_exchange,bid,bid_condition,ask_size,ask_exchange,ask,ask_condition\n\
        SPY,20250117,450000,C,34200000,10,1,5.10,50,12,1,5.20,50\n\
        SPY,20250117,455000,C,34200000,8,1,3.40,50,9,1,3.55,50\n";
    const GREEKS_CSV: &str = "root,expiration,strike,right,ms_of_day,bid,ask,delta,ms_of_day2,underlying_price\n\
        SPY,20250117,450000,C,34200000,5.10,5.20,0.55,34200000,451.25\n";

    fn test_config() -> Config {
        let mut config = Config::builtin().with_base_url(BASE);
        config.retry.backoff = BackoffKind::None;
        config.retry.max_retries = 2;
        config
    }

    fn orchestrator(transport: &Arc<ScriptedTransport>, config: Config) -> SnapshotOrchestrator {
        MarketDataClient::with_transport(Arc::clone(transport) as Arc<dyn Transport>, config)
            .expect("client")
            .snapshots()
    }

    fn bulk_transport() -> ScriptedTransport {
        ScriptedTransport::new()
            .on(
                &format!("{BASE}/bulk_snapshot/option/quote"),
                vec![Step::ok(QUOTES_CSV)],
            )
            .on(
                &format!("{BASE}/bulk_snapshot/option/greeks"),
                vec![Step::ok(GREEKS_CSV)],
            )
    }

    #[test]
    fn builds_one_task_per_expiration_and_kind() {
        let tasks =
            SnapshotOrchestrator::build_tasks(&["20250117", "20250221", "20250117"], "SPY")
                .unwrap();

        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|task| task.state() == &TaskState::Pending));
        assert!(tasks
            .iter()
            .any(|task| task.key().kind == DataKind::Quotes && task.key().exp == "20250221"));
        assert!(tasks[0]
            .request()
            .query_pairs()
            .contains(&("use_csv".to_string(), "true".to_string())));
    }

    #[test]
    fn rejects_bad_arguments_upfront() {
        assert!(matches!(
            SnapshotOrchestrator::build_tasks(&["20250117"], ""),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            SnapshotOrchestrator::build_tasks::<&str>(&[], "SPY"),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(SnapshotOrchestrator::build_tasks(&["next friday"], "SPY").is_err());
    }

    #[test]
    fn settled_task_keeps_first_outcome() {
        let task = FetchTask::new(DataKind::Quotes, "SPY", "0")
            .settle(Err(AppError::malformed("bad")))
            .settle(Ok(NormalizedTable::empty()));

        assert!(matches!(task.state(), TaskState::Failed(_)));
    }

    #[tokio::test]
    async fn isolates_failed_task_from_siblings() {
        let transport = Arc::new(bulk_transport().on_query(
            &format!("{BASE}/bulk_snapshot/option/greeks"),
            &[("exp", "2025-01-17")],
            vec![Step::status(410, "Gone")],
        ));

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&["2025-01-17", "2025-02-21"], "SPY")
            .await
            .expect("aggregate");

        assert_eq!(transport.calls(), 4);
        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(
            outcome.failures()[0].key,
            TaskKey {
                kind: DataKind::Greeks,
                exp: "2025-01-17".to_string()
            }
        );
        assert!(outcome.get(DataKind::Greeks, "2025-01-17").is_none());
        assert!(outcome.get(DataKind::Quotes, "2025-01-17").is_some());
        assert!(outcome.get(DataKind::Greeks, "2025-02-21").is_some());
    }

    #[tokio::test]
    async fn malformed_body_fails_only_its_task() {
        let transport = Arc::new(bulk_transport().on_query(
            &format!("{BASE}/bulk_snapshot/option/quote"),
            &[("exp", "20250221")],
            vec![Step::ok("root,bid,ask\nSPY,1.0\n")],
        ));

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&["20250117", "20250221"], "SPY")
            .await
            .expect("aggregate");

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].key.kind, DataKind::Quotes);
        assert_eq!(transport.calls(), 4, "malformed bodies are not retried");
    }

    #[tokio::test]
    async fn exhausted_retries_become_task_failure() {
        let transport = Arc::new(bulk_transport().on(
            &format!("{BASE}/bulk_snapshot/option/greeks"),
            vec![Step::transport_error("connection reset")],
        ));

        let outcome = orchestrator(&transport, test_config())
            .fetch_quotes_greeks_all_exps("SPY")
            .await
            .expect("aggregate");

        assert_eq!(outcome.len(), 1);
        assert!(outcome.get(DataKind::Quotes, ALL_EXPIRATIONS).is_some());
        assert_eq!(outcome.failures().len(), 1);
        assert!(outcome.failures()[0].reason.contains("3 attempts"));
        assert_eq!(transport.calls(), 1 + 3);
    }

    #[tokio::test]
    async fn drops_kind_specific_columns_after_renaming() {
        let transport = Arc::new(bulk_transport());

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&["20250117"], "SPY")
            .await
            .expect("aggregate");

        let quotes = outcome.get(DataKind::Quotes, "20250117").expect("quotes");
        assert_eq!(
            quotes.columns(),
            ["symbol", "exp", "strike_milli", "right", "bid_size", "bid", "ask_size", "ask"]
        );
        assert_eq!(quotes.row_count(), 2);
        assert_eq!(quotes.cell(1, "strike_milli"), Some(&json!(455000)));

        let greeks = outcome.get(DataKind::Greeks, "20250117").expect("greeks");
        assert_eq!(
            greeks.columns(),
            ["symbol", "exp", "strike_milli", "right", "ms_of_day", "delta", "underlying"]
        );
        assert_eq!(greeks.cell(0, "underlying"), Some(&json!(451.25)));
    }

    #[tokio::test]
    async fn no_data_slice_is_an_empty_success() {
        let transport = Arc::new(
            bulk_transport().on_query(
                &format!("{BASE}/bulk_snapshot/option/quote"),
                &[("exp", "20250117")],
                vec![Step::status(472, "")],
            ),
        );

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&["20250117"], "SPY")
            .await
            .expect("aggregate");

        let quotes = outcome.get(DataKind::Quotes, "20250117").expect("empty quotes");
        assert!(quotes.is_empty());
        assert!(outcome.failures().is_empty());
    }

    #[tokio::test]
    async fn never_exceeds_per_host_connection_ceiling() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_default(Step::ok(GREEKS_CSV))
                .with_latency(Duration::from_millis(20)),
        );
        let expirations: Vec<String> = (1..=28)
            .map(|day| format!("202502{day:02}"))
            .collect();

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&expirations, "SPY")
            .await
            .expect("aggregate");

        assert_eq!(transport.calls(), 56);
        assert_eq!(outcome.len() + outcome.failures().len(), 56);
        assert!(transport.peak_in_flight() <= 30);
        assert!(transport.peak_in_flight() > 1, "tasks should overlap");
    }

    #[tokio::test]
    async fn entries_expose_kind_expiration_table_triples() {
        let transport = Arc::new(bulk_transport());

        let outcome = orchestrator(&transport, test_config())
            .fetch_all_data(&["20250117"], "SPY")
            .await
            .expect("aggregate");

        let kinds: Vec<(DataKind, &str)> =
            outcome.entries().map(|(kind, exp, _)| (kind, exp)).collect();
        assert_eq!(
            kinds,
            vec![(DataKind::Quotes, "20250117"), (DataKind::Greeks, "20250117")]
        );
    }
}
