use std::cmp::Ordering;
use std::sync::Arc;

use log::{error, info};
use serde_json::Value;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::request::validate_root;
use crate::fetch::{
    Exchange, FetchRequest, LimitedTransport, PageResult, PaginatingFetcher, RequestExecutor,
    ReqwestTransport, Transport,
};
use crate::records::{normalize_rows, NormalizedTable, RawRow};

use super::snapshots::SnapshotOrchestrator;
use super::status::TerminalStatus;

const MDDS_STATUS_PATH: &str = "terminal/mdds/status";

/// Entry point for callers: owns the connection-limited transport and hands out the
/// fetch pipelines that share it.
pub struct MarketDataClient {
    config: Arc<Config>,
    executor: Arc<RequestExecutor>,
    fetcher: Arc<PaginatingFetcher>,
}

impl MarketDataClient {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(Arc::new(transport), config)
    }

    /// Build on top of an arbitrary transport. The configured connection ceilings are
    /// still enforced in front of it.
    pub fn with_transport(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        config.validate()?;
        let limited: Arc<dyn Transport> =
            Arc::new(LimitedTransport::from_config(transport, &config));
        let config = Arc::new(config);
        let executor = Arc::new(RequestExecutor::from_config(limited, &config));
        let fetcher = Arc::new(PaginatingFetcher::new(
            Arc::clone(&executor),
            Arc::clone(&config),
        ));
        Ok(Self {
            config,
            executor,
            fetcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshots(&self) -> SnapshotOrchestrator {
        SnapshotOrchestrator::new(Arc::clone(&self.fetcher))
    }

    /// Every page of `request`, flattened and renamed.
    pub async fn fetch_table(&self, request: &FetchRequest) -> Result<NormalizedTable> {
        let merged = self.fetcher.fetch_all(request).await?;
        normalize_rows(&merged.rows, &merged.columns)
    }

    /// A single page where exhausting the retry budget is logged and reported as an
    /// empty, headerless page instead of an error.
    pub async fn fetch_rows_lenient(&self, request: &FetchRequest) -> Result<PageResult> {
        let url = request.url(&self.config);
        match self
            .executor
            .fetch_page(&url, &request.query_pairs(), request.output_format())
            .await
        {
            Ok(page) => Ok(page),
            Err(AppError::RetriesExhausted { attempts, .. }) => {
                error!(
                    "Max retries exceeded for {} ({} attempts). Returning no rows.",
                    request, attempts
                );
                Ok(PageResult::empty())
            }
            Err(err) => Err(err),
        }
    }

    /// Run `request` once per root and stack the results.
    pub async fn multi_root_table<S: AsRef<str>>(
        &self,
        roots: &[S],
        request: &FetchRequest,
    ) -> Result<NormalizedTable> {
        let mut tables = Vec::with_capacity(roots.len());
        for root in roots {
            let root = root.as_ref();
            validate_root(root)?;
            tables.push(self.fetch_table(&request.clone().root(root)).await?);
        }
        Ok(NormalizedTable::concat(tables))
    }

    /// Run a list-style `request` (expirations, strikes, ...) once per root and return
    /// the distinct values, sorted. Numbers sort numerically and ahead of text.
    pub async fn multi_root_list<S: AsRef<str>>(
        &self,
        roots: &[S],
        request: &FetchRequest,
    ) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for root in roots {
            let root = root.as_ref();
            validate_root(root)?;
            let page = self.fetcher.fetch_all(&request.clone().root(root)).await?;
            for row in page.rows {
                match row {
                    RawRow::Values(cells) => values.extend(cells),
                    RawRow::Keyed(object) => values.extend(object.into_iter().map(|(_, v)| v)),
                    RawRow::Contract { .. } => {
                        return Err(AppError::malformed(
                            "list endpoint returned contract rows",
                        ))
                    }
                }
            }
        }
        values.sort_by(compare_values);
        values.dedup_by(|a, b| compare_values(a, b) == Ordering::Equal);
        Ok(values.iter().map(value_to_string).collect())
    }

    /// Connection state the local terminal reports for its market data link.
    pub async fn terminal_status(&self) -> Result<TerminalStatus> {
        let url = self.config.endpoint_url(MDDS_STATUS_PATH);
        info!("pinging url: {}", url);
        let status = match self.executor.execute(&url, &[]).await? {
            Exchange::Response(response) => TerminalStatus::parse(&response.body),
            Exchange::NoData => TerminalStatus::Unknown(String::new()),
        };
        Ok(status)
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => value_to_string(a).cmp(&value_to_string(b)),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
