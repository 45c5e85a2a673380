use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use url::Url;

use crate::config::Config;
use crate::error::{AppError, Context, Result};

use super::{NEXT_PAGE_HEADER, NO_MORE_PAGES};

/// Status, headers and body text of one completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Continuation URL for the next page, if the server announced one.
    pub fn next_page(&self) -> Option<String> {
        self.header(NEXT_PAGE_HEADER)
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != NO_MORE_PAGES)
            .map(str::to_string)
    }
}

/// One GET against the upstream service. Implementations must not retry; the
/// executor owns the retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse>;

    /// `get` bounded by `limit`. Wrappers that queue before sending override this so
    /// that only the exchange itself is timed.
    async fn get_within(
        &self,
        url: &str,
        query: &[(String, String)],
        limit: Duration,
    ) -> Result<RawResponse> {
        match timeout(limit, self.get(url, query)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Transport(format!(
                "no response within {:?}",
                limit
            ))),
        }
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        (**self).get(url, query).await
    }

    async fn get_within(
        &self,
        url: &str,
        query: &[(String, String)],
        limit: Duration,
    ) -> Result<RawResponse> {
        (**self).get_within(url, query, limit).await
    }
}

/// Pooled `reqwest` client with a per-attempt timeout.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_connections_per_host)
            .build()
            .context("Failed to construct HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Admission control in front of another transport: at most `max_connections`
/// requests in flight overall and `max_connections_per_host` per destination.
///
/// Permits cover a single attempt, body included, so retries queue behind other
/// callers instead of holding a slot while backing off. Time spent queued for a
/// permit is not part of an attempt's timeout.
pub struct LimitedTransport<T> {
    inner: T,
    total: Arc<Semaphore>,
    per_host_limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl<T: Transport> LimitedTransport<T> {
    pub fn new(inner: T, max_connections: usize, max_connections_per_host: usize) -> Self {
        Self {
            inner,
            total: Arc::new(Semaphore::new(max_connections.max(1))),
            per_host_limit: max_connections_per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(inner: T, config: &Config) -> Self {
        Self::new(
            inner,
            config.max_connections,
            config.max_connections_per_host,
        )
    }

    fn host_semaphore(&self, url: &str) -> Result<Arc<Semaphore>> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::message(format!("URL `{url}` has no host")))?;
        let key = match parsed.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut hosts = self
            .hosts
            .lock()
            .map_err(|_| AppError::message("connection limiter state poisoned"))?;
        let semaphore = hosts
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)));
        Ok(Arc::clone(semaphore))
    }

    /// Wait for a host slot, then a global one. Host first, so callers queued on a
    /// saturated host do not pin global slots.
    async fn admit(&self, url: &str) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let host_permit = self
            .host_semaphore(url)?
            .acquire_owned()
            .await
            .map_err(|_| AppError::message("connection limiter closed"))?;
        let permit = Arc::clone(&self.total)
            .acquire_owned()
            .await
            .map_err(|_| AppError::message("connection limiter closed"))?;

        debug!(
            "GET {} ({} global slots free)",
            url,
            self.total.available_permits()
        );
        Ok((host_permit, permit))
    }
}

#[async_trait]
impl<T: Transport> Transport for LimitedTransport<T> {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let _permits = self.admit(url).await?;
        self.inner.get(url, query).await
    }

    async fn get_within(
        &self,
        url: &str,
        query: &[(String, String)],
        limit: Duration,
    ) -> Result<RawResponse> {
        let _permits = self.admit(url).await?;
        self.inner.get_within(url, query, limit).await
    }
}
