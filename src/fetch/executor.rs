use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::time::sleep;

use crate::config::Config;
use crate::error::{AppError, Result};

use super::decode::{decode_page, PageResult};
use super::request::OutputFormat;
use super::retry::RetryPolicy;
use super::transport::{RawResponse, Transport};
use super::NO_DATA_STATUS;

/// Terminal outcome of one attempt cycle that did not fail.
#[derive(Debug)]
pub enum Exchange {
    /// The service answered 472: nothing exists for this slice.
    NoData,
    Response(RawResponse),
}

/// Issues one logical GET: retries transient transport failures within the policy,
/// short-circuits on the no-data status, and fails fast on everything else.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::new(transport, config.retry_policy(), config.request_timeout())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(&self, url: &str, query: &[(String, String)]) -> Result<Exchange> {
        let mut retries = 0;

        loop {
            match self.attempt(url, query).await {
                Ok(response) if response.status.as_u16() == NO_DATA_STATUS => {
                    debug!("No data available for {}", url);
                    return Ok(Exchange::NoData);
                }
                Ok(response) if response.status.is_success() => {
                    return Ok(Exchange::Response(response));
                }
                Ok(response) => {
                    error!("Request to {} returned status {}", url, response.status);
                    return Err(AppError::Status {
                        status: response.status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) if err.is_transient() => {
                    if !self.policy.allows_retry(retries) {
                        error!(
                            "Max retries exceeded for {} after {} attempts: {}",
                            url,
                            retries + 1,
                            err
                        );
                        return Err(AppError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: retries + 1,
                            last_error: err.to_string(),
                        });
                    }
                    retries += 1;
                    warn!(
                        "Request error for {}: {}. Retrying... attempt {}/{}",
                        url,
                        err,
                        retries,
                        self.policy.max_retries()
                    );
                    let delay = self.policy.delay_for(retries);
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                Err(err) => {
                    error!("Request to {} failed: {}", url, err);
                    return Err(err);
                }
            }
        }
    }

    /// Execute and decode. A 472 becomes an empty, headerless page.
    pub async fn fetch_page(
        &self,
        url: &str,
        query: &[(String, String)],
        format: OutputFormat,
    ) -> Result<PageResult> {
        match self.execute(url, query).await? {
            Exchange::NoData => Ok(PageResult::empty()),
            Exchange::Response(response) => {
                let mut page = decode_page(format, &response.body).map_err(|err| {
                    error!(
                        "Unexpected response format from {}: {}. Response format may have changed.",
                        url, err
                    );
                    err
                })?;
                page.next_page = response.next_page();
                Ok(page)
            }
        }
    }

    async fn attempt(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        self.transport.get_within(url, query, self.timeout).await
    }
}
