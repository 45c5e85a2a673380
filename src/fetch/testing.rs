//! Scripted transport double used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;

use crate::error::{AppError, Result};

use super::transport::{RawResponse, Transport};
use super::NEXT_PAGE_HEADER;

#[derive(Debug, Clone)]
pub enum Step {
    Respond {
        status: u16,
        body: String,
        next_page: Option<String>,
    },
    Fail(String),
}

impl Step {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Step::Respond {
            status,
            body: body.into(),
            next_page: None,
        }
    }

    pub fn page(body: impl Into<String>, next_page: &str) -> Self {
        Step::Respond {
            status: 200,
            body: body.into(),
            next_page: Some(next_page.to_string()),
        }
    }

    pub fn transport_error(msg: &str) -> Self {
        Step::Fail(msg.to_string())
    }
}

struct Script {
    url: String,
    filters: Vec<(String, String)>,
    steps: VecDeque<Step>,
}

impl Script {
    fn matches(&self, url: &str, query: &[(String, String)]) -> bool {
        self.url == url && self.filters.iter().all(|filter| query.contains(filter))
    }

    /// The last step repeats forever once the earlier ones are used up.
    fn next_step(&mut self) -> Option<Step> {
        if self.steps.len() > 1 {
            self.steps.pop_front()
        } else {
            self.steps.front().cloned()
        }
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<Vec<Script>>,
    default: Option<Step>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, step: Step) -> Self {
        self.default = Some(step);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn on(self, url: &str, steps: Vec<Step>) -> Self {
        self.on_query(url, &[], steps)
    }

    /// Script responses for requests to `url` whose query contains every `filters` pair.
    /// Scripts with more filters take precedence.
    pub fn on_query(self, url: &str, filters: &[(&str, &str)], steps: Vec<Step>) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.push(Script {
                url: url.to_string(),
                filters: filters
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                steps: steps.into(),
            });
            scripts.sort_by(|a, b| b.filters.len().cmp(&a.filters.len()));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, url: &str, query: &[(String, String)]) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|script| script.matches(url, query))
            .and_then(Script::next_step)
            .or_else(|| self.default.clone())
            .unwrap_or_else(|| Step::status(404, "not found"))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), query.to_vec()));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self.next_step(url, query);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Fail(msg) => Err(AppError::Transport(msg)),
            Step::Respond {
                status,
                body,
                next_page,
            } => {
                let mut response = RawResponse::new(
                    StatusCode::from_u16(status).expect("valid status code"),
                    body,
                );
                if let Some(next) = next_page {
                    response.headers.insert(
                        NEXT_PAGE_HEADER,
                        HeaderValue::from_str(&next).expect("valid header value"),
                    );
                }
                Ok(response)
            }
        }
    }
}
