use std::fmt;

use chrono::NaiveDate;

use crate::config::Config;
use crate::error::{AppError, Result};

/// Expiration token meaning "every listed expiration".
pub const ALL_EXPIRATIONS: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    BulkQuote,
    BulkGreeks,
    /// Any other resource, relative to the configured base URL.
    Path(String),
}

impl Endpoint {
    pub fn path(&self) -> &str {
        match self {
            Endpoint::BulkQuote => "bulk_snapshot/option/quote",
            Endpoint::BulkGreeks => "bulk_snapshot/option/greeks",
            Endpoint::Path(path) => path.as_str(),
        }
    }

    pub fn url(&self, config: &Config) -> String {
        config.endpoint_url(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Ndjson,
    Csv,
}

impl OutputFormat {
    fn query_pair(&self) -> Option<(&'static str, &'static str)> {
        match self {
            OutputFormat::Json => None,
            OutputFormat::Ndjson => Some(("format", "ndjson")),
            OutputFormat::Csv => Some(("use_csv", "true")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Right {
    Call,
    Put,
}

impl Right {
    pub fn as_str(&self) -> &'static str {
        match self {
            Right::Call => "C",
            Right::Put => "P",
        }
    }
}

/// Immutable description of one logical fetch. Paging produces a new request via
/// [`FetchRequest::with_cursor`] instead of mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    endpoint: Endpoint,
    root: Option<String>,
    exp: Option<String>,
    strike_milli: Option<i64>,
    right: Option<Right>,
    filters: Vec<(String, String)>,
    format: OutputFormat,
    cursor: Option<String>,
}

impl FetchRequest {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            root: None,
            exp: None,
            strike_milli: None,
            right: None,
            filters: Vec::new(),
            format: OutputFormat::default(),
            cursor: None,
        }
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn exp(mut self, exp: impl Into<String>) -> Self {
        self.exp = Some(exp.into());
        self
    }

    pub fn strike_milli(mut self, strike: i64) -> Self {
        self.strike_milli = Some(strike);
        self
    }

    pub fn right(mut self, right: Right) -> Self {
        self.right = Some(right);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_cursor(&self, cursor: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.cursor = Some(cursor.into());
        next
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn root_symbol(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn expiration(&self) -> Option<&str> {
        self.exp.as_deref()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.format
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// URL to request: the cursor when paging, the endpoint otherwise.
    pub fn url(&self, config: &Config) -> String {
        match &self.cursor {
            Some(cursor) => cursor.clone(),
            None => self.endpoint.url(config),
        }
    }

    /// Query parameters for this request. Continuation URLs are self-contained, so a
    /// request carrying a cursor sends none.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        if self.cursor.is_some() {
            return Vec::new();
        }

        let mut pairs = Vec::new();
        if let Some(root) = &self.root {
            pairs.push(("root".to_string(), root.clone()));
        }
        if let Some(exp) = &self.exp {
            pairs.push(("exp".to_string(), exp.clone()));
        }
        if let Some(strike) = self.strike_milli {
            pairs.push(("strike".to_string(), strike.to_string()));
        }
        if let Some(right) = self.right {
            pairs.push(("right".to_string(), right.as_str().to_string()));
        }
        pairs.extend(self.filters.iter().cloned());
        if let Some((key, value)) = self.format.query_pair() {
            pairs.push((key.to_string(), value.to_string()));
        }
        pairs
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint.path())?;
        if let Some(root) = &self.root {
            write!(f, " root={root}")?;
        }
        if let Some(exp) = &self.exp {
            write!(f, " exp={exp}")?;
        }
        Ok(())
    }
}

/// Reject symbols the service cannot possibly resolve.
pub fn validate_root(root: &str) -> Result<()> {
    let trimmed = root.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidArgument(
            "instrument symbol must not be empty".to_string(),
        ));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(AppError::InvalidArgument(format!(
            "instrument symbol `{root}` contains unsupported characters"
        )));
    }
    Ok(())
}

/// Expirations are `"0"` (all) or a calendar date written as `YYYYMMDD` or `YYYY-MM-DD`.
pub fn validate_expiration(exp: &str) -> Result<()> {
    if exp == ALL_EXPIRATIONS {
        return Ok(());
    }
    let parsed = NaiveDate::parse_from_str(exp, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(exp, "%Y-%m-%d"));
    match parsed {
        Ok(_) => Ok(()),
        Err(_) => Err(AppError::InvalidArgument(format!(
            "expiration `{exp}` is neither \"0\" nor a YYYYMMDD / YYYY-MM-DD date"
        ))),
    }
}
