use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request to {url} failed with status {status}")]
    Status { status: u16, url: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("row {row} has {actual} values but the header declares {expected} columns")]
    ColumnMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn malformed<T: Into<String>>(msg: T) -> Self {
        AppError::Malformed(msg.into())
    }

    /// Connection-level failures worth another attempt. Anything describing the
    /// payload itself (decode errors, bad status, shape mismatches) is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transport(_) => true,
            AppError::Reqwest(err) => {
                !err.is_decode()
                    && !err.is_builder()
                    && !err.is_status()
                    && (err.is_timeout() || err.is_connect() || err.is_request() || err.is_body())
            }
            _ => false,
        }
    }
}
