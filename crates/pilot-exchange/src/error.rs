//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The exchange refused the request (bad symbol, insufficient balance, ...).
    #[error("Exchange rejected request ({code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("Empty response: {0}")]
    EmptyResponse(String),

    #[error("Invalid bar window: {0}")]
    InvalidBars(#[from] pilot_core::CoreError),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("API credentials not configured")]
    MissingCredentials,

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl ExchangeError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::EmptyResponse(_) | Self::InvalidBars(_) => {
                true
            }
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Api { .. } | Self::Parse(_) | Self::MissingCredentials | Self::HttpClient(_) => {
                false
            }
        }
    }

    /// The exchange answered and said no.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::MissingCredentials)
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Http { .. } => "http",
            Self::Api { .. } => "api",
            Self::EmptyResponse(_) => "empty",
            Self::InvalidBars(_) => "invalid",
            Self::Parse(_) => "parse",
            Self::MissingCredentials => "credentials",
            Self::HttpClient(_) => "client",
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else if e.is_builder() {
            Self::HttpClient(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
