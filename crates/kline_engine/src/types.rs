use std::fmt;
use std::time::Duration;

/// How the orchestrator should react to a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Transient; try again later, optionally after the server-suggested wait.
    Retryable { hint: Option<Duration> },
    /// Permanent for this series.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
    pub classification: Classification,
}

impl FetchError {
    /// Builds an error classified by its kind alone (no retry hint).
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let classification = if kind.is_transient() {
            Classification::Retryable { hint: None }
        } else {
            Classification::Fatal
        };
        Self {
            kind,
            message: message.into(),
            classification,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.classification, Classification::Retryable { .. })
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        match self.classification {
            Classification::Retryable { hint } => hint,
            Classification::Fatal => None,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    MalformedBody,
}

impl FailureKind {
    /// Rate limiting (429, 418), server errors, transport trouble and
    /// undecodable bodies are worth another attempt; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureKind::HttpStatus(code) => matches!(code, 418 | 429 | 500..=599),
            FailureKind::Timeout
            | FailureKind::Network
            | FailureKind::TooLarge { .. }
            | FailureKind::MalformedBody => true,
            FailureKind::InvalidUrl => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::MalformedBody => write!(f, "malformed response body"),
        }
    }
}
