use std::fmt;
use crate::core::types::DocumentFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceRead,
    MissingIdentifier,
    Transport,
    PartialWrite,
    Timeout,
    RetryBudgetExhausted,
    Cancelled,
    InvalidArgument,
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    /// Per-document rejections reported by the store (PartialWrite only)
    pub failures: Vec<DocumentFailure>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context, failures: Vec::new() }
    }

    pub fn partial_write(failures: Vec<DocumentFailure>) -> Self {
        Error {
            kind: ErrorKind::PartialWrite,
            context: format!("{} document(s) rejected by the store", failures.len()),
            failures,
        }
    }

    /// Wrap a retryable error once the retry budget is spent.
    pub fn exhausted(self, batch_id: u64, attempts: usize) -> Self {
        Error {
            kind: ErrorKind::RetryBudgetExhausted,
            context: format!(
                "batch {} failed after {} attempt(s): {:?}: {}",
                batch_id, attempts, self.kind, self.context
            ),
            failures: self.failures,
        }
    }

    /// Only transport-level and per-document store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::PartialWrite
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::SourceRead, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::SourceRead, format!("Malformed JSON: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Transport
        };
        Error::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
