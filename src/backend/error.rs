//! Backend error types

use thiserror::Error;

/// Backend error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// HTTP status, when the backend answered at all
    pub status: Option<u16>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    #[allow(dead_code)] // Used in tests
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Rejected, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServerError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Decode, message)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            404 => BackendErrorKind::NotFound,
            400..=499 => BackendErrorKind::Rejected,
            _ => BackendErrorKind::ServerError,
        };
        Self::new(kind, format!("backend returned {status}: {body}")).with_status(status)
    }

    /// True when the backend understood the request and refused it
    pub fn is_rejection(&self) -> bool {
        self.kind.is_rejection()
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Connection failures, timeouts
    Network,
    /// 4xx other than 404 - the backend refused the request
    Rejected,
    /// 5xx
    ServerError,
    /// 404, or a record the bot relies on is missing
    NotFound,
    /// Response body did not have the expected shape
    Decode,
}

impl BackendErrorKind {
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::Rejected)
    }
}
