//! tqs-remote
//!
//! Remote quiz-result source: the server's view of an account's quiz result.
//!
//! This crate owns the source trait and the HTTP implementation. It does
//! **not** touch the local cache; callers decide what to do with what comes
//! back.

pub mod http;

use std::fmt;

use tqs_schemas::QuizResult;

pub use http::{HttpClientSettings, HttpQuizStateClient};

// ---------------------------------------------------------------------------
// Push outcome
// ---------------------------------------------------------------------------

/// Server acknowledgement of an accepted push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAck {
    /// HTTP status of the accepted request.
    pub status: u16,
}

/// Errors a push may produce, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Connection / DNS / TLS / body failure.
    Transport(String),
    /// The request exceeded its deadline.
    Timeout,
    /// 5xx, 408 or 429 from the server.
    Server { status: u16 },
    /// 401 / 403. The token may be refreshed, so this is retried.
    Unauthorized { status: u16 },
    /// Any other 4xx: the server will never accept this payload.
    Rejected { status: u16, message: String },
    /// The result cannot be turned into a push payload (incomplete).
    InvalidPayload(String),
}

impl PushError {
    /// Transient errors are retried by the background sync; permanent ones
    /// leave the cache record `failed`.
    pub fn is_retriable(&self) -> bool {
        match self {
            PushError::Transport(_)
            | PushError::Timeout
            | PushError::Server { .. }
            | PushError::Unauthorized { .. } => true,
            PushError::Rejected { .. } | PushError::InvalidPayload(_) => false,
        }
    }

    /// Map an unsuccessful HTTP status to a push error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => PushError::Unauthorized { status },
            408 | 429 => PushError::Server { status },
            500..=599 => PushError::Server { status },
            _ => PushError::Rejected {
                status,
                message: message.into(),
            },
        }
    }
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Transport(msg) => write!(f, "transport error: {msg}"),
            PushError::Timeout => write!(f, "request timed out"),
            PushError::Server { status } => write!(f, "server error status={status}"),
            PushError::Unauthorized { status } => write!(f, "unauthorized status={status}"),
            PushError::Rejected { status, message } => {
                write!(f, "rejected status={status}: {message}")
            }
            PushError::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for PushError {}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Server-side quiz result contract.
///
/// Object-safe so callers can hold an `Arc<dyn RemoteResultSource>`;
/// `Send + Sync` so it can cross task boundaries.
#[async_trait::async_trait]
pub trait RemoteResultSource: Send + Sync {
    /// Human-readable name (e.g. `"http"`).
    fn source_name(&self) -> &'static str;

    /// Server's view of the account's result.
    ///
    /// Never fails: any non-success outcome (including 401, transport errors
    /// and undecodable bodies) is `None`. Absence of a confirmed remote result
    /// degrades to "rely on local".
    async fn fetch(&self, account_id: &str, auth_token: Option<&str>) -> Option<QuizResult>;

    /// Push a local result to the server.
    async fn push(
        &self,
        account_id: &str,
        result: &QuizResult,
        auth_token: Option<&str>,
    ) -> Result<PushAck, PushError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(PushError::from_status(500, "").is_retriable());
        assert!(PushError::from_status(503, "").is_retriable());
        assert!(PushError::from_status(408, "").is_retriable());
        assert!(PushError::from_status(429, "").is_retriable());
        assert!(PushError::from_status(401, "").is_retriable());
        assert!(PushError::from_status(403, "").is_retriable());
        assert!(!PushError::from_status(400, "bad").is_retriable());
        assert!(!PushError::from_status(404, "").is_retriable());
        assert!(!PushError::from_status(422, "incomplete quiz").is_retriable());
    }

    #[test]
    fn transport_and_timeout_are_retriable() {
        assert!(PushError::Transport("reset".into()).is_retriable());
        assert!(PushError::Timeout.is_retriable());
        assert!(!PushError::InvalidPayload("no code".into()).is_retriable());
    }

    #[test]
    fn display_rejected() {
        let e = PushError::from_status(422, "answers incomplete");
        assert_eq!(e.to_string(), "rejected status=422: answers incomplete");
    }
}
