//! Protocol error kinds shared by the server pipeline and the client helpers.
//!
//! Timeouts (`PollTimeout`, `QueryTimeout`) are terminal outcomes the caller
//! can retry wholesale; `StreamDisconnect` is recoverable by re-fetching
//! authoritative state; everything else is surfaced with a human-readable
//! message rather than a raw transport error.

use thiserror::Error;

use crate::models::DocStatus;

#[derive(Debug, Error)]
pub enum Error {
    /// A document status was asked to move backward or out of a terminal
    /// state. Indicates a bug in the caller, not a runtime condition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: DocStatus, to: DocStatus },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The status poller exhausted its attempt ceiling with the document
    /// still non-terminal.
    #[error("document still processing after {attempts} poll attempts")]
    PollTimeout { attempts: u32 },

    /// The query bridge exhausted its attempt ceiling without an answer
    /// appearing in the session history.
    #[error("no answer appeared after {attempts} poll attempts")]
    QueryTimeout { attempts: u32 },

    /// A progress stream closed without delivering a terminal event.
    /// The subscriber should re-fetch the document list instead of
    /// trusting any stream-derived state.
    #[error("progress stream closed before a terminal event")]
    StreamDisconnect,

    #[error("ingestion failed: {0}")]
    Ingestion(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Wrapped HTTP transport failure (arXiv API, engine, chat API).
    #[error("request failed: {0}")]
    Fetch(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Fetch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
