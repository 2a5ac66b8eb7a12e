//! Core data models: sessions, documents, messages, and their lifecycle enums.
//!
//! `Document` is the full persisted record; `DocumentSummary` is the wire
//! shape returned by the API (and consumed by the client-side poller).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DocSource {
    Upload,
    Arxiv,
}

impl DocSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocSource::Upload => "upload",
            DocSource::Arxiv => "arxiv",
        }
    }
}

/// Ingestion lifecycle of a document.
///
/// Transitions are monotonic along
/// `pending -> downloading (arxiv only) -> inserting -> ready | error`;
/// `ready` and `error` are terminal. Enforced by [`crate::status::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DocStatus {
    Pending,
    Downloading,
    Inserting,
    Ready,
    Error,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Pending => "pending",
            DocStatus::Downloading => "downloading",
            DocStatus::Inserting => "inserting",
            DocStatus::Ready => "ready",
            DocStatus::Error => "error",
        }
    }

    /// True for `ready` and `error`; no transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocStatus::Ready | DocStatus::Error)
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase of the `inserting` status. Purely informational: it drives UI
/// messaging, never correctness, and consumers must ignore it outside
/// `inserting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProcessingPhase {
    PdfExtraction,
    TextChunking,
    EntityExtraction,
    GraphClustering,
    CommunityReports,
    Finalizing,
}

impl ProcessingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingPhase::PdfExtraction => "pdf_extraction",
            ProcessingPhase::TextChunking => "text_chunking",
            ProcessingPhase::EntityExtraction => "entity_extraction",
            ProcessingPhase::GraphClustering => "graph_clustering",
            ProcessingPhase::CommunityReports => "community_reports",
            ProcessingPhase::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for ProcessingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// An isolated chat context with its own document set and knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full persisted document record. Mutated only by the ingestion pipeline;
/// everything else observes it read-only.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub session_id: String,
    pub source_type: DocSource,
    pub title: Option<String>,
    pub status: DocStatus,
    /// Meaningful only while `status == inserting`.
    pub processing_phase: Option<ProcessingPhase>,
    /// Meaningful only while `status == inserting`.
    pub progress_percent: Option<u8>,
    pub arxiv_id: Option<String>,
    pub authors: Option<String>,
    pub published_at: Option<String>,
    pub pdf_url: Option<String>,
    pub local_pdf_path: Option<String>,
    pub content_hash: Option<String>,
    pub pages: Option<u32>,
    /// Error or warning text recorded when ingestion fails.
    pub insert_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Wire shape of a document, as listed by `GET /sessions/{sid}/documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub session_id: String,
    pub source_type: DocSource,
    pub title: Option<String>,
    pub status: DocStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_phase: Option<ProcessingPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        DocumentSummary {
            id: doc.id.clone(),
            session_id: doc.session_id.clone(),
            source_type: doc.source_type,
            title: doc.title.clone(),
            status: doc.status,
            processing_phase: doc.processing_phase,
            progress_percent: doc.progress_percent,
            arxiv_id: doc.arxiv_id.clone(),
            authors: doc.authors.clone(),
            published_at: doc.published_at.clone(),
            pages: doc.pages,
            created_at: doc.created_at,
        }
    }
}

/// One entry in a session's ordered chat history.
///
/// History is totally ordered by creation and never reordered or mutated;
/// the query bridge relies on an assistant reply being the entry
/// immediately after its user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// arXiv search result (preview only, not persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivPaper {
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    pub pdf_url: String,
}
