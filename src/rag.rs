//! Contract for the external graph-RAG engine.
//!
//! The engine owns knowledge-graph construction and retrieval; this crate
//! only hands it raw document text and forwards query prompts. Both
//! operations are scoped to one session's graph, identified by the
//! session's graph directory. Failures are opaque: they surface as generic
//! ingestion/query errors, never as engine internals.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Retrieval strategy selector. The values are opaque tuning parameters
/// passed through to the engine; only the default `top_k` differs here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Targeted chunk retrieval: fast, precise.
    #[default]
    Local,
    /// Cross-document synthesis via community detection: slower, broad.
    Global,
    /// Plain keyword matching: fastest, least sophisticated.
    Naive,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Naive => "naive",
        }
    }

    /// Per-mode default `top_k`, applied when the caller sends none.
    pub fn default_top_k(&self) -> u32 {
        match self {
            QueryMode::Local => 20,
            QueryMode::Global => 60,
            QueryMode::Naive => 10,
        }
    }
}

/// Tuning parameters forwarded to the engine with a query.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

impl QueryParams {
    pub fn effective_top_k(&self) -> u32 {
        self.top_k.unwrap_or_else(|| self.mode.default_top_k())
    }
}

/// The external engine, consumed as a black box.
///
/// `insert` is not guaranteed idempotent; callers must not re-insert the
/// same document.
#[async_trait]
pub trait GraphRag: Send + Sync {
    /// Inserts raw document text into the graph identified by `graph`.
    async fn insert(&self, graph: &str, text: &str) -> Result<()>;

    /// Runs a retrieval-augmented query against the graph and returns the
    /// generated answer text.
    async fn query(&self, graph: &str, prompt: &str, params: &QueryParams) -> Result<String>;
}

/// HTTP adapter for an engine service exposing `POST /insert` and
/// `POST /query`.
pub struct HttpEngine {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    answer: String,
}

#[async_trait]
impl GraphRag for HttpEngine {
    async fn insert(&self, graph: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/insert", self.base_url))
            .json(&serde_json::json!({ "graph": graph, "text": text }))
            .send()
            .await
            .map_err(|e| Error::Ingestion(format!("engine unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Ingestion(format!(
                "engine insert returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(())
    }

    async fn query(&self, graph: &str, prompt: &str, params: &QueryParams) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .json(&serde_json::json!({
                "graph": graph,
                "prompt": prompt,
                "mode": params.mode,
                "top_k": params.effective_top_k(),
                "response_type": params.response_type,
            }))
            .send()
            .await
            .map_err(|e| Error::QueryFailed(format!("engine unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::QueryFailed(format!(
                "engine query returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::QueryFailed(format!("malformed engine response: {}", e)))?;
        Ok(parsed.answer)
    }
}

/// In-memory engine for tests and offline development (`provider = "stub"`).
/// Records inserted texts and answers every query with a canned response.
pub struct StubEngine {
    answer: String,
    inserted: Mutex<Vec<(String, String)>>,
    fail_inserts: bool,
}

impl StubEngine {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            inserted: Mutex::new(Vec::new()),
            fail_inserts: false,
        }
    }

    /// A stub whose `insert` always fails, for exercising error paths.
    pub fn failing() -> Self {
        Self {
            answer: String::new(),
            inserted: Mutex::new(Vec::new()),
            fail_inserts: true,
        }
    }

    /// Texts inserted so far, as `(graph, text)` pairs.
    pub fn inserted(&self) -> Vec<(String, String)> {
        self.inserted.lock().unwrap().clone()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new("stub answer")
    }
}

#[async_trait]
impl GraphRag for StubEngine {
    async fn insert(&self, graph: &str, text: &str) -> Result<()> {
        if self.fail_inserts {
            return Err(Error::Ingestion("stub engine rejects inserts".to_string()));
        }
        self.inserted
            .lock()
            .unwrap()
            .push((graph.to_string(), text.to_string()));
        Ok(())
    }

    async fn query(&self, _graph: &str, _prompt: &str, _params: &QueryParams) -> Result<String> {
        Ok(self.answer.clone())
    }
}
