//! Client-side protocol helpers: the status poller, the query dispatch
//! bridge, and the SSE progress subscription.
//!
//! Both loops are bounded: they stop at their attempt ceiling and report a
//! timeout rather than retrying forever. Dropping the returned future (or
//! the progress receiver) cancels cleanly; neither helper mutates server
//! state beyond the initial query submission.
//!
//! The helpers are written against the [`ChatApi`] trait so tests can
//! script responses; [`HttpChatApi`] is the reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{DocStatus, DocumentSummary, Message, Role, Session};
use crate::progress::ProgressEvent;
use crate::rag::QueryParams;
use crate::status::estimate_progress;

/// Read-side surface of the chat API that the poller and bridge consume.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Authoritative document list for a session, newest first.
    async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Full ordered message history for a session.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Submits a query; returns the id of the created user message
    /// immediately. The answer arrives later in the message history.
    async fn submit_query(
        &self,
        session_id: &str,
        content: &str,
        params: &QueryParams,
    ) -> Result<String>;
}

/// Attempt ceiling and spacing for a polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(2),
        }
    }
}

impl PollOptions {
    /// Document status polling settings (reference: 2 s x 60).
    pub fn for_status(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Query resolution polling settings (reference: 1 s x 60).
    pub fn for_query(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.query_max_attempts,
            interval: Duration::from_millis(config.query_interval_ms),
        }
    }
}

/// Polls the document list until the target document reaches a terminal
/// status.
///
/// `on_update` fires once per successful fetch with the current status and
/// a display progress value: the authoritative percent when the server
/// reports one, otherwise the [`estimate_progress`] heuristic. On reaching
/// `ready` or `error` the final update is pinned to 100 so the UI ends at
/// a definitive endpoint.
///
/// Fails with [`Error::DocumentNotFound`] when the document (or its whole
/// session) disappears mid-poll, and with [`Error::PollTimeout`] after
/// `max_attempts` fetches with the document still in flight. Transient
/// fetch errors consume an attempt and are otherwise ignored.
pub async fn poll_until_terminal<A, F>(
    api: &A,
    session_id: &str,
    document_id: &str,
    opts: PollOptions,
    mut on_update: F,
) -> Result<DocumentSummary>
where
    A: ChatApi + ?Sized,
    F: FnMut(DocStatus, u8),
{
    for attempt in 1..=opts.max_attempts {
        match api.list_documents(session_id).await {
            Ok(docs) => match docs.into_iter().find(|d| d.id == document_id) {
                None => return Err(Error::DocumentNotFound(document_id.to_string())),
                Some(doc) if doc.status.is_terminal() => {
                    on_update(doc.status, 100);
                    return Ok(doc);
                }
                Some(doc) => {
                    let progress = doc.progress_percent.unwrap_or_else(|| {
                        estimate_progress(doc.status, doc.processing_phase, attempt)
                    });
                    on_update(doc.status, progress);
                }
            },
            Err(Error::SessionNotFound(_)) => {
                return Err(Error::DocumentNotFound(document_id.to_string()))
            }
            Err(e) => {
                debug!(attempt, "document list fetch failed, will retry: {}", e);
            }
        }
        if attempt < opts.max_attempts {
            tokio::time::sleep(opts.interval).await;
        }
    }
    Err(Error::PollTimeout {
        attempts: opts.max_attempts,
    })
}

/// Submits a query and polls the message history until the answer appears.
///
/// The reply is defined positionally: the message immediately following
/// the returned user-message id, once it exists with role `assistant`.
/// The history store guarantees nothing can be interposed between a user
/// message and its answer; this bridge only reads.
///
/// Transient history-fetch failures are treated as "not yet resolved" and
/// consume an attempt; sustained failure ends in [`Error::QueryTimeout`]
/// like any other non-resolution.
pub async fn submit_query_and_wait<A>(
    api: &A,
    session_id: &str,
    content: &str,
    params: &QueryParams,
    opts: PollOptions,
) -> Result<Message>
where
    A: ChatApi + ?Sized,
{
    let message_id = api.submit_query(session_id, content, params).await?;

    for attempt in 1..=opts.max_attempts {
        match api.list_messages(session_id).await {
            Ok(history) => {
                if let Some(reply) = find_reply(&history, &message_id) {
                    return Ok(reply.clone());
                }
            }
            Err(e) => {
                debug!(attempt, "history fetch failed, will retry: {}", e);
            }
        }
        if attempt < opts.max_attempts {
            tokio::time::sleep(opts.interval).await;
        }
    }
    Err(Error::QueryTimeout {
        attempts: opts.max_attempts,
    })
}

/// The assistant message immediately following the user message with the
/// given id, if both exist.
fn find_reply<'a>(history: &'a [Message], user_message_id: &str) -> Option<&'a Message> {
    let pos = history.iter().position(|m| m.id == user_message_id)?;
    let next = history.get(pos + 1)?;
    (next.role == Role::Assistant).then_some(next)
}

// ============ HTTP implementation ============

/// reqwest-backed [`ChatApi`] plus the write-side calls (session create,
/// document upload/add) and the SSE progress subscription.
#[derive(Clone)]
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct AcceptedDocument {
    id: String,
    status: DocStatus,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl HttpChatApi {
    /// Connects to a graphchat server at `base_url`.
    ///
    /// The client sets a connect timeout but no total timeout: the
    /// progress subscription holds its response open for the lifetime of
    /// an ingestion.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Extracts the server's error message from a failed response body.
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ApiErrorBody>().await {
            Ok(body) => body.error.message,
            Err(_) => format!("server returned {}", status),
        }
    }

    pub async fn create_session(&self, title: &str) -> Result<Session> {
        let response = self
            .http
            .post(self.url("/sessions"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(Self::error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed session response: {}", e)))
    }

    /// Uploads a PDF; returns the accepted document id (status `pending`).
    pub async fn upload_pdf(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(String, DocStatus)> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| Error::Fetch(format!("cannot build upload: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/documents/upload", session_id)))
            .multipart(form)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Ingestion(Self::error_message(response).await));
        }
        let accepted: AcceptedDocument = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed upload response: {}", e)))?;
        Ok((accepted.id, accepted.status))
    }

    /// Adds an arXiv paper; returns the accepted document id.
    pub async fn add_arxiv(
        &self,
        session_id: &str,
        arxiv_id: &str,
    ) -> Result<(String, DocStatus)> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/documents/arxiv", session_id)))
            .json(&serde_json::json!({ "arxiv_id": arxiv_id }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Ingestion(Self::error_message(response).await));
        }
        let accepted: AcceptedDocument = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed response: {}", e)))?;
        Ok((accepted.id, accepted.status))
    }

    /// Opens the SSE progress stream for a document and forwards parsed
    /// events on a channel.
    ///
    /// The channel yields `Ok(event)` per progress event and ends after a
    /// terminal event. A stream that closes without one yields a final
    /// `Err(StreamDisconnect)`: the caller should then re-fetch the
    /// document list rather than trust anything stream-derived. Dropping
    /// the receiver cancels the subscription.
    pub fn subscribe_progress(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> mpsc::Receiver<Result<ProgressEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let http = self.http.clone();
        let url = self.url(&format!(
            "/sessions/{}/documents/{}/progress",
            session_id, document_id
        ));

        tokio::spawn(async move {
            match stream_progress(http, url, &tx).await {
                Ok(true) => {}
                Ok(false) => {
                    let _ = tx.send(Err(Error::StreamDisconnect)).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        rx
    }
}

/// Reads the SSE byte stream line by line, forwarding `data:` payloads.
/// Returns `Ok(true)` if a terminal event was delivered (or the receiver
/// went away), `Ok(false)` on a close without one.
async fn stream_progress(
    http: reqwest::Client,
    url: String,
    tx: &mpsc::Sender<Result<ProgressEvent>>,
) -> Result<bool> {
    let response = http
        .get(&url)
        .header("Accept", "text/event-stream")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Fetch(format!(
            "progress stream returned {}",
            response.status()
        )));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Fetch(format!("progress stream read: {}", e)))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            // Keep-alive comments and event/id fields are not payload.
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }

            match serde_json::from_str::<ProgressEvent>(payload) {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    if tx.send(Ok(event)).await.is_err() {
                        // Receiver dropped: subscription cancelled.
                        return Ok(true);
                    }
                    if terminal {
                        return Ok(true);
                    }
                }
                Err(e) => warn!("skipping unparseable progress event: {}", e),
            }
        }
    }

    Ok(false)
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentSummary>> {
        let response = self
            .http
            .get(self.url(&format!("/sessions/{}/documents", session_id)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Fetch(Self::error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed document list: {}", e)))
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(self.url(&format!("/sessions/{}/messages", session_id)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Fetch(Self::error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed message history: {}", e)))
    }

    async fn submit_query(
        &self,
        session_id: &str,
        content: &str,
        params: &QueryParams,
    ) -> Result<String> {
        let mut body = serde_json::json!({ "content": content, "mode": params.mode });
        if let Some(top_k) = params.top_k {
            body["top_k"] = top_k.into();
        }
        if let Some(ref response_type) = params.response_type {
            body["response_type"] = response_type.clone().into();
        }

        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/messages", session_id)))
            .json(&body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::QueryFailed(Self::error_message(response).await));
        }
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("malformed submit response: {}", e)))?;
        Ok(submitted.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocSource, ProcessingPhase};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// One scripted response for a fake fetch.
    #[derive(Clone)]
    enum Scripted<T> {
        Ok(T),
        FetchError,
        SessionGone,
    }

    /// Scripted [`ChatApi`]: pops responses off a queue, repeating the last
    /// one forever, and counts fetches.
    struct FakeApi {
        documents: Mutex<VecDeque<Scripted<Vec<DocumentSummary>>>>,
        messages: Mutex<VecDeque<Scripted<Vec<Message>>>>,
        submit_id: String,
        doc_fetches: AtomicU32,
        msg_fetches: AtomicU32,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                documents: Mutex::new(VecDeque::new()),
                messages: Mutex::new(VecDeque::new()),
                submit_id: "m1".to_string(),
                doc_fetches: AtomicU32::new(0),
                msg_fetches: AtomicU32::new(0),
            }
        }

        fn script_documents(self, steps: Vec<Scripted<Vec<DocumentSummary>>>) -> Self {
            *self.documents.lock().unwrap() = steps.into();
            self
        }

        fn script_messages(self, steps: Vec<Scripted<Vec<Message>>>) -> Self {
            *self.messages.lock().unwrap() = steps.into();
            self
        }

        fn next<T: Clone>(queue: &Mutex<VecDeque<Scripted<T>>>) -> Scripted<T> {
            let mut q = queue.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().expect("fake script is empty")
            }
        }

        fn resolve<T: Clone>(step: Scripted<T>) -> Result<T> {
            match step {
                Scripted::Ok(v) => Ok(v),
                Scripted::FetchError => Err(Error::Fetch("scripted failure".to_string())),
                Scripted::SessionGone => Err(Error::SessionNotFound("s1".to_string())),
            }
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn list_documents(&self, _session_id: &str) -> Result<Vec<DocumentSummary>> {
            self.doc_fetches.fetch_add(1, Ordering::SeqCst);
            Self::resolve(Self::next(&self.documents))
        }

        async fn list_messages(&self, _session_id: &str) -> Result<Vec<Message>> {
            self.msg_fetches.fetch_add(1, Ordering::SeqCst);
            Self::resolve(Self::next(&self.messages))
        }

        async fn submit_query(
            &self,
            _session_id: &str,
            _content: &str,
            _params: &QueryParams,
        ) -> Result<String> {
            Ok(self.submit_id.clone())
        }
    }

    fn doc(
        id: &str,
        status: DocStatus,
        phase: Option<ProcessingPhase>,
        percent: Option<u8>,
    ) -> DocumentSummary {
        DocumentSummary {
            id: id.to_string(),
            session_id: "s1".to_string(),
            source_type: DocSource::Upload,
            title: Some("paper.pdf".to_string()),
            status,
            processing_phase: phase,
            progress_percent: percent,
            arxiv_id: None,
            authors: None,
            published_at: None,
            pages: None,
            created_at: Utc::now(),
        }
    }

    fn msg(id: &str, role: Role, content: &str) -> Message {
        Message {
            id: id.to_string(),
            session_id: "s1".to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn quick(max_attempts: u32) -> PollOptions {
        PollOptions {
            max_attempts,
            interval: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_resolves_when_document_becomes_ready() {
        let inserting = doc("d1", DocStatus::Inserting, None, None);
        let api = FakeApi::new().script_documents(vec![
            Scripted::Ok(vec![inserting.clone()]),
            Scripted::Ok(vec![inserting.clone()]),
            Scripted::Ok(vec![inserting.clone()]),
            Scripted::Ok(vec![inserting.clone()]),
            Scripted::Ok(vec![doc("d1", DocStatus::Ready, None, None)]),
        ]);

        let mut updates = Vec::new();
        let result = poll_until_terminal(&api, "s1", "d1", quick(60), |status, progress| {
            updates.push((status, progress));
        })
        .await
        .unwrap();

        assert_eq!(result.status, DocStatus::Ready);
        // Resolved within exactly five fetches.
        assert_eq!(api.doc_fetches.load(Ordering::SeqCst), 5);
        // Final update is pinned to 100 regardless of the heuristic.
        assert_eq!(updates.last(), Some(&(DocStatus::Ready, 100)));
        // Earlier updates creep within the 50..=90 band.
        assert_eq!(updates[0], (DocStatus::Inserting, 52));
        assert_eq!(updates[3], (DocStatus::Inserting, 58));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_prefers_authoritative_progress() {
        let api = FakeApi::new().script_documents(vec![
            Scripted::Ok(vec![doc(
                "d1",
                DocStatus::Inserting,
                Some(ProcessingPhase::GraphClustering),
                Some(77),
            )]),
            Scripted::Ok(vec![doc("d1", DocStatus::Ready, None, None)]),
        ]);

        let mut updates = Vec::new();
        poll_until_terminal(&api, "s1", "d1", quick(60), |status, progress| {
            updates.push((status, progress));
        })
        .await
        .unwrap();

        assert_eq!(updates[0], (DocStatus::Inserting, 77));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_times_out_after_exactly_max_attempts() {
        let api = FakeApi::new().script_documents(vec![Scripted::Ok(vec![doc(
            "d1",
            DocStatus::Inserting,
            None,
            None,
        )])]);

        let err = poll_until_terminal(&api, "s1", "d1", quick(60), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PollTimeout { attempts: 60 }));
        assert_eq!(api.doc_fetches.load(Ordering::SeqCst), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_surfaces_disappearing_document() {
        let api = FakeApi::new().script_documents(vec![
            Scripted::Ok(vec![doc("d1", DocStatus::Inserting, None, None)]),
            Scripted::Ok(vec![]),
        ]);

        let err = poll_until_terminal(&api, "s1", "d1", quick(60), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
        assert_eq!(api.doc_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_surfaces_deleted_session_as_not_found() {
        let api = FakeApi::new().script_documents(vec![
            Scripted::Ok(vec![doc("d1", DocStatus::Inserting, None, None)]),
            Scripted::SessionGone,
        ]);

        let err = poll_until_terminal(&api, "s1", "d1", quick(60), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_resolves_when_reply_appears() {
        let api = FakeApi::new().script_messages(vec![
            Scripted::Ok(vec![msg("m1", Role::User, "question")]),
            Scripted::Ok(vec![
                msg("m1", Role::User, "question"),
                msg("m2", Role::Assistant, "answer"),
            ]),
        ]);

        let reply =
            submit_query_and_wait(&api, "s1", "question", &QueryParams::default(), quick(60))
                .await
                .unwrap();

        assert_eq!(reply.id, "m2");
        assert_eq!(reply.content, "answer");
        assert_eq!(api.msg_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_times_out_and_stops_polling() {
        let api = FakeApi::new()
            .script_messages(vec![Scripted::Ok(vec![msg("m1", Role::User, "question")])]);

        let err =
            submit_query_and_wait(&api, "s1", "question", &QueryParams::default(), quick(60))
                .await
                .unwrap_err();

        assert!(matches!(err, Error::QueryTimeout { attempts: 60 }));
        assert_eq!(api.msg_fetches.load(Ordering::SeqCst), 60);
        // No stray polling after the timeout returned.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.msg_fetches.load(Ordering::SeqCst), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_tolerates_transient_fetch_failures() {
        let api = FakeApi::new().script_messages(vec![
            Scripted::FetchError,
            Scripted::Ok(vec![
                msg("m1", Role::User, "question"),
                msg("m2", Role::Assistant, "answer"),
            ]),
        ]);

        let reply =
            submit_query_and_wait(&api, "s1", "question", &QueryParams::default(), quick(60))
                .await
                .unwrap();
        assert_eq!(reply.id, "m2");
        assert_eq!(api.msg_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_requires_strict_adjacency() {
        // Another user message sits where the answer should be: the bridge
        // must not resolve against the assistant entry further down.
        let api = FakeApi::new().script_messages(vec![Scripted::Ok(vec![
            msg("m1", Role::User, "question"),
            msg("m3", Role::User, "interloper"),
            msg("m2", Role::Assistant, "answer to something else"),
        ])]);

        let err = submit_query_and_wait(&api, "s1", "question", &QueryParams::default(), quick(3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueryTimeout { attempts: 3 }));
    }

    #[test]
    fn find_reply_matches_only_adjacent_assistant() {
        let history = vec![
            msg("m1", Role::User, "q"),
            msg("m2", Role::Assistant, "a"),
        ];
        assert_eq!(find_reply(&history, "m1").unwrap().id, "m2");
        // The reply to the last message does not exist yet.
        assert!(find_reply(&history, "m2").is_none());
        // Unknown id: keep polling, not an error.
        assert!(find_reply(&history, "mx").is_none());
    }
}
