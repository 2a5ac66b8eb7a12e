//! HTTP API server (REST + SSE).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session |
//! | `GET`    | `/sessions` | List sessions, newest first |
//! | `GET`    | `/sessions/{sid}` | Session detail with graph stats |
//! | `DELETE` | `/sessions/{sid}` | Delete a session and its data |
//! | `GET`    | `/sessions/{sid}/documents` | List documents, newest first |
//! | `POST`   | `/sessions/{sid}/documents/upload` | Upload a PDF (multipart `file` field) |
//! | `POST`   | `/sessions/{sid}/documents/arxiv` | Add an arXiv paper by id |
//! | `GET`    | `/sessions/{sid}/documents/search-arxiv` | Preview arXiv search |
//! | `GET`    | `/sessions/{sid}/documents/{doc}/progress` | SSE ingestion progress |
//! | `GET`    | `/sessions/{sid}/messages` | Ordered chat history |
//! | `POST`   | `/sessions/{sid}/messages` | Submit a query (202 + message id) |
//! | `GET`    | `/papers/search` | Session-independent arXiv search |
//!
//! # Error Contract
//!
//! All error responses carry a JSON body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "content must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::arxiv::ArxivClient;
use crate::config::Config;
use crate::error::Error;
use crate::ingest::{self, IngestPipeline};
use crate::models::{DocumentSummary, Role, Session};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::rag::{GraphRag, HttpEngine, QueryParams, StubEngine};
use crate::store::SqliteStore;
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub bus: Arc<ProgressBus>,
    pub pipeline: IngestPipeline,
    pub arxiv: ArxivClient,
    pub engine: Arc<dyn GraphRag>,
    pub config: Arc<Config>,
}

/// Starts the HTTP server. Runs migrations first (idempotent), builds the
/// engine named in `[engine].provider`, and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);

    let engine: Arc<dyn GraphRag> = match config.engine.provider.as_str() {
        "stub" => Arc::new(StubEngine::default()),
        _ => Arc::new(HttpEngine::new(&config.engine)?),
    };
    let arxiv = ArxivClient::new(&config.arxiv)?;
    let bus = Arc::new(ProgressBus::new());
    let pipeline = IngestPipeline::new(
        store.clone(),
        engine.clone(),
        bus.clone(),
        arxiv.clone(),
        config.storage.data_root.clone(),
    );

    let state = AppState {
        store,
        bus,
        pipeline,
        arxiv,
        engine,
        config: Arc::new(config.clone()),
    };

    let bind_addr = config.server.bind.clone();
    let app = build_router(state);

    info!("API server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router. Exposed separately so tests can serve it on an
/// ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = DefaultBodyLimit::max(state.config.storage.max_upload_mb * 1024 * 1024);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/sessions",
            post(handle_create_session).get(handle_list_sessions),
        )
        .route(
            "/sessions/{sid}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{sid}/documents", get(handle_list_documents))
        .route("/sessions/{sid}/documents/upload", post(handle_upload))
        .route("/sessions/{sid}/documents/arxiv", post(handle_add_arxiv))
        .route(
            "/sessions/{sid}/documents/search-arxiv",
            get(handle_session_arxiv_search),
        )
        .route(
            "/sessions/{sid}/documents/{doc}/progress",
            get(handle_progress),
        )
        .route(
            "/sessions/{sid}/messages",
            get(handle_list_messages).post(handle_create_message),
        )
        .route("/papers/search", get(handle_papers_search))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::SessionNotFound(_) | Error::DocumentNotFound(_) => not_found(e.to_string()),
            Error::PollTimeout { .. } | Error::QueryTimeout { .. } => AppError {
                status: StatusCode::REQUEST_TIMEOUT,
                code: "timeout".to_string(),
                message: e.to_string(),
            },
            other => internal(other.to_string()),
        }
    }
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Sessions ============

#[derive(Deserialize)]
struct CreateSessionRequest {
    title: Option<String>,
}

#[derive(Serialize)]
struct SessionStats {
    graph_exists: bool,
    doc_count: usize,
}

#[derive(Serialize)]
struct SessionDetailResponse {
    #[serde(flatten)]
    session: Session,
    stats: SessionStats,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let title = req.title.unwrap_or_else(|| "New Session".to_string());
    let session = state.store.create_session(&title).await?;

    let data_root = &state.config.storage.data_root;
    for dir in [
        ingest::uploads_dir(data_root, &session.id),
        ingest::graph_dir(data_root, &session.id),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| internal(format!("cannot create session directory: {}", e)))?;
    }

    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Session>>, AppError> {
    Ok(Json(state.store.list_sessions().await?))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SessionDetailResponse>, AppError> {
    let session = state.store.get_session(&sid).await?;
    let docs = state.store.list_documents(&sid).await?;
    let graph = ingest::graph_dir(&state.config.storage.data_root, &sid);

    Ok(Json(SessionDetailResponse {
        session,
        stats: SessionStats {
            graph_exists: graph.exists(),
            doc_count: docs.len(),
        },
    }))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.delete_session(&sid).await?;

    // Best effort: data directory removal failure leaves the session gone.
    let root = ingest::session_root(&state.config.storage.data_root, &sid);
    if let Err(e) = tokio::fs::remove_dir_all(&root).await {
        warn!(session_id = %sid, "could not remove session data dir: {}", e);
    }

    Ok(Json(json!({ "ok": true })))
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    state.store.get_session(&sid).await?;
    let docs = state.store.list_documents(&sid).await?;
    Ok(Json(docs.iter().map(DocumentSummary::from).collect()))
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.store.get_session(&sid).await?;

    let mut filename: Option<String> = None;
    let mut data: Option<axum::body::Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("invalid upload: {}", e)))?,
            );
            break;
        }
    }

    let data = data.ok_or_else(|| bad_request("multipart field 'file' is required"))?;
    let filename = filename.unwrap_or_else(|| "upload.pdf".to_string());
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(bad_request("only PDF files are supported"));
    }
    if data.is_empty() {
        return Err(bad_request("uploaded file is empty"));
    }

    let doc = state
        .pipeline
        .accept_upload(&sid, &filename, data.to_vec())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": doc.id, "status": doc.status, "title": doc.title })),
    ))
}

#[derive(Deserialize)]
struct AddArxivRequest {
    arxiv_id: String,
}

async fn handle_add_arxiv(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(req): Json<AddArxivRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.store.get_session(&sid).await?;
    if req.arxiv_id.trim().is_empty() {
        return Err(bad_request("arxiv_id is required"));
    }

    let doc = state.pipeline.accept_arxiv(&sid, &req.arxiv_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": doc.id, "status": doc.status, "arxiv_id": doc.arxiv_id })),
    ))
}

// ============ Progress stream ============

fn sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().comment("serialization error"))
}

/// SSE stream of ingestion progress for one document.
///
/// Subscribes to the bus before snapshotting the document row; combined
/// with the pipeline's row-before-event ordering this guarantees the
/// terminal outcome is delivered exactly once, whether it happened before
/// or after the client attached. There is no replay of earlier phase
/// events. The server closes the stream after the terminal event.
async fn handle_progress(
    State(state): State<AppState>,
    Path((sid, doc_id)): Path<(String, String)>,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>, AppError> {
    let rx = state.bus.subscribe(&sid, &doc_id);
    let doc = state.store.get_document(&sid, &doc_id).await?;

    let stream: BoxStream<'static, Result<Event, Infallible>> = if doc.status.is_terminal() {
        // Already finished: deliver the terminal outcome and close. The
        // subscription just taken is surplus; release its channel.
        drop(rx);
        state.bus.release_if_idle(&sid, &doc_id);
        let terminal = ProgressEvent::complete(doc.status);
        stream::iter(vec![Ok(sse_event(&terminal))]).boxed()
    } else {
        stream::unfold(Some(rx), |slot| async move {
            let mut rx = slot?;
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let done = ev.is_terminal();
                        let sse = sse_event(&ev);
                        return Some((Ok(sse), if done { None } else { Some(rx) }));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "progress stream lagged, events skipped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default().interval(Duration::from_secs(15))))
}

// ============ arXiv search ============

#[derive(Deserialize)]
struct ArxivSearchQuery {
    query: String,
    max_results: Option<usize>,
}

async fn handle_session_arxiv_search(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(params): Query<ArxivSearchQuery>,
) -> Result<Json<Vec<crate::models::ArxivPaper>>, AppError> {
    state.store.get_session(&sid).await?;
    run_arxiv_search(&state, params).await
}

async fn handle_papers_search(
    State(state): State<AppState>,
    Query(params): Query<ArxivSearchQuery>,
) -> Result<Json<Vec<crate::models::ArxivPaper>>, AppError> {
    run_arxiv_search(&state, params).await
}

async fn run_arxiv_search(
    state: &AppState,
    params: ArxivSearchQuery,
) -> Result<Json<Vec<crate::models::ArxivPaper>>, AppError> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let max = params
        .max_results
        .unwrap_or(state.config.arxiv.max_results);
    let papers = state.arxiv.search(&params.query, max).await?;
    Ok(Json(papers))
}

// ============ Messages ============

#[derive(Deserialize)]
struct ChatRequest {
    content: String,
    #[serde(flatten)]
    params: QueryParams,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Vec<crate::models::Message>>, AppError> {
    state.store.get_session(&sid).await?;
    Ok(Json(state.store.list_messages(&sid).await?))
}

/// Submits a query: records the user message synchronously and returns its
/// id with 202. The answer is produced asynchronously and appended to the
/// history as the next message; clients resolve it by polling
/// `GET /sessions/{sid}/messages` for the entry following their message id.
async fn handle_create_message(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.store.get_session(&sid).await?;

    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    if !state.store.has_ready_document(&sid).await? {
        return Err(bad_request(
            "add at least one ready document before querying",
        ));
    }

    let user_message = state
        .store
        .insert_message(&sid, Role::User, &req.content)
        .await?;

    let task_state = state.clone();
    let session_id = sid.clone();
    let content = req.content.clone();
    let params = req.params.clone();
    tokio::spawn(async move {
        let graph = ingest::graph_dir(&task_state.config.storage.data_root, &session_id)
            .to_string_lossy()
            .into_owned();
        let reply = match task_state.engine.query(&graph, &content, &params).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(session_id = %session_id, "query failed: {}", e);
                format!("Error: {}", e)
            }
        };
        if let Err(e) = task_state
            .store
            .insert_message(&session_id, Role::Assistant, &reply)
            .await
        {
            error!(session_id = %session_id, "could not record assistant reply: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message_id": user_message.id, "status": "processing" })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocStatus, ProcessingPhase};

    #[test]
    fn domain_errors_map_to_http_codes() {
        let e: AppError = Error::SessionNotFound("s1".to_string()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");

        let e: AppError = Error::DocumentNotFound("d1".to_string()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: AppError = Error::QueryTimeout { attempts: 60 }.into();
        assert_eq!(e.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(e.code, "timeout");

        let e: AppError = Error::InvalidTransition {
            from: DocStatus::Ready,
            to: DocStatus::Inserting,
        }
        .into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "internal");
    }

    #[test]
    fn chat_request_flattens_query_params() {
        let req: ChatRequest = serde_json::from_value(json!({
            "content": "summarize the papers",
            "mode": "global",
            "top_k": 12
        }))
        .unwrap();
        assert_eq!(req.content, "summarize the papers");
        assert_eq!(req.params.top_k, Some(12));
        assert_eq!(req.params.mode.as_str(), "global");
    }

    #[test]
    fn sse_event_serializes_progress() {
        // Just check it does not fall back to the comment branch.
        let ev = sse_event(&ProgressEvent::phase(ProcessingPhase::Finalizing, 95));
        let rendered = format!("{:?}", ev);
        assert!(rendered.contains("finalizing"));
    }
}
