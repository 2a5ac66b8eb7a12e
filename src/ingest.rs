//! Server-side document ingestion pipeline.
//!
//! One spawned task per document drives the monotonic status path
//! (`pending -> downloading -> inserting -> ready | error`), mirrors
//! phase/percent into the document row for pollers, and publishes the same
//! progress on the [`ProgressBus`] for stream subscribers. Engine inserts
//! are serialized per session; everything else runs concurrently across
//! documents and sessions.
//!
//! Invariant: the document row reaches its terminal state *before* the
//! terminal event is published. A progress subscriber that snapshots the
//! row after subscribing therefore never misses the terminal outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

use crate::arxiv::{normalize_arxiv_id, ArxivClient};
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{DocSource, DocStatus, Document, ProcessingPhase};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::rag::GraphRag;
use crate::status;
use crate::store::SqliteStore;

pub fn session_root(data_root: &Path, session_id: &str) -> PathBuf {
    data_root.join("sessions").join(session_id)
}

pub fn uploads_dir(data_root: &Path, session_id: &str) -> PathBuf {
    session_root(data_root, session_id).join("uploads")
}

pub fn graph_dir(data_root: &Path, session_id: &str) -> PathBuf {
    session_root(data_root, session_id).join("graph")
}

/// One async mutex per session, created on demand. Held only around the
/// engine insert: the graph mutation is the part that must not interleave
/// within a session. Download and extraction run outside the lock.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn for_session(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: SqliteStore,
    engine: Arc<dyn GraphRag>,
    bus: Arc<ProgressBus>,
    arxiv: ArxivClient,
    locks: SessionLocks,
    data_root: PathBuf,
}

impl IngestPipeline {
    pub fn new(
        store: SqliteStore,
        engine: Arc<dyn GraphRag>,
        bus: Arc<ProgressBus>,
        arxiv: ArxivClient,
        data_root: PathBuf,
    ) -> Self {
        Self {
            store,
            engine,
            bus,
            arxiv,
            locks: SessionLocks::default(),
            data_root,
        }
    }

    /// Accepts an uploaded PDF: persists the bytes, creates the document in
    /// `pending`, and hands the rest to a background task. Returns the
    /// pending document immediately.
    pub async fn accept_upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let doc = self
            .store
            .create_document(session_id, DocSource::Upload, Some(filename), None)
            .await?;

        let uploads = uploads_dir(&self.data_root, session_id);
        tokio::fs::create_dir_all(&uploads)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot create uploads dir: {}", e)))?;
        let pdf_path = uploads.join(format!("{}.pdf", doc.id));
        tokio::fs::write(&pdf_path, &bytes)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot store uploaded PDF: {}", e)))?;

        let hash = format!("{:x}", Sha256::digest(&bytes));
        self.store
            .set_pdf_file(&doc.id, &pdf_path.to_string_lossy(), &hash)
            .await?;

        let pipeline = self.clone();
        let spawned_doc = doc.clone();
        tokio::spawn(async move {
            pipeline.process_upload(spawned_doc, bytes).await;
        });

        Ok(doc)
    }

    /// Accepts an arXiv reference: creates the document in `pending` and
    /// downloads/ingests in the background.
    pub async fn accept_arxiv(&self, session_id: &str, raw_arxiv_id: &str) -> Result<Document> {
        let arxiv_id = normalize_arxiv_id(raw_arxiv_id);
        if arxiv_id.is_empty() {
            return Err(Error::Ingestion("arxiv_id is required".to_string()));
        }

        let doc = self
            .store
            .create_document(session_id, DocSource::Arxiv, None, Some(&arxiv_id))
            .await?;

        let pipeline = self.clone();
        let spawned_doc = doc.clone();
        tokio::spawn(async move {
            pipeline.process_arxiv(spawned_doc).await;
        });

        Ok(doc)
    }

    async fn process_upload(&self, doc: Document, bytes: Vec<u8>) {
        info!(document_id = %doc.id, session_id = %doc.session_id, "ingesting uploaded PDF");
        if let Err(e) = self.run_upload(&doc, bytes).await {
            self.fail_document(&doc, &e.to_string()).await;
        }
    }

    async fn process_arxiv(&self, doc: Document) {
        let arxiv_id = doc.arxiv_id.as_deref().unwrap_or("?").to_string();
        info!(document_id = %doc.id, session_id = %doc.session_id, %arxiv_id, "ingesting arXiv paper");
        if let Err(e) = self.run_arxiv(&doc).await {
            self.fail_document(&doc, &e.to_string()).await;
        }
    }

    async fn run_upload(&self, doc: &Document, bytes: Vec<u8>) -> Result<()> {
        let st = status::transition(doc.status, DocStatus::Inserting)?;
        self.store.update_status(&doc.id, st).await?;

        self.report_phase(doc, ProcessingPhase::PdfExtraction).await?;
        let (text, pages) =
            extract::extract_pdf_text(&bytes).map_err(|e| Error::Ingestion(e.to_string()))?;
        self.store.set_pages(&doc.id, pages).await?;

        self.insert_into_graph(doc, st, &text).await
    }

    async fn run_arxiv(&self, doc: &Document) -> Result<()> {
        let arxiv_id = doc
            .arxiv_id
            .clone()
            .ok_or_else(|| Error::Ingestion("arXiv document without an id".to_string()))?;

        let mut st = status::transition(doc.status, DocStatus::Downloading)?;
        self.store.update_status(&doc.id, st).await?;

        let paper = self
            .arxiv
            .fetch_metadata(&arxiv_id)
            .await
            .map_err(|e| Error::Ingestion(format!("arXiv lookup for '{}': {}", arxiv_id, e)))?;
        self.store
            .set_arxiv_metadata(
                &doc.id,
                &paper.title,
                &paper.authors.join(", "),
                paper.published_at.as_deref(),
                &paper.pdf_url,
            )
            .await?;

        let bytes = self
            .arxiv
            .download_pdf(&paper)
            .await
            .map_err(|e| Error::Ingestion(format!("arXiv download for '{}': {}", arxiv_id, e)))?;

        let uploads = uploads_dir(&self.data_root, &doc.session_id);
        tokio::fs::create_dir_all(&uploads)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot create uploads dir: {}", e)))?;
        let pdf_path = uploads.join(format!("{}.pdf", doc.id));
        tokio::fs::write(&pdf_path, &bytes)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot store downloaded PDF: {}", e)))?;
        let hash = format!("{:x}", Sha256::digest(&bytes));
        self.store
            .set_pdf_file(&doc.id, &pdf_path.to_string_lossy(), &hash)
            .await?;

        st = status::transition(st, DocStatus::Inserting)?;
        self.store.update_status(&doc.id, st).await?;

        self.report_phase(doc, ProcessingPhase::PdfExtraction).await?;
        let (text, pages) =
            extract::extract_pdf_text(&bytes).map_err(|e| Error::Ingestion(e.to_string()))?;
        self.store.set_pages(&doc.id, pages).await?;

        self.insert_into_graph(doc, st, &text).await
    }

    /// Shared tail of both paths: engine insert (serialized per session),
    /// then the terminal transition and its event.
    pub async fn insert_into_graph(
        &self,
        doc: &Document,
        current: DocStatus,
        text: &str,
    ) -> Result<()> {
        self.report_phase(doc, ProcessingPhase::TextChunking).await?;

        let graph = graph_dir(&self.data_root, &doc.session_id);
        tokio::fs::create_dir_all(&graph)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot create graph dir: {}", e)))?;

        {
            let lock = self.locks.for_session(&doc.session_id);
            let _guard = lock.lock().await;
            self.engine.insert(&graph.to_string_lossy(), text).await?;
        }

        self.report_phase(doc, ProcessingPhase::Finalizing).await?;

        let st = status::transition(current, DocStatus::Ready)?;
        // Row first, then the event: see the module invariant.
        self.store.finish_document(&doc.id, st, None).await?;
        self.bus
            .publish(&doc.session_id, &doc.id, ProgressEvent::complete(st));

        info!(document_id = %doc.id, session_id = %doc.session_id, "document ready");
        Ok(())
    }

    async fn report_phase(&self, doc: &Document, phase: ProcessingPhase) -> Result<()> {
        let percent = status::phase_percent(phase);
        self.store
            .update_progress(&doc.id, Some(phase), Some(percent))
            .await?;
        self.bus
            .publish(&doc.session_id, &doc.id, ProgressEvent::phase(phase, percent));
        Ok(())
    }

    /// Records a terminal failure. Best-effort: a store error at this point
    /// is logged, not propagated, so the error event still goes out.
    async fn fail_document(&self, doc: &Document, message: &str) {
        error!(document_id = %doc.id, session_id = %doc.session_id, "{}", message);
        if let Err(e) = self
            .store
            .finish_document(&doc.id, DocStatus::Error, Some(message))
            .await
        {
            error!(document_id = %doc.id, "failed to record error status: {}", e);
        }
        self.bus
            .publish(&doc.session_id, &doc.id, ProgressEvent::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rag::StubEngine;
    use crate::{db, migrate};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_pipeline(engine: Arc<dyn GraphRag>) -> (IngestPipeline, SqliteStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("graphchat.sqlite");
        config.storage.data_root = tmp.path().join("data");
        let pool = db::connect(&config).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        let store = SqliteStore::new(pool);

        let pipeline = IngestPipeline::new(
            store.clone(),
            engine,
            Arc::new(ProgressBus::new()),
            ArxivClient::new(&config.arxiv).unwrap(),
            config.storage.data_root.clone(),
        );
        (pipeline, store, tmp)
    }

    async fn wait_for_terminal(store: &SqliteStore, session_id: &str, doc_id: &str) -> Document {
        for _ in 0..200 {
            let doc = store.get_document(session_id, doc_id).await.unwrap();
            if doc.status.is_terminal() {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document never reached a terminal status");
    }

    #[tokio::test]
    async fn insert_into_graph_drives_document_to_ready() {
        let stub = Arc::new(StubEngine::default());
        let (pipeline, store, _tmp) = test_pipeline(stub.clone()).await;

        let session = store.create_session("ingest").await.unwrap();
        let doc = store
            .create_document(&session.id, DocSource::Upload, Some("paper.pdf"), None)
            .await
            .unwrap();
        store
            .update_status(&doc.id, DocStatus::Inserting)
            .await
            .unwrap();

        pipeline
            .insert_into_graph(&doc, DocStatus::Inserting, "extracted text")
            .await
            .unwrap();

        let done = store.get_document(&session.id, &doc.id).await.unwrap();
        assert_eq!(done.status, DocStatus::Ready);
        assert_eq!(done.progress_percent, Some(100));
        assert_eq!(done.processing_phase, None);

        let inserted = stub.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, "extracted text");
    }

    #[tokio::test]
    async fn unreadable_upload_ends_in_error_with_log() {
        let (pipeline, store, _tmp) = test_pipeline(Arc::new(StubEngine::default())).await;

        let session = store.create_session("bad-upload").await.unwrap();
        let doc = pipeline
            .accept_upload(&session.id, "junk.pdf", b"not a pdf".to_vec())
            .await
            .unwrap();
        assert_eq!(doc.status, DocStatus::Pending);

        let done = wait_for_terminal(&store, &session.id, &doc.id).await;
        assert_eq!(done.status, DocStatus::Error);
        assert_eq!(done.progress_percent, Some(0));
        assert!(done.insert_log.unwrap().contains("extraction failed"));
        // The stored PDF bytes are still on disk with their hash recorded.
        assert!(done.content_hash.is_some());
    }

    #[tokio::test]
    async fn failing_engine_ends_in_error() {
        let (pipeline, store, _tmp) = test_pipeline(Arc::new(StubEngine::failing())).await;

        let session = store.create_session("bad-engine").await.unwrap();
        let doc = store
            .create_document(&session.id, DocSource::Upload, Some("paper.pdf"), None)
            .await
            .unwrap();
        store
            .update_status(&doc.id, DocStatus::Inserting)
            .await
            .unwrap();

        let err = pipeline
            .insert_into_graph(&doc, DocStatus::Inserting, "text")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
    }
}
