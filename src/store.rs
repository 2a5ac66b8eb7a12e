//! Session-scoped SQLite store for sessions, documents, and messages.
//!
//! Ordering contracts relied on by the rest of the system:
//! sessions and documents list newest first; messages list in strict
//! creation order ascending (the query bridge's positional-adjacency
//! invariant). Reads have no side effects.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{DocSource, DocStatus, Document, Message, ProcessingPhase, Role, Session};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Sessions ============

    pub async fn create_session(&self, title: &str) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id,
            title: title.to_string(),
            created_at: ts_to_datetime(now.timestamp()),
            updated_at: ts_to_datetime(now.timestamp()),
        })
    }

    /// All sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM sessions ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let row = sqlx::query("SELECT id, title, created_at, updated_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => session_from_row(&row),
            None => Err(Error::SessionNotFound(id.to_string())),
        }
    }

    /// Deletes a session and everything it owns (documents, messages).
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        // Existence check first so a stale id surfaces as not-found.
        self.get_session(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn touch_session(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Documents ============

    /// Creates a document record in `pending`. The ingestion pipeline owns
    /// every subsequent mutation.
    pub async fn create_document(
        &self,
        session_id: &str,
        source_type: DocSource,
        title: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO documents (id, session_id, source_type, title, status, arxiv_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(source_type)
        .bind(title)
        .bind(DocStatus::Pending)
        .bind(arxiv_id)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        self.touch_session(session_id).await?;

        Ok(Document {
            id,
            session_id: session_id.to_string(),
            source_type,
            title: title.map(str::to_string),
            status: DocStatus::Pending,
            processing_phase: None,
            progress_percent: None,
            arxiv_id: arxiv_id.map(str::to_string),
            authors: None,
            published_at: None,
            pdf_url: None,
            local_pdf_path: None,
            content_hash: None,
            pages: None,
            insert_log: None,
            created_at: ts_to_datetime(now.timestamp()),
        })
    }

    /// All documents in a session, newest first.
    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE session_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    pub async fn get_document(&self, session_id: &str, doc_id: &str) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND session_id = ?")
            .bind(doc_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(Error::DocumentNotFound(doc_id.to_string())),
        }
    }

    pub async fn update_status(&self, doc_id: &str, status: DocStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mirrors in-flight phase/percent into the row so pollers see the same
    /// progress as stream subscribers.
    pub async fn update_progress(
        &self,
        doc_id: &str,
        phase: Option<ProcessingPhase>,
        percent: Option<u8>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET processing_phase = ?, progress_percent = ? WHERE id = ?")
            .bind(phase)
            .bind(percent.map(i64::from))
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_arxiv_metadata(
        &self,
        doc_id: &str,
        title: &str,
        authors: &str,
        published_at: Option<&str>,
        pdf_url: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET title = ?, authors = ?, published_at = ?, pdf_url = ? WHERE id = ?",
        )
        .bind(title)
        .bind(authors)
        .bind(published_at)
        .bind(pdf_url)
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_pdf_file(
        &self,
        doc_id: &str,
        local_pdf_path: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET local_pdf_path = ?, content_hash = ? WHERE id = ?")
            .bind(local_pdf_path)
            .bind(content_hash)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_pages(&self, doc_id: &str, pages: u32) -> Result<()> {
        sqlx::query("UPDATE documents SET pages = ? WHERE id = ?")
            .bind(i64::from(pages))
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a terminal status: clears the phase, pins progress to the
    /// endpoint (100 for ready, 0 for error), stores the failure log if any.
    pub async fn finish_document(
        &self,
        doc_id: &str,
        status: DocStatus,
        insert_log: Option<&str>,
    ) -> Result<()> {
        let percent: i64 = if status == DocStatus::Ready { 100 } else { 0 };
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, processing_phase = NULL, progress_percent = ?, insert_log = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(percent)
        .bind(insert_log)
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_ready_document(&self, session_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE session_id = ? AND status = ?",
        )
        .bind(session_id)
        .bind(DocStatus::Ready)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    // ============ Messages ============

    /// Appends a message to the session history. Append-only: nothing ever
    /// reorders or rewrites existing entries.
    pub async fn insert_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        self.touch_session(session_id).await?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: ts_to_datetime(now.timestamp()),
        })
    }

    /// Full session history in creation order ascending.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at FROM messages WHERE session_id = ? ORDER BY rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: ts_to_datetime(row.try_get("created_at")?),
        updated_at: ts_to_datetime(row.try_get("updated_at")?),
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        source_type: row.try_get("source_type")?,
        title: row.try_get("title")?,
        status: row.try_get("status")?,
        processing_phase: row.try_get("processing_phase")?,
        progress_percent: row
            .try_get::<Option<i64>, _>("progress_percent")?
            .map(|p| p.clamp(0, 100) as u8),
        arxiv_id: row.try_get("arxiv_id")?,
        authors: row.try_get("authors")?,
        published_at: row.try_get("published_at")?,
        pdf_url: row.try_get("pdf_url")?,
        local_pdf_path: row.try_get("local_pdf_path")?,
        content_hash: row.try_get("content_hash")?,
        pages: row.try_get::<Option<i64>, _>("pages")?.map(|p| p as u32),
        insert_log: row.try_get("insert_log")?,
        created_at: ts_to_datetime(row.try_get("created_at")?),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        created_at: ts_to_datetime(row.try_get("created_at")?),
    })
}
