//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DocumentStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use kavya_core::domain::{Blob, Document, DocumentSummary, SourceType, VoiceNote};
use kavya_core::ports::{DocumentStore, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn read_error(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn write_error(e: sqlx::Error) -> PortError {
    PortError::WriteRejected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    body: Json<Document>,
}

#[derive(FromRow)]
struct SummaryRecord {
    id: String,
    title: String,
    author: Option<String>,
    poetry_type: Option<String>,
    created_at: i64,
    source_type: String,
    page_count: i32,
}
impl SummaryRecord {
    fn to_domain(self) -> DocumentSummary {
        let source_type = match self.source_type.as_str() {
            "mixed" => SourceType::Mixed,
            "pdf" => SourceType::Pdf,
            _ => SourceType::Text,
        };
        DocumentSummary {
            id: self.id,
            title: self.title,
            author: self.author,
            poetry_type: self.poetry_type,
            created_at: self.created_at,
            source_type,
            page_count: self.page_count.max(0) as usize,
        }
    }
}

#[derive(FromRow)]
struct BlobRecord {
    id: String,
    data: Vec<u8>,
    mime_type: String,
}
impl BlobRecord {
    fn to_domain(self) -> Blob {
        Blob {
            id: self.id,
            data: self.data,
            mime_type: self.mime_type,
        }
    }
}

#[derive(FromRow)]
struct VoiceNoteRecord {
    id: String,
    document_id: String,
    poem_id: String,
    audio_id: String,
    duration: f64,
    created_at: i64,
}
impl VoiceNoteRecord {
    fn to_domain(self) -> VoiceNote {
        VoiceNote {
            id: self.id,
            document_id: self.document_id,
            poem_id: self.poem_id,
            audio_id: self.audio_id,
            duration: self.duration,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for DbAdapter {
    async fn save_document(&self, doc: &Document) -> PortResult<String> {
        let mut stored = doc.clone();
        stored.source_type = Some(doc.effective_source_type());
        let summary = stored.summary();

        sqlx::query(
            "INSERT INTO documents (id, title, author, poetry_type, created_at, source_type, page_count, body)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                author = EXCLUDED.author,
                poetry_type = EXCLUDED.poetry_type,
                created_at = EXCLUDED.created_at,
                source_type = EXCLUDED.source_type,
                page_count = EXCLUDED.page_count,
                body = EXCLUDED.body",
        )
        .bind(&summary.id)
        .bind(&summary.title)
        .bind(&summary.author)
        .bind(&summary.poetry_type)
        .bind(summary.created_at)
        .bind(summary.source_type.as_str())
        .bind(summary.page_count as i32)
        .bind(Json(&stored))
        .execute(&self.pool)
        .await
        .map_err(write_error)?;

        Ok(summary.id)
    }

    async fn get_document(&self, id: &str) -> PortResult<Option<Document>> {
        let record = sqlx::query_as::<_, DocumentRecord>("SELECT body FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)?;
        Ok(record.map(|r| r.body.0))
    }

    async fn get_all_documents(&self) -> PortResult<Vec<DocumentSummary>> {
        let records = sqlx::query_as::<_, SummaryRecord>(
            "SELECT id, title, author, poetry_type, created_at, source_type, page_count
             FROM documents ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_document(&self, id: &str) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT body FROM documents WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(read_error)?;
        let Some(record) = record else {
            return Ok(());
        };

        let blob_ids = record.body.0.blob_ids();
        sqlx::query("DELETE FROM blobs WHERE id = ANY($1)")
            .bind(&blob_ids)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        sqlx::query("DELETE FROM voice_notes WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;

        tx.commit().await.map_err(write_error)?;
        Ok(())
    }

    async fn save_blob(&self, blob: Blob) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO blobs (id, data, mime_type) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, mime_type = EXCLUDED.mime_type",
        )
        .bind(&blob.id)
        .bind(&blob.data)
        .bind(&blob.mime_type)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn get_blob(&self, id: &str) -> PortResult<Option<Blob>> {
        let record =
            sqlx::query_as::<_, BlobRecord>("SELECT id, data, mime_type FROM blobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(read_error)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn save_voice_note(&self, note: VoiceNote) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO voice_notes (id, document_id, poem_id, audio_id, duration, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                document_id = EXCLUDED.document_id,
                poem_id = EXCLUDED.poem_id,
                audio_id = EXCLUDED.audio_id,
                duration = EXCLUDED.duration,
                created_at = EXCLUDED.created_at",
        )
        .bind(&note.id)
        .bind(&note.document_id)
        .bind(&note.poem_id)
        .bind(&note.audio_id)
        .bind(note.duration)
        .bind(note.created_at)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn get_voice_notes(&self, document_id: &str) -> PortResult<Vec<VoiceNote>> {
        let records = sqlx::query_as::<_, VoiceNoteRecord>(
            "SELECT id, document_id, poem_id, audio_id, duration, created_at
             FROM voice_notes WHERE document_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_voice_notes(&self, document_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM voice_notes WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(write_error)?;
        Ok(())
    }
}
