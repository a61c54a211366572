//! crates/kavya_core/src/ports.rs
//!
//! Defines the storage contract the core depends on. Concrete backends (the
//! in-memory store, the Postgres adapter in the api service) implement it, so
//! the package codec and library flows never know which one they talk to.

use async_trait::async_trait;

use crate::domain::{Blob, Document, DocumentSummary, VoiceNote};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Store rejected the write: {0}")]
    WriteRejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Document Management ---

    /// Full upsert of a document. Returns its id.
    async fn save_document(&self, doc: &Document) -> PortResult<String>;

    async fn get_document(&self, id: &str) -> PortResult<Option<Document>>;

    /// Summaries of every stored document, newest first.
    async fn get_all_documents(&self) -> PortResult<Vec<DocumentSummary>>;

    /// Removes the document, the blobs it references and its voice notes.
    async fn delete_document(&self, id: &str) -> PortResult<()>;

    // --- Blob Management ---
    async fn save_blob(&self, blob: Blob) -> PortResult<()>;

    async fn get_blob(&self, id: &str) -> PortResult<Option<Blob>>;

    // --- Voice Note Index ---
    async fn save_voice_note(&self, note: VoiceNote) -> PortResult<()>;

    /// Voice notes of one document, oldest first.
    async fn get_voice_notes(&self, document_id: &str) -> PortResult<Vec<VoiceNote>>;

    async fn delete_voice_notes(&self, document_id: &str) -> PortResult<()>;
}
