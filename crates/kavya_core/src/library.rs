//! crates/kavya_core/src/library.rs
//!
//! Authoring and reading flows on top of a `DocumentStore`: creating an audio
//! book from a PDF and its page narrations, re-recording a page, opening a
//! document with its assets, and moving documents in and out of packages.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{
    Blob, Document, DocumentSummary, DocumentVariant, DomainError, VoiceNote, MIME_AUDIO, MIME_PDF,
};
use crate::ids::{Clock, IdGenerator};
use crate::package::{
    export_assets, ExportedPackage, ImportOutcome, MissingAsset, PackageCodec, PackageError,
    DEFAULT_MAX_UNPACKED_BYTES,
};
use crate::ports::{DocumentStore, PortError};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Document {0} not found")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error("Store error: {0}")]
    Port(#[from] PortError),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

/// Largest page count an audio book may declare.
pub const MAX_PAGES: u32 = 10_000;

fn check_duration(page_number: u32, duration: f64) -> LibraryResult<()> {
    if duration.is_finite() && duration >= 0.0 {
        Ok(())
    } else {
        Err(LibraryError::Invalid(format!(
            "duration {} for page {} is not a non-negative number of seconds",
            duration, page_number
        )))
    }
}

/// One recorded page narration.
#[derive(Debug, Clone)]
pub struct Narration {
    pub page_number: u32,
    pub audio: Vec<u8>,
    pub duration: f64,
}

/// Everything the authoring screen collects before saving.
#[derive(Debug, Clone, Default)]
pub struct NewAudioBook {
    pub title: String,
    pub author: Option<String>,
    pub poetry_type: Option<String>,
    pub pdf: Vec<u8>,
    pub page_count: u32,
    pub narrations: Vec<Narration>,
}

/// A document together with every asset that could be resolved.
#[derive(Debug, Clone)]
pub struct OpenedDocument {
    pub document: Document,
    pub assets: Vec<Blob>,
    pub missing: Vec<MissingAsset>,
}

#[derive(Clone)]
pub struct Library {
    store: Arc<dyn DocumentStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    max_unpacked_bytes: u64,
}

impl Library {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            max_unpacked_bytes: DEFAULT_MAX_UNPACKED_BYTES,
        }
    }

    /// Caps the decompressed size of imported packages.
    pub fn with_unpacked_limit(mut self, limit: u64) -> Self {
        self.max_unpacked_bytes = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn codec(&self) -> PackageCodec<'_> {
        PackageCodec::new(self.store.as_ref(), self.ids.as_ref(), self.clock.as_ref())
            .with_unpacked_limit(self.max_unpacked_bytes)
    }

    pub async fn list(&self) -> LibraryResult<Vec<DocumentSummary>> {
        Ok(self.store.get_all_documents().await?)
    }

    async fn load(&self, document_id: &str) -> LibraryResult<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(document_id.to_string()))
    }

    /// Saves a new PDF-centric audio book and returns its id.
    pub async fn create_audio_book(&self, book: NewAudioBook) -> LibraryResult<String> {
        if book.pdf.is_empty() {
            return Err(LibraryError::Invalid("a PDF is required".to_string()));
        }
        if book.page_count == 0 {
            return Err(LibraryError::Invalid("the PDF has no pages".to_string()));
        }
        if book.page_count > MAX_PAGES {
            return Err(LibraryError::Invalid(format!(
                "{} pages is more than the supported {}",
                book.page_count, MAX_PAGES
            )));
        }
        let mut seen = HashSet::new();
        for narration in &book.narrations {
            if narration.page_number == 0 || narration.page_number > book.page_count {
                return Err(LibraryError::Invalid(format!(
                    "narration for page {} is outside 1..={}",
                    narration.page_number, book.page_count
                )));
            }
            check_duration(narration.page_number, narration.duration)?;
            if !seen.insert(narration.page_number) {
                return Err(LibraryError::Invalid(format!(
                    "page {} has more than one narration",
                    narration.page_number
                )));
            }
        }

        let pdf_id = self.ids.next_id();
        let mut document = Document::new_pdf_centric(
            self.ids.next_id(),
            book.title.trim().to_string(),
            self.clock.now_millis(),
            pdf_id.clone(),
            book.page_count,
        );
        document.author = book.author.filter(|a| !a.trim().is_empty());
        document.poetry_type = book.poetry_type.filter(|p| !p.trim().is_empty());

        let mut audio_blobs = Vec::with_capacity(book.narrations.len());
        if let DocumentVariant::PdfCentric { pages, .. } = &mut document.content {
            for narration in book.narrations {
                let audio_id = self.ids.next_id();
                let page = &mut pages[(narration.page_number - 1) as usize];
                page.audio_id = Some(audio_id.clone());
                page.audio_duration = Some(narration.duration);
                audio_blobs.push(Blob::new(audio_id, narration.audio, MIME_AUDIO));
            }
        }
        document.validate()?;

        let document_id = self.store.save_document(&document).await?;
        self.store
            .save_blob(Blob::new(pdf_id, book.pdf, MIME_PDF))
            .await?;
        for blob in audio_blobs {
            self.store.save_blob(blob).await?;
        }
        for note in document.voice_notes(self.ids.as_ref(), self.clock.as_ref()) {
            self.store.save_voice_note(note).await?;
        }

        info!(
            "Created audio book {} with {} pages",
            document_id, book.page_count
        );
        Ok(document_id)
    }

    /// Replaces the narration of one page and re-saves the whole document.
    pub async fn record_narration(
        &self,
        document_id: &str,
        page_number: u32,
        audio: Vec<u8>,
        duration: f64,
    ) -> LibraryResult<Document> {
        if audio.is_empty() {
            return Err(LibraryError::Invalid("the recording is empty".to_string()));
        }
        check_duration(page_number, duration)?;
        let mut document = self.load(document_id).await?;
        let DocumentVariant::PdfCentric { pages, .. } = &mut document.content else {
            return Err(LibraryError::Invalid(
                "legacy poem documents cannot be re-narrated".to_string(),
            ));
        };
        let page = pages
            .iter_mut()
            .find(|p| p.page_number == page_number)
            .ok_or_else(|| {
                LibraryError::Invalid(format!("document has no page {}", page_number))
            })?;

        let audio_id = self.ids.next_id();
        page.audio_id = Some(audio_id.clone());
        page.audio_duration = Some(duration);

        self.store
            .save_blob(Blob::new(audio_id, audio, MIME_AUDIO))
            .await?;
        self.store.save_document(&document).await?;
        self.rebuild_voice_notes(&document).await?;
        Ok(document)
    }

    async fn rebuild_voice_notes(&self, document: &Document) -> LibraryResult<()> {
        self.store.delete_voice_notes(&document.id).await?;
        for note in document.voice_notes(self.ids.as_ref(), self.clock.as_ref()) {
            self.store.save_voice_note(note).await?;
        }
        Ok(())
    }

    /// Loads a document and resolves its blobs. Missing blobs are reported,
    /// not fatal.
    pub async fn open(&self, document_id: &str) -> LibraryResult<OpenedDocument> {
        let document = self.load(document_id).await?;
        let mut assets = Vec::new();
        let mut missing = Vec::new();
        for asset in export_assets(&document) {
            match self.store.get_blob(&asset.blob_id).await? {
                Some(blob) => assets.push(blob),
                None => {
                    warn!("Blob {} of document {} not found", asset.blob_id, document_id);
                    missing.push(MissingAsset {
                        path: asset.path(),
                        blob_id: asset.blob_id,
                        kind: asset.kind,
                    });
                }
            }
        }
        Ok(OpenedDocument {
            document,
            assets,
            missing,
        })
    }

    pub async fn voice_notes(&self, document_id: &str) -> LibraryResult<Vec<VoiceNote>> {
        self.load(document_id).await?;
        Ok(self.store.get_voice_notes(document_id).await?)
    }

    pub async fn blob(&self, blob_id: &str) -> LibraryResult<Blob> {
        self.store
            .get_blob(blob_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(blob_id.to_string()))
    }

    pub async fn delete(&self, document_id: &str) -> LibraryResult<()> {
        self.load(document_id).await?;
        self.store.delete_document(document_id).await?;
        info!("Deleted document {}", document_id);
        Ok(())
    }

    pub async fn export_package(
        &self,
        document_id: &str,
    ) -> LibraryResult<(Document, ExportedPackage)> {
        let document = self.load(document_id).await?;
        let package = self.codec().export(&document).await?;
        Ok((document, package))
    }

    pub async fn import_package(&self, archive: &[u8]) -> LibraryResult<ImportOutcome> {
        Ok(self.codec().import(archive).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FixedClock, SequentialIds};
    use crate::memory::MemoryStore;

    fn library(store: &MemoryStore) -> Library {
        Library::new(
            Arc::new(store.clone()),
            Arc::new(SequentialIds::new("id")),
            Arc::new(FixedClock(1_700_000_000_000)),
        )
    }

    fn book() -> NewAudioBook {
        NewAudioBook {
            title: " Rashmirathi ".to_string(),
            author: Some("Dinkar".to_string()),
            poetry_type: Some(String::new()),
            pdf: b"%PDF-1.7".to_vec(),
            page_count: 3,
            narrations: vec![Narration {
                page_number: 2,
                audio: vec![7; 16],
                duration: 4.5,
            }],
        }
    }

    #[tokio::test]
    async fn test_create_audio_book() {
        let store = MemoryStore::new();
        let library = library(&store);

        let id = library.create_audio_book(book()).await.unwrap();

        let opened = library.open(&id).await.unwrap();
        assert_eq!(opened.document.title, "Rashmirathi");
        assert_eq!(opened.document.author.as_deref(), Some("Dinkar"));
        assert!(opened.document.poetry_type.is_none());
        assert_eq!(opened.document.pages().len(), 3);
        assert_eq!(opened.document.pages()[1].audio_duration, Some(4.5));
        assert_eq!(opened.assets.len(), 2);
        assert!(opened.missing.is_empty());

        let notes = library.voice_notes(&id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].poem_id, "page-2");
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_narration() {
        let store = MemoryStore::new();
        let mut bad = book();
        bad.narrations[0].page_number = 4;
        let err = library(&store).create_audio_book(bad).await.unwrap_err();
        assert!(matches!(err, LibraryError::Invalid(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_page_count_over_limit() {
        let store = MemoryStore::new();
        let mut bad = book();
        bad.page_count = u32::MAX;
        let err = library(&store).create_audio_book(bad).await.unwrap_err();
        assert!(matches!(err, LibraryError::Invalid(_)));

        let mut bad = book();
        bad.page_count = MAX_PAGES + 1;
        let err = library(&store).create_audio_book(bad).await.unwrap_err();
        assert!(matches!(err, LibraryError::Invalid(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_or_negative_durations_are_rejected() {
        let store = MemoryStore::new();
        let library = library(&store);
        for duration in [f64::NAN, f64::INFINITY, -1.0] {
            let mut bad = book();
            bad.narrations[0].duration = duration;
            let err = library.create_audio_book(bad).await.unwrap_err();
            assert!(matches!(err, LibraryError::Invalid(_)), "{}", duration);
        }
        assert_eq!(store.write_count(), 0);

        let id = library.create_audio_book(book()).await.unwrap();
        let writes = store.write_count();
        for duration in [f64::NAN, f64::NEG_INFINITY, -0.5] {
            let err = library
                .record_narration(&id, 1, vec![1], duration)
                .await
                .unwrap_err();
            assert!(matches!(err, LibraryError::Invalid(_)), "{}", duration);
        }
        assert_eq!(store.write_count(), writes);
        let stored = library.open(&id).await.unwrap().document;
        assert!(stored
            .pages()
            .iter()
            .all(|p| p.audio_id.is_some() == p.audio_duration.is_some()));
    }

    #[tokio::test]
    async fn test_record_narration_replaces_voice_note() {
        let store = MemoryStore::new();
        let library = library(&store);
        let id = library.create_audio_book(book()).await.unwrap();

        let doc = library
            .record_narration(&id, 2, vec![1, 2, 3], 9.0)
            .await
            .unwrap();
        assert_eq!(doc.pages()[1].audio_duration, Some(9.0));

        library.record_narration(&id, 3, vec![4], 1.0).await.unwrap();
        let notes = library.voice_notes(&id).await.unwrap();
        let mut poem_ids: Vec<&str> = notes.iter().map(|n| n.poem_id.as_str()).collect();
        poem_ids.sort();
        assert_eq!(poem_ids, vec!["page-2", "page-3"]);

        let err = library.record_narration(&id, 9, vec![1], 1.0).await.unwrap_err();
        assert!(matches!(err, LibraryError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_open_reports_missing_assets() {
        let store = MemoryStore::new();
        let library = library(&store);
        let doc = Document::new_pdf_centric("doc".into(), "T".into(), 0, "gone".into(), 1);
        store.save_document(&doc).await.unwrap();

        let opened = library.open("doc").await.unwrap();
        assert!(opened.assets.is_empty());
        assert_eq!(opened.missing.len(), 1);
        assert_eq!(opened.missing[0].path, "gone.pdf");
    }

    #[tokio::test]
    async fn test_delete_unknown_document() {
        let store = MemoryStore::new();
        let err = library(&store).delete("nope").await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));
    }
}
