//! crates/kavya_core/src/memory.rs
//!
//! In-memory `DocumentStore`: the embedded local backend, also used by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{Blob, Document, DocumentSummary, VoiceNote};
use crate::ports::{DocumentStore, PortError, PortResult};

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<HashMap<String, Document>>>,
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
    voice_notes: Arc<Mutex<Vec<VoiceNote>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `PortError::WriteRejected`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn begin_write(&self, what: &str) -> PortResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::WriteRejected(format!("{} (store is read-only)", what)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> PortResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PortError::Unexpected("memory store lock poisoned".to_string()))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_document(&self, doc: &Document) -> PortResult<String> {
        self.begin_write("save document")?;
        let mut stored = doc.clone();
        stored.source_type = Some(doc.effective_source_type());
        lock(&self.documents)?.insert(doc.id.clone(), stored);
        Ok(doc.id.clone())
    }

    async fn get_document(&self, id: &str) -> PortResult<Option<Document>> {
        Ok(lock(&self.documents)?.get(id).cloned())
    }

    async fn get_all_documents(&self) -> PortResult<Vec<DocumentSummary>> {
        let mut summaries: Vec<DocumentSummary> =
            lock(&self.documents)?.values().map(Document::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn delete_document(&self, id: &str) -> PortResult<()> {
        self.begin_write("delete document")?;
        let Some(doc) = lock(&self.documents)?.remove(id) else {
            return Ok(());
        };
        let mut blobs = lock(&self.blobs)?;
        for blob_id in doc.blob_ids() {
            blobs.remove(&blob_id);
        }
        lock(&self.voice_notes)?.retain(|n| n.document_id != id);
        Ok(())
    }

    async fn save_blob(&self, blob: Blob) -> PortResult<()> {
        self.begin_write("save blob")?;
        lock(&self.blobs)?.insert(blob.id.clone(), blob);
        Ok(())
    }

    async fn get_blob(&self, id: &str) -> PortResult<Option<Blob>> {
        Ok(lock(&self.blobs)?.get(id).cloned())
    }

    async fn save_voice_note(&self, note: VoiceNote) -> PortResult<()> {
        self.begin_write("save voice note")?;
        let mut notes = lock(&self.voice_notes)?;
        notes.retain(|n| n.id != note.id);
        notes.push(note);
        Ok(())
    }

    async fn get_voice_notes(&self, document_id: &str) -> PortResult<Vec<VoiceNote>> {
        let mut notes: Vec<VoiceNote> = lock(&self.voice_notes)?
            .iter()
            .filter(|n| n.document_id == document_id)
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.created_at);
        Ok(notes)
    }

    async fn delete_voice_notes(&self, document_id: &str) -> PortResult<()> {
        self.begin_write("delete voice notes")?;
        lock(&self.voice_notes)?.retain(|n| n.document_id != document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentVariant, SourceType, MIME_AUDIO, MIME_PDF};

    fn sample_doc() -> Document {
        let mut doc = Document::new_pdf_centric("doc".into(), "Title".into(), 10, "pdf".into(), 2);
        doc.source_type = None;
        if let DocumentVariant::PdfCentric { pages, .. } = &mut doc.content {
            pages[1].audio_id = Some("a2".into());
            pages[1].audio_duration = Some(3.0);
        }
        doc
    }

    #[tokio::test]
    async fn test_save_and_get_document() {
        let store = MemoryStore::new();
        assert!(store.get_document("doc").await.unwrap().is_none());

        store.save_document(&sample_doc()).await.unwrap();

        let loaded = store.get_document("doc").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Title");
        assert_eq!(loaded.source_type, Some(SourceType::Mixed));
        assert_eq!(store.get_all_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_blobs_and_voice_notes() {
        let store = MemoryStore::new();
        let doc = sample_doc();
        store.save_document(&doc).await.unwrap();
        store.save_blob(Blob::new("pdf", b"%PDF".to_vec(), MIME_PDF)).await.unwrap();
        store.save_blob(Blob::new("a2", vec![1, 2], MIME_AUDIO)).await.unwrap();
        store.save_blob(Blob::new("unrelated", vec![9], MIME_AUDIO)).await.unwrap();
        store
            .save_voice_note(VoiceNote {
                id: "vn".into(),
                document_id: "doc".into(),
                poem_id: "page-2".into(),
                audio_id: "a2".into(),
                duration: 3.0,
                created_at: 0,
            })
            .await
            .unwrap();

        store.delete_document("doc").await.unwrap();

        assert!(store.get_document("doc").await.unwrap().is_none());
        assert!(store.get_blob("pdf").await.unwrap().is_none());
        assert!(store.get_blob("a2").await.unwrap().is_none());
        assert!(store.get_blob("unrelated").await.unwrap().is_some());
        assert!(store.get_voice_notes("doc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes_are_reported() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let err = store.save_blob(Blob::new("x", vec![], MIME_AUDIO)).await.unwrap_err();
        assert!(matches!(err, PortError::WriteRejected(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let store = MemoryStore::new();
        let mut older = sample_doc();
        older.id = "older".into();
        older.created_at = 1;
        let mut newer = sample_doc();
        newer.id = "newer".into();
        newer.created_at = 2;
        store.save_document(&older).await.unwrap();
        store.save_document(&newer).await.unwrap();

        let ids: Vec<String> = store
            .get_all_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["newer".to_string(), "older".to_string()]);
    }
}
