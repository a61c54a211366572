//! crates/kavya_core/src/domain.rs
//!
//! Defines the core data structures for an audio book: the document, its pages
//! (or legacy poems), the binary assets it references and the derived voice
//! note index records.
//!
//! The serde shape of `Document` is the `metadata.json` record carried inside a
//! `.kavyaSwar` package, so field names follow the interchange format.

use crate::ids::{Clock, IdGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_AUDIO: &str = "audio/m4a";

//=========================================================================================
// Domain Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Document title must not be empty")]
    EmptyTitle,
    #[error("Page numbers start at 1, got {0}")]
    InvalidPageNumber(u32),
    #[error("Page number {0} appears more than once")]
    DuplicatePageNumber(u32),
    #[error("Poem id '{0}' is empty or appears more than once")]
    DuplicatePoemId(String),
    #[error("'{0}' cannot be used as a blob id")]
    InvalidBlobId(String),
    #[error("Document mixes the pdf/pages model with legacy poems")]
    MixedModels,
    #[error("Malformed document JSON: {0}")]
    Json(#[from] serde_json::Error),
}

//=========================================================================================
// Document
//=========================================================================================

/// How the document's content was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Pdf,
    Mixed,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Pdf => "pdf",
            SourceType::Mixed => "mixed",
        }
    }
}

/// One narrated page of the source PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
}

impl Page {
    pub fn blank(page_number: u32) -> Self {
        Self {
            page_number,
            audio_id: None,
            audio_duration: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoemKind {
    Text,
    Pdf,
}

/// A unit of the legacy "poems" model. Unknown keys are kept in `extra` so
/// that older records survive an export/import cycle untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poem {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PoemKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    /// Kept as written; older exports stored flags like `1` or `"yes"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Poem {
    /// The blob id of this poem's PDF, when it is a PDF poem.
    pub fn pdf_ref(&self) -> Option<&str> {
        match self.kind {
            Some(PoemKind::Pdf) => self.file_ref.as_deref(),
            _ => None,
        }
    }

    pub fn has_audio(&self) -> bool {
        match &self.has_audio {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }
}

/// The two document shapes. Decided once when a document is parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentVariant {
    PdfCentric {
        pdf_source_id: Option<String>,
        pages: Vec<Page>,
    },
    LegacyPoems {
        poems: Vec<Poem>,
    },
}

/// An audio book: metadata plus either PDF pages or legacy poems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DocumentRecord", into = "DocumentRecord")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub poetry_type: Option<String>,
    pub created_at: i64,
    pub source_type: Option<SourceType>,
    pub content: DocumentVariant,
    pub extra: Map<String, Value>,
}

/// Flat wire record of a document, as found in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRecord {
    id: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poetry_type: Option<String>,
    created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_type: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pdf_source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pages: Option<Vec<Page>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poems: Option<Vec<Poem>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<DocumentRecord> for Document {
    type Error = DomainError;

    fn try_from(record: DocumentRecord) -> Result<Self, Self::Error> {
        let pages = record.pages.unwrap_or_default();
        let content = match (record.pdf_source_id, record.poems) {
            (Some(_), Some(poems)) if !poems.is_empty() => return Err(DomainError::MixedModels),
            (None, Some(poems)) if !poems.is_empty() && !pages.is_empty() => {
                return Err(DomainError::MixedModels)
            }
            (None, Some(poems)) if !poems.is_empty() || pages.is_empty() => {
                DocumentVariant::LegacyPoems { poems }
            }
            (pdf_source_id, _) => {
                let mut pages = pages;
                pages.sort_by_key(|p| p.page_number);
                DocumentVariant::PdfCentric {
                    pdf_source_id,
                    pages,
                }
            }
        };

        Ok(Self {
            id: record.id,
            title: record.title,
            author: record.author,
            poetry_type: record.poetry_type,
            created_at: record.created_at,
            source_type: record.source_type,
            content,
            extra: record.extra,
        })
    }
}

impl From<Document> for DocumentRecord {
    fn from(doc: Document) -> Self {
        let (pdf_source_id, pages, poems) = match doc.content {
            DocumentVariant::PdfCentric {
                pdf_source_id,
                pages,
            } => (pdf_source_id, Some(pages), None),
            DocumentVariant::LegacyPoems { poems } => (None, None, Some(poems)),
        };
        Self {
            id: doc.id,
            title: doc.title,
            author: doc.author,
            poetry_type: doc.poetry_type,
            created_at: doc.created_at,
            source_type: doc.source_type,
            pdf_source_id,
            pages,
            poems,
            extra: doc.extra,
        }
    }
}

impl Document {
    /// A fresh PDF-centric document with blank pages `1..=page_count`.
    pub fn new_pdf_centric(
        id: String,
        title: String,
        created_at: i64,
        pdf_source_id: String,
        page_count: u32,
    ) -> Self {
        Self {
            id,
            title,
            author: None,
            poetry_type: None,
            created_at,
            source_type: Some(SourceType::Mixed),
            content: DocumentVariant::PdfCentric {
                pdf_source_id: Some(pdf_source_id),
                pages: (1..=page_count).map(Page::blank).collect(),
            },
            extra: Map::new(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DomainError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn pdf_source_id(&self) -> Option<&str> {
        match &self.content {
            DocumentVariant::PdfCentric { pdf_source_id, .. } => pdf_source_id.as_deref(),
            DocumentVariant::LegacyPoems { .. } => None,
        }
    }

    /// Pages in ascending page order; empty for legacy documents.
    pub fn pages(&self) -> &[Page] {
        match &self.content {
            DocumentVariant::PdfCentric { pages, .. } => pages,
            DocumentVariant::LegacyPoems { .. } => &[],
        }
    }

    pub fn poems(&self) -> &[Poem] {
        match &self.content {
            DocumentVariant::PdfCentric { .. } => &[],
            DocumentVariant::LegacyPoems { poems } => poems,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self.content, DocumentVariant::LegacyPoems { .. })
    }

    /// The source type persisted alongside the document.
    pub fn effective_source_type(&self) -> SourceType {
        if self.pdf_source_id().is_some() {
            SourceType::Mixed
        } else {
            self.source_type.unwrap_or(SourceType::Text)
        }
    }

    /// Checks the invariants a document must hold before it is stored.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::EmptyTitle);
        }
        match &self.content {
            DocumentVariant::PdfCentric {
                pdf_source_id,
                pages,
            } => {
                if let Some(id) = pdf_source_id {
                    validate_blob_id(id)?;
                }
                let mut seen = HashSet::new();
                for page in pages {
                    if page.page_number == 0 {
                        return Err(DomainError::InvalidPageNumber(page.page_number));
                    }
                    if !seen.insert(page.page_number) {
                        return Err(DomainError::DuplicatePageNumber(page.page_number));
                    }
                    if let Some(audio_id) = &page.audio_id {
                        validate_blob_id(audio_id)?;
                    }
                }
            }
            DocumentVariant::LegacyPoems { poems } => {
                let mut seen = HashSet::new();
                for poem in poems {
                    if poem.id.is_empty() || !seen.insert(poem.id.as_str()) {
                        return Err(DomainError::DuplicatePoemId(poem.id.clone()));
                    }
                    if let Some(audio_id) = &poem.audio_id {
                        validate_blob_id(audio_id)?;
                    }
                    if let Some(file_ref) = poem.pdf_ref() {
                        validate_blob_id(file_ref)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Every blob id the document references, first occurrence wins.
    pub fn blob_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        };
        match &self.content {
            DocumentVariant::PdfCentric {
                pdf_source_id,
                pages,
            } => {
                if let Some(id) = pdf_source_id {
                    push(id.as_str());
                }
                pages.iter().filter_map(|p| p.audio_id.as_deref()).for_each(&mut push);
            }
            DocumentVariant::LegacyPoems { poems } => {
                for poem in poems {
                    if let Some(id) = &poem.audio_id {
                        push(id.as_str());
                    }
                    if let Some(id) = poem.pdf_ref() {
                        push(id);
                    }
                }
            }
        }
        ids
    }

    /// Rebuilds the voice note index records for this document.
    pub fn voice_notes(&self, ids: &dyn IdGenerator, clock: &dyn Clock) -> Vec<VoiceNote> {
        let note = |poem_id: String, audio_id: &str, duration: Option<f64>| VoiceNote {
            id: ids.next_id(),
            document_id: self.id.clone(),
            poem_id,
            audio_id: audio_id.to_string(),
            duration: duration.unwrap_or(0.0),
            created_at: clock.now_millis(),
        };
        match &self.content {
            DocumentVariant::PdfCentric { pages, .. } => pages
                .iter()
                .filter_map(|page| {
                    let audio_id = page.audio_id.as_deref()?;
                    Some(note(page_poem_id(page.page_number), audio_id, page.audio_duration))
                })
                .collect(),
            DocumentVariant::LegacyPoems { poems } => poems
                .iter()
                .filter(|poem| poem.has_audio())
                .filter_map(|poem| {
                    let audio_id = poem.audio_id.as_deref()?;
                    Some(note(poem.id.clone(), audio_id, poem.audio_duration))
                })
                .collect(),
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            poetry_type: self.poetry_type.clone(),
            created_at: self.created_at,
            source_type: self.effective_source_type(),
            page_count: match &self.content {
                DocumentVariant::PdfCentric { pages, .. } => pages.len(),
                DocumentVariant::LegacyPoems { poems } => poems.len(),
            },
        }
    }
}

/// The synthetic poem id given to a page's voice note.
pub fn page_poem_id(page_number: u32) -> String {
    format!("page-{}", page_number)
}

/// Blob ids double as archive file stems, so they must be a single path segment.
pub fn validate_blob_id(id: &str) -> Result<(), DomainError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(DomainError::InvalidBlobId(id.to_string()));
    }
    Ok(())
}

/// Listing view of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub poetry_type: Option<String>,
    pub created_at: i64,
    pub source_type: SourceType,
    pub page_count: usize,
}

//=========================================================================================
// Blobs and Index Records
//=========================================================================================

/// A named binary asset (source PDF or narration audio).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Blob {
    pub fn new(id: impl Into<String>, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data,
            mime_type: mime_type.into(),
        }
    }
}

/// Derived "audio by document" index record. Regenerable from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNote {
    pub id: String,
    pub document_id: String,
    pub poem_id: String,
    pub audio_id: String,
    pub duration: f64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FixedClock, SequentialIds};

    #[test]
    fn pages_are_sorted_on_parse() {
        let json = r#"{"id":"d1","title":"T","createdAt":1,"pdfSourceId":"pdf",
            "pages":[{"pageNumber":3},{"pageNumber":1,"audioId":"a1","audioDuration":2.5}]}"#;
        let doc = Document::from_json(json.as_bytes()).unwrap();
        let numbers: Vec<u32> = doc.pages().iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(doc.pdf_source_id(), Some("pdf"));
    }

    #[test]
    fn poems_without_pdf_source_are_legacy() {
        let json = r#"{"id":"d1","title":"T","createdAt":1,
            "poems":[{"id":"p1","content":"text","mood":"calm"}]}"#;
        let doc = Document::from_json(json.as_bytes()).unwrap();
        assert!(doc.is_legacy());
        assert_eq!(doc.poems()[0].extra.get("mood"), Some(&Value::from("calm")));

        let back: Value = serde_json::from_str(&doc.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back["poems"][0]["mood"], "calm");
        assert!(back.get("pages").is_none());
    }

    #[test]
    fn pdf_source_with_poems_is_rejected() {
        let json = r#"{"id":"d1","title":"T","createdAt":1,"pdfSourceId":"x",
            "poems":[{"id":"p1"}]}"#;
        assert!(matches!(
            Document::from_json(json.as_bytes()),
            Err(DomainError::Json(_))
        ));
    }

    #[test]
    fn effective_source_type_prefers_pdf() {
        let mut doc = Document::new_pdf_centric("d".into(), "T".into(), 0, "pdf".into(), 2);
        doc.source_type = Some(SourceType::Text);
        assert_eq!(doc.effective_source_type(), SourceType::Mixed);

        doc.content = DocumentVariant::PdfCentric {
            pdf_source_id: None,
            pages: vec![],
        };
        doc.source_type = None;
        assert_eq!(doc.effective_source_type(), SourceType::Text);
    }

    #[test]
    fn validate_rejects_duplicate_pages_and_bad_ids() {
        let mut doc = Document::new_pdf_centric("d".into(), "T".into(), 0, "pdf".into(), 1);
        doc.content = DocumentVariant::PdfCentric {
            pdf_source_id: Some("pdf".into()),
            pages: vec![Page::blank(2), Page::blank(2)],
        };
        assert!(matches!(doc.validate(), Err(DomainError::DuplicatePageNumber(2))));

        doc.content = DocumentVariant::PdfCentric {
            pdf_source_id: Some("../etc".into()),
            pages: vec![],
        };
        assert!(matches!(doc.validate(), Err(DomainError::InvalidBlobId(_))));

        doc.content = DocumentVariant::PdfCentric {
            pdf_source_id: None,
            pages: vec![],
        };
        doc.title = "  ".into();
        assert!(matches!(doc.validate(), Err(DomainError::EmptyTitle)));
    }

    #[test]
    fn voice_notes_follow_audio_bearing_entries() {
        let json = r#"{"id":"d1","title":"T","createdAt":1,"poems":[
            {"id":"p1","audioId":"a1"},
            {"id":"p2","audioId":"a2","hasAudio":true,"audioDuration":5}]}"#;
        let doc = Document::from_json(json.as_bytes()).unwrap();
        let notes = doc.voice_notes(&SequentialIds::new("vn"), &FixedClock(42));
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].poem_id, "p2");
        assert_eq!(notes[0].duration, 5.0);
        assert_eq!(notes[0].created_at, 42);

        let mut pdf_doc = Document::new_pdf_centric("d2".into(), "T".into(), 0, "pdf".into(), 3);
        if let DocumentVariant::PdfCentric { pages, .. } = &mut pdf_doc.content {
            pages[2].audio_id = Some("a3".into());
        }
        let notes = pdf_doc.voice_notes(&SequentialIds::new("vn"), &FixedClock(0));
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].poem_id, "page-3");
        assert_eq!(notes[0].duration, 0.0);
    }

    #[test]
    fn has_audio_flag_is_read_leniently() {
        let json = r#"{"id":"d1","title":"T","createdAt":1,"poems":[
            {"id":"p1","audioId":"a1","hasAudio":1},
            {"id":"p2","audioId":"a2","hasAudio":"yes"},
            {"id":"p3","audioId":"a3","hasAudio":0},
            {"id":"p4","audioId":"a4","hasAudio":""},
            {"id":"p5","audioId":"a5","hasAudio":null},
            {"id":"p6","audioId":"a6","hasAudio":false}]}"#;
        let doc = Document::from_json(json.as_bytes()).unwrap();
        let notes = doc.voice_notes(&SequentialIds::new("vn"), &FixedClock(0));
        let poem_ids: Vec<&str> = notes.iter().map(|n| n.poem_id.as_str()).collect();
        assert_eq!(poem_ids, vec!["p1", "p2"]);

        let back: Value = serde_json::from_str(&doc.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back["poems"][0]["hasAudio"], 1);
        assert_eq!(back["poems"][1]["hasAudio"], "yes");
    }

    #[test]
    fn blob_ids_are_deduplicated() {
        let mut doc = Document::new_pdf_centric("d".into(), "T".into(), 0, "pdf".into(), 2);
        if let DocumentVariant::PdfCentric { pages, .. } = &mut doc.content {
            pages[0].audio_id = Some("a".into());
            pages[1].audio_id = Some("a".into());
        }
        assert_eq!(doc.blob_ids(), vec!["pdf".to_string(), "a".to_string()]);
    }
}
