//! crates/kavya_core/src/package.rs
//!
//! The `.kavyaSwar` package codec. A package is a zip container holding:
//!
//! - `metadata.json`: the pretty-printed `Document`, the only source of
//!   structure on import.
//! - `<blobId>.pdf` at the root: the source PDF, or a legacy per-poem PDF.
//! - `audio/<blobId>.m4a`: page or poem narration.
//!
//! Export pulls blobs from a `DocumentStore`; import writes them back together
//! with the document and its regenerated voice note index. Assets that cannot
//! be found on either side are reported as `MissingAsset`s instead of failing
//! the whole operation.

use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use serde::Serialize;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::{Blob, Document, DomainError, DocumentVariant, MIME_AUDIO, MIME_PDF};
use crate::ids::{Clock, IdGenerator};
use crate::ports::{DocumentStore, PortError};

pub const METADATA_ENTRY: &str = "metadata.json";
pub const AUDIO_FOLDER: &str = "audio";
pub const PACKAGE_EXTENSION: &str = "kavyaSwar";
pub const PACKAGE_MIME: &str = "application/zip";
/// Upper bound on the bytes an import may inflate, summed over all entries.
pub const DEFAULT_MAX_UNPACKED_BYTES: u64 = 1024 * 1024 * 1024;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The container opened but is not a package (e.g. no `metadata.json`).
    #[error("Invalid .kavyaSwar file: {0}")]
    InvalidArchive(String),
    /// The container or the metadata JSON is malformed.
    #[error("Failed to parse package: {0}")]
    Parse(String),
    #[error("Package describes an invalid document: {0}")]
    Domain(DomainError),
    #[error("Failed to read from the document store: {0}")]
    StoreRead(#[source] PortError),
    #[error("Failed to write to the document store: {0}")]
    StoreWrite(#[source] PortError),
}

impl From<ZipError> for PackageError {
    fn from(e: ZipError) -> Self {
        PackageError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for PackageError {
    fn from(e: std::io::Error) -> Self {
        PackageError::Parse(e.to_string())
    }
}

impl From<DomainError> for PackageError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Json(inner) => PackageError::Parse(inner.to_string()),
            other => PackageError::Domain(other),
        }
    }
}

//=========================================================================================
// Asset Naming
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    SourcePdf,
    PoemPdf,
    PageAudio,
    PoemAudio,
}

impl AssetKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AssetKind::SourcePdf | AssetKind::PoemPdf => MIME_PDF,
            AssetKind::PageAudio | AssetKind::PoemAudio => MIME_AUDIO,
        }
    }

    /// Deterministic entry path of a blob inside a package.
    pub fn archive_path(&self, blob_id: &str) -> String {
        match self {
            AssetKind::SourcePdf | AssetKind::PoemPdf => format!("{}.pdf", blob_id),
            AssetKind::PageAudio | AssetKind::PoemAudio => {
                format!("{}/{}.m4a", AUDIO_FOLDER, blob_id)
            }
        }
    }
}

/// A blob referenced by a document, with the role it plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub blob_id: String,
    pub kind: AssetKind,
}

impl AssetRef {
    fn new(blob_id: &str, kind: AssetKind) -> Self {
        Self {
            blob_id: blob_id.to_string(),
            kind,
        }
    }

    pub fn path(&self) -> String {
        self.kind.archive_path(&self.blob_id)
    }

    fn missing(&self) -> MissingAsset {
        MissingAsset {
            blob_id: self.blob_id.clone(),
            kind: self.kind,
            path: self.path(),
        }
    }
}

/// A referenced blob that could not be found. Recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingAsset {
    pub blob_id: String,
    pub kind: AssetKind,
    pub path: String,
}

/// An entry path split into at most one folder and a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivePath<'a> {
    pub folder: Option<&'a str>,
    pub file_name: &'a str,
}

impl<'a> ArchivePath<'a> {
    pub fn parse(path: &'a str) -> Self {
        match path.split_once('/') {
            Some((folder, file_name)) => Self {
                folder: Some(folder),
                file_name,
            },
            None => Self {
                folder: None,
                file_name: path,
            },
        }
    }
}

/// Assets in the order export writes them: source PDF, page audio in page
/// order, then legacy poem audio and PDFs. Each path appears once.
pub fn export_assets(doc: &Document) -> Vec<AssetRef> {
    let mut assets = Vec::new();
    match &doc.content {
        DocumentVariant::PdfCentric {
            pdf_source_id,
            pages,
        } => {
            if let Some(id) = pdf_source_id {
                assets.push(AssetRef::new(id, AssetKind::SourcePdf));
            }
            for audio_id in pages.iter().filter_map(|p| p.audio_id.as_deref()) {
                assets.push(AssetRef::new(audio_id, AssetKind::PageAudio));
            }
        }
        DocumentVariant::LegacyPoems { poems } => {
            for poem in poems {
                if let Some(audio_id) = &poem.audio_id {
                    assets.push(AssetRef::new(audio_id, AssetKind::PoemAudio));
                }
                if let Some(file_ref) = poem.pdf_ref() {
                    assets.push(AssetRef::new(file_ref, AssetKind::PoemPdf));
                }
            }
        }
    }
    dedup_by_path(assets)
}

/// Assets in the order import restores them: legacy poem audio, legacy poem
/// PDFs, page audio, then the source PDF.
pub fn import_assets(doc: &Document) -> Vec<AssetRef> {
    let mut assets = Vec::new();
    match &doc.content {
        DocumentVariant::LegacyPoems { poems } => {
            for audio_id in poems.iter().filter_map(|p| p.audio_id.as_deref()) {
                assets.push(AssetRef::new(audio_id, AssetKind::PoemAudio));
            }
            for file_ref in poems.iter().filter_map(|p| p.pdf_ref()) {
                assets.push(AssetRef::new(file_ref, AssetKind::PoemPdf));
            }
        }
        DocumentVariant::PdfCentric {
            pdf_source_id,
            pages,
        } => {
            for audio_id in pages.iter().filter_map(|p| p.audio_id.as_deref()) {
                assets.push(AssetRef::new(audio_id, AssetKind::PageAudio));
            }
            if let Some(id) = pdf_source_id {
                assets.push(AssetRef::new(id, AssetKind::SourcePdf));
            }
        }
    }
    dedup_by_path(assets)
}

fn dedup_by_path(assets: Vec<AssetRef>) -> Vec<AssetRef> {
    let mut seen = HashSet::new();
    assets.into_iter().filter(|a| seen.insert(a.path())).collect()
}

/// Download name for a package: the title with path-hostile characters replaced.
pub fn package_file_name(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() { "kavya".to_string() } else { stem };
    format!("{}.{}", stem, PACKAGE_EXTENSION)
}

//=========================================================================================
// Results
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ExportedPackage {
    pub bytes: Vec<u8>,
    /// Every file entry written, in creation order, `metadata.json` first.
    pub entries: Vec<String>,
    pub missing: Vec<MissingAsset>,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub document_id: String,
    pub document: Document,
    /// Blob ids written to the store.
    pub restored: Vec<String>,
    pub missing: Vec<MissingAsset>,
}

//=========================================================================================
// Codec
//=========================================================================================

/// Converts between a stored document (plus its blobs) and a package.
pub struct PackageCodec<'a> {
    store: &'a dyn DocumentStore,
    ids: &'a dyn IdGenerator,
    clock: &'a dyn Clock,
    max_unpacked_bytes: u64,
}

impl<'a> PackageCodec<'a> {
    pub fn new(store: &'a dyn DocumentStore, ids: &'a dyn IdGenerator, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            ids,
            clock,
            max_unpacked_bytes: DEFAULT_MAX_UNPACKED_BYTES,
        }
    }

    /// Caps how many decompressed bytes `import` reads from one package.
    pub fn with_unpacked_limit(mut self, limit: u64) -> Self {
        self.max_unpacked_bytes = limit;
        self
    }

    /// Builds a package for a fully loaded document. Reads blobs only.
    pub async fn export(&self, doc: &Document) -> Result<ExportedPackage, PackageError> {
        doc.validate()?;
        let metadata = doc.to_json_pretty()?;

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        let mut missing = Vec::new();
        for asset in export_assets(doc) {
            let blob = self
                .store
                .get_blob(&asset.blob_id)
                .await
                .map_err(PackageError::StoreRead)?;
            match blob {
                Some(blob) => files.push((asset.path(), blob.data)),
                None => {
                    warn!(
                        "Blob {} ({:?}) of document {} is missing; leaving it out of the package",
                        asset.blob_id, asset.kind, doc.id
                    );
                    missing.push(asset.missing());
                }
            }
        }

        let (bytes, entries) = write_archive(&metadata, &files)?;
        info!(
            "Exported document {} as a package of {} bytes ({} entries, {} missing)",
            doc.id,
            bytes.len(),
            entries.len(),
            missing.len()
        );
        Ok(ExportedPackage {
            bytes,
            entries,
            missing,
        })
    }

    /// Restores a package into the store and returns what was written.
    ///
    /// The archive and its metadata are fully parsed and validated before the
    /// first write. Writes then go blobs, document, voice notes; a failing
    /// write aborts the import without undoing earlier ones.
    pub async fn import(&self, archive: &[u8]) -> Result<ImportOutcome, PackageError> {
        let ParsedPackage {
            mut document,
            payloads,
            missing,
        } = read_archive(archive, self.max_unpacked_bytes)?;

        for asset in &missing {
            warn!(
                "Package entry {} is absent; blob {} stays missing",
                asset.path, asset.blob_id
            );
        }

        let mut restored = Vec::with_capacity(payloads.len());
        for (asset, data) in payloads {
            debug!("Restoring blob {} from {}", asset.blob_id, asset.path());
            self.store
                .save_blob(Blob::new(asset.blob_id.clone(), data, asset.kind.mime_type()))
                .await
                .map_err(PackageError::StoreWrite)?;
            restored.push(asset.blob_id);
        }

        document.source_type = Some(document.effective_source_type());
        let document_id = self
            .store
            .save_document(&document)
            .await
            .map_err(PackageError::StoreWrite)?;

        // Replace rather than append so that re-importing stays idempotent.
        self.store
            .delete_voice_notes(&document_id)
            .await
            .map_err(PackageError::StoreWrite)?;
        let notes = document.voice_notes(self.ids, self.clock);
        let note_count = notes.len();
        for note in notes {
            self.store
                .save_voice_note(note)
                .await
                .map_err(PackageError::StoreWrite)?;
        }

        info!(
            "Imported document {} ({} blobs restored, {} missing, {} voice notes)",
            document_id,
            restored.len(),
            missing.len(),
            note_count
        );
        Ok(ImportOutcome {
            document_id,
            document,
            restored,
            missing,
        })
    }
}

//=========================================================================================
// Zip Container
//=========================================================================================

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

fn write_archive(
    metadata: &str,
    files: &[(String, Vec<u8>)],
) -> Result<(Vec<u8>, Vec<String>), PackageError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::with_capacity(files.len() + 1);
    let mut folders: HashSet<&str> = HashSet::new();

    zip.start_file(METADATA_ENTRY, file_options())?;
    zip.write_all(metadata.as_bytes())?;
    entries.push(METADATA_ENTRY.to_string());

    for (path, data) in files {
        let parsed = ArchivePath::parse(path);
        if let Some(folder) = parsed.folder {
            if folders.insert(folder) {
                zip.add_directory(format!("{}/", folder), file_options())?;
            }
        }
        zip.start_file(path.as_str(), file_options())?;
        zip.write_all(data)?;
        entries.push(path.clone());
    }

    let bytes = zip.finish()?.into_inner();
    Ok((bytes, entries))
}

#[derive(Debug)]
struct ParsedPackage {
    document: Document,
    payloads: Vec<(AssetRef, Vec<u8>)>,
    missing: Vec<MissingAsset>,
}

fn read_archive(archive: &[u8], max_unpacked_bytes: u64) -> Result<ParsedPackage, PackageError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut budget = max_unpacked_bytes;

    let metadata = match read_entry(&mut zip, METADATA_ENTRY, &mut budget)? {
        Some(bytes) => bytes,
        None => {
            return Err(PackageError::InvalidArchive(format!(
                "missing {}",
                METADATA_ENTRY
            )))
        }
    };
    let document = Document::from_json(&metadata)?;
    document.validate()?;

    let mut payloads = Vec::new();
    let mut missing = Vec::new();
    for asset in import_assets(&document) {
        match read_entry(&mut zip, &asset.path(), &mut budget)? {
            Some(data) => payloads.push((asset, data)),
            None => missing.push(asset.missing()),
        }
    }

    Ok(ParsedPackage {
        document,
        payloads,
        missing,
    })
}

/// Reads one entry, charging its inflated size against `budget`. Neither the
/// size the archive declares nor the bytes actually inflated may exceed it.
fn read_entry<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
    budget: &mut u64,
) -> Result<Option<Vec<u8>>, PackageError> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.size() > *budget {
        return Err(PackageError::InvalidArchive(format!(
            "{} declares {} bytes, more than the {} bytes left to unpack",
            name,
            file.size(),
            *budget
        )));
    }

    let mut buf = Vec::new();
    file.by_ref()
        .take(budget.saturating_add(1))
        .read_to_end(&mut buf)?;
    let read = buf.len() as u64;
    if read > *budget {
        return Err(PackageError::InvalidArchive(format!(
            "{} inflates past the {} bytes left to unpack",
            name, *budget
        )));
    }
    *budget -= read;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Page;

    #[test]
    fn archive_paths_follow_naming_scheme() {
        assert_eq!(AssetKind::SourcePdf.archive_path("p"), "p.pdf");
        assert_eq!(AssetKind::PoemPdf.archive_path("f"), "f.pdf");
        assert_eq!(AssetKind::PageAudio.archive_path("a"), "audio/a.m4a");
        assert_eq!(AssetKind::PoemAudio.archive_path("a"), "audio/a.m4a");
    }

    #[test]
    fn archive_path_splits_one_folder() {
        let p = ArchivePath::parse("audio/x.m4a");
        assert_eq!(p.folder, Some("audio"));
        assert_eq!(p.file_name, "x.m4a");

        let root = ArchivePath::parse("x.pdf");
        assert_eq!(root.folder, None);
        assert_eq!(root.file_name, "x.pdf");
    }

    #[test]
    fn shared_audio_is_listed_once() {
        let mut doc = Document::new_pdf_centric("d".into(), "T".into(), 0, "pdf".into(), 0);
        doc.content = DocumentVariant::PdfCentric {
            pdf_source_id: Some("pdf".into()),
            pages: vec![
                Page {
                    page_number: 1,
                    audio_id: Some("same".into()),
                    audio_duration: Some(1.0),
                },
                Page {
                    page_number: 2,
                    audio_id: Some("same".into()),
                    audio_duration: Some(1.0),
                },
            ],
        };
        let paths: Vec<String> = export_assets(&doc).iter().map(AssetRef::path).collect();
        assert_eq!(paths, vec!["pdf.pdf", "audio/same.m4a"]);

        let paths: Vec<String> = import_assets(&doc).iter().map(AssetRef::path).collect();
        assert_eq!(paths, vec!["audio/same.m4a", "pdf.pdf"]);
    }

    #[test]
    fn write_archive_is_byte_stable() {
        let files = vec![("audio/a.m4a".to_string(), vec![1, 2, 3])];
        let (first, entries) = write_archive("{}", &files).unwrap();
        let (second, _) = write_archive("{}", &files).unwrap();
        assert_eq!(first, second);
        assert_eq!(entries, vec!["metadata.json", "audio/a.m4a"]);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            read_archive(b"definitely not a zip", DEFAULT_MAX_UNPACKED_BYTES),
            Err(PackageError::Parse(_))
        ));
    }

    #[test]
    fn unpacked_budget_is_shared_by_all_entries() {
        let metadata = r#"{"id":"d","title":"T","createdAt":0,"pdfSourceId":"p","pages":[]}"#;
        let files = vec![("p.pdf".to_string(), vec![7; 100])];
        let (bytes, _) = write_archive(metadata, &files).unwrap();

        let budget = metadata.len() as u64 + 100;
        let parsed = read_archive(&bytes, budget).unwrap();
        assert_eq!(parsed.payloads.len(), 1);

        let err = read_archive(&bytes, budget - 1).unwrap_err();
        assert!(matches!(err, PackageError::InvalidArchive(_)));
        assert!(err.to_string().contains("p.pdf"));
    }

    #[test]
    fn package_file_name_is_sanitized() {
        assert_eq!(package_file_name("Gitanjali: Part 1"), "Gitanjali_ Part 1.kavyaSwar");
        assert_eq!(package_file_name("  "), "kavya.kavyaSwar");
    }
}
