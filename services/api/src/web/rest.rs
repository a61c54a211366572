//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use bytes::Bytes;
use kavya_core::package::{package_file_name, PACKAGE_MIME};
use kavya_core::{
    Document, DocumentSummary, LibraryError, MissingAsset, Narration, NewAudioBook, PackageError,
    VoiceNote,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

const MISSING_ASSETS_HEADER: HeaderName = HeaderName::from_static("x-missing-assets");

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_documents_handler,
        create_document_handler,
        get_document_handler,
        delete_document_handler,
        record_narration_handler,
        list_voice_notes_handler,
        export_package_handler,
        import_package_handler,
        get_blob_handler,
    ),
    components(
        schemas(
            SummaryView,
            CreateDocumentResponse,
            DocumentResponse,
            MissingAssetView,
            NarrationResponse,
            VoiceNoteView,
            ImportResponse,
        )
    ),
    tags(
        (name = "KavyaSwar API", description = "Narrated PDF audio books and their .kavyaSwar packages.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One entry of the library listing.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    id: String,
    title: String,
    author: Option<String>,
    poetry_type: Option<String>,
    created_at: i64,
    source_type: String,
    page_count: usize,
}

impl From<DocumentSummary> for SummaryView {
    fn from(s: DocumentSummary) -> Self {
        Self {
            id: s.id,
            title: s.title,
            author: s.author,
            poetry_type: s.poetry_type,
            created_at: s.created_at,
            source_type: s.source_type.as_str().to_string(),
            page_count: s.page_count,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentResponse {
    document_id: String,
}

/// A referenced asset that is not in the store.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MissingAssetView {
    blob_id: String,
    kind: String,
    path: String,
}

impl From<MissingAsset> for MissingAssetView {
    fn from(m: MissingAsset) -> Self {
        let kind = serde_json::to_value(m.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            blob_id: m.blob_id,
            kind,
            path: m.path,
        }
    }
}

/// A document in its interchange shape plus the assets that could not be resolved.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    #[schema(value_type = Object)]
    document: serde_json::Value,
    missing_assets: Vec<MissingAssetView>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NarrationResponse {
    document_id: String,
    page_number: u32,
    audio_id: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNoteView {
    id: String,
    poem_id: String,
    audio_id: String,
    duration: f64,
    created_at: i64,
}

impl From<VoiceNote> for VoiceNoteView {
    fn from(n: VoiceNote) -> Self {
        Self {
            id: n.id,
            poem_id: n.poem_id,
            audio_id: n.audio_id,
            duration: n.duration,
            created_at: n.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    document_id: String,
    restored: Vec<String>,
    missing_assets: Vec<MissingAssetView>,
}

#[derive(Deserialize)]
pub struct NarrationParams {
    duration: f64,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a library failure to a status code. Store failures are logged and
/// hidden behind a generic message.
fn error_response(context: &str, e: LibraryError) -> (StatusCode, String) {
    let status = match &e {
        LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
        LibraryError::Invalid(_) | LibraryError::Domain(_) => StatusCode::BAD_REQUEST,
        LibraryError::Package(
            PackageError::InvalidArchive(_) | PackageError::Parse(_) | PackageError::Domain(_),
        ) => StatusCode::BAD_REQUEST,
        LibraryError::Package(_) | LibraryError::Port(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("{}: {:?}", context, e);
        (status, context.to_string())
    } else {
        warn!("{}: {}", context, e);
        (status, e.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

fn document_json(document: &Document) -> Result<serde_json::Value, (StatusCode, String)> {
    serde_json::to_value(document).map_err(|e| {
        error!("Failed to serialize document {}: {:?}", document.id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to serialize document".to_string(),
        )
    })
}

//=========================================================================================
// Router
//=========================================================================================

/// Builds the API routes on top of the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route(
            "/documents",
            get(list_documents_handler).post(create_document_handler),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        )
        .route(
            "/documents/{id}/pages/{page}/audio",
            put(record_narration_handler),
        )
        .route("/documents/{id}/voice-notes", get(list_voice_notes_handler))
        .route("/documents/{id}/package", get(export_package_handler))
        .route("/packages", post(import_package_handler))
        .route("/blobs/{id}", get(get_blob_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List every audio book, newest first.
#[utoipa::path(
    get,
    path = "/documents",
    responses(
        (status = 200, description = "Library listing", body = Vec<SummaryView>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_documents_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summaries = app_state
        .library
        .list()
        .await
        .map_err(|e| error_response("Failed to list documents", e))?;
    let views: Vec<SummaryView> = summaries.into_iter().map(SummaryView::from).collect();
    Ok(Json(views))
}

async fn field_text(field: Field<'_>) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart field: {}", e)))
}

async fn field_bytes(field: Field<'_>) -> Result<Vec<u8>, (StatusCode, String)> {
    field
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| bad_request(format!("Failed to read file bytes: {}", e)))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, (StatusCode, String)> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| bad_request(format!("Field '{}' must be a number, got '{}'", name, value)))
}

/// Create an audio book from an uploaded PDF and optional page narrations.
///
/// Multipart fields: `title`, `author`, `poetryType`, `pageCount`, a `pdf`
/// file, and for each narrated page `n` an `audio-<n>` file with a
/// `duration-<n>` field in seconds.
#[utoipa::path(
    post,
    path = "/documents",
    request_body(content_type = "multipart/form-data", description = "The PDF, its metadata and page narrations."),
    responses(
        (status = 201, description = "Audio book created", body = CreateDocumentResponse),
        (status = 400, description = "Bad request (e.g., missing title or PDF)"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_document_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut book = NewAudioBook::default();
    let mut audio: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut durations: HashMap<u32, f64> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => book.title = field_text(field).await?,
            "author" => book.author = Some(field_text(field).await?),
            "poetryType" => book.poetry_type = Some(field_text(field).await?),
            "pageCount" => book.page_count = parse_number(&name, &field_text(field).await?)?,
            "pdf" => book.pdf = field_bytes(field).await?,
            other => {
                if let Some(page) = other.strip_prefix("audio-") {
                    let page = parse_number(other, page)?;
                    audio.insert(page, field_bytes(field).await?);
                } else if let Some(page) = other.strip_prefix("duration-") {
                    let page = parse_number(other, page)?;
                    let value = parse_number(other, &field_text(field).await?)?;
                    durations.insert(page, value);
                } else {
                    warn!("Ignoring unknown multipart field '{}'", other);
                }
            }
        }
    }

    book.narrations = audio
        .into_iter()
        .map(|(page_number, audio)| Narration {
            page_number,
            audio,
            duration: durations.get(&page_number).copied().unwrap_or(0.0),
        })
        .collect();

    let document_id = app_state
        .library
        .create_audio_book(book)
        .await
        .map_err(|e| error_response("Failed to create audio book", e))?;

    Ok((StatusCode::CREATED, Json(CreateDocumentResponse { document_id })))
}

/// Fetch one audio book and report any assets missing from the store.
#[utoipa::path(
    get,
    path = "/documents/{id}",
    responses(
        (status = 200, description = "The document", body = DocumentResponse),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("id" = String, Path, description = "Document id.")
    )
)]
pub async fn get_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let opened = app_state
        .library
        .open(&id)
        .await
        .map_err(|e| error_response("Failed to open document", e))?;

    Ok(Json(DocumentResponse {
        document: document_json(&opened.document)?,
        missing_assets: opened.missing.into_iter().map(MissingAssetView::from).collect(),
    }))
}

/// Delete an audio book together with its PDF, narrations and voice notes.
#[utoipa::path(
    delete,
    path = "/documents/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("id" = String, Path, description = "Document id.")
    )
)]
pub async fn delete_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .library
        .delete(&id)
        .await
        .map_err(|e| error_response("Failed to delete document", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record (or re-record) the narration of one page. The body is the raw audio.
#[utoipa::path(
    put,
    path = "/documents/{id}/pages/{page}/audio",
    request_body(content_type = "audio/m4a", description = "The recorded narration."),
    responses(
        (status = 200, description = "Narration stored", body = NarrationResponse),
        (status = 400, description = "Unknown page or empty recording"),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("id" = String, Path, description = "Document id."),
        ("page" = u32, Path, description = "1-based page number."),
        ("duration" = f64, Query, description = "Recorded duration in seconds.")
    )
)]
pub async fn record_narration_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, page)): Path<(String, u32)>,
    Query(params): Query<NarrationParams>,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let document = app_state
        .library
        .record_narration(&id, page, body.to_vec(), params.duration)
        .await
        .map_err(|e| error_response("Failed to record narration", e))?;

    let audio_id = document
        .pages()
        .iter()
        .find(|p| p.page_number == page)
        .and_then(|p| p.audio_id.clone())
        .unwrap_or_default();

    Ok(Json(NarrationResponse {
        document_id: document.id,
        page_number: page,
        audio_id,
    }))
}

/// List the voice note index records of a document.
#[utoipa::path(
    get,
    path = "/documents/{id}/voice-notes",
    responses(
        (status = 200, description = "Voice notes, oldest first", body = Vec<VoiceNoteView>),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("id" = String, Path, description = "Document id.")
    )
)]
pub async fn list_voice_notes_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let notes = app_state
        .library
        .voice_notes(&id)
        .await
        .map_err(|e| error_response("Failed to list voice notes", e))?;
    let views: Vec<VoiceNoteView> = notes.into_iter().map(VoiceNoteView::from).collect();
    Ok(Json(views))
}

/// Download a document as a `.kavyaSwar` package.
#[utoipa::path(
    get,
    path = "/documents/{id}/package",
    responses(
        (status = 200, description = "The zip package; `x-missing-assets` counts omitted blobs"),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("id" = String, Path, description = "Document id.")
    )
)]
pub async fn export_package_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (document, package) = app_state
        .library
        .export_package(&id)
        .await
        .map_err(|e| error_response("Failed to export package", e))?;

    let file_name: String = package_file_name(&document.title)
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let missing = HeaderValue::from(package.missing.len());

    info!("Serving package for document {} ({} bytes)", id, package.bytes.len());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PACKAGE_MIME)),
            (header::CONTENT_DISPOSITION, disposition),
            (MISSING_ASSETS_HEADER, missing),
        ],
        package.bytes,
    ))
}

/// Import a `.kavyaSwar` package. The body is the raw archive.
#[utoipa::path(
    post,
    path = "/packages",
    request_body(content_type = "application/zip", description = "The package file."),
    responses(
        (status = 201, description = "Package imported", body = ImportResponse),
        (status = 400, description = "Not a valid package"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn import_package_handler(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if body.is_empty() {
        return Err(bad_request("Request body must contain a package"));
    }
    let outcome = app_state
        .library
        .import_package(&body)
        .await
        .map_err(|e| error_response("Failed to import package", e))?;

    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            document_id: outcome.document_id,
            restored: outcome.restored,
            missing_assets: outcome.missing.into_iter().map(MissingAssetView::from).collect(),
        }),
    ))
}

/// Stream a stored blob (PDF or narration) with its mime type.
#[utoipa::path(
    get,
    path = "/blobs/{id}",
    responses(
        (status = 200, description = "Raw blob bytes"),
        (status = 404, description = "Unknown blob")
    ),
    params(
        ("id" = String, Path, description = "Blob id.")
    )
)]
pub async fn get_blob_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let blob = app_state
        .library
        .blob(&id)
        .await
        .map_err(|e| error_response("Failed to load blob", e))?;
    let content_type = HeaderValue::from_str(&blob.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok(([(header::CONTENT_TYPE, content_type)], blob.data))
}
