pub mod rest;
pub mod state;

// Re-export the router and handlers so the binary can assemble the server.
pub use rest::{
    create_document_handler, delete_document_handler, export_package_handler, get_blob_handler,
    get_document_handler, import_package_handler, list_documents_handler,
    list_voice_notes_handler, record_narration_handler, router,
};
pub use state::AppState;
