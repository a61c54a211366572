//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use kavya_core::ids::{SystemClock, UuidGenerator};
use kavya_core::ports::DocumentStore;
use kavya_core::Library;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires a store into a library with random ids and the system clock.
    pub fn new(store: Arc<dyn DocumentStore>, config: Arc<Config>) -> Self {
        Self {
            library: Library::new(store, Arc::new(UuidGenerator), Arc::new(SystemClock))
                .with_unpacked_limit(config.max_unpacked_bytes),
            config,
        }
    }
}
