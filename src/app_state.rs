use std::sync::Arc;

use crate::rag::RetrievalAnswerer;

/// Estado compartido por los handlers de la API.
#[derive(Clone)]
pub struct AppState {
    pub answerer: Arc<RetrievalAnswerer>,
}

impl AppState {
    pub fn new(answerer: Arc<RetrievalAnswerer>) -> Self {
        Self { answerer }
    }
}
