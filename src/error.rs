//! Taxonomía de errores del pipeline RAG.

use std::path::PathBuf;
use thiserror::Error;

/// Errores de las operaciones de ingesta, indexado y consulta.
#[derive(Debug, Error)]
pub enum RagError {
    /// Corpus inexistente o ilegible, o fichero que no se pudo interpretar.
    #[error("Error de ingesta: {0}")]
    Ingestion(String),

    /// Fallo del servicio de embeddings (red, cuota, respuesta inconsistente).
    #[error("Error de embeddings: {0}")]
    Embedding(String),

    /// El índice persistido no es utilizable.
    #[error("Índice corrupto en {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// Fallo o tiempo agotado del modelo generativo.
    #[error("Error de generación: {0}")]
    Generation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
