//! Modelos de dominio (documentos, chunks, embeddings y turnos de conversación).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Documento normalizado leído del corpus.
/// Se crea una vez en la ingesta y no se modifica después.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Ruta relativa a la raíz del corpus; estable entre ejecuciones.
    pub id: String,
    pub source: PathBuf,
    pub extension: String,
    pub mime_type: Option<String>,
    pub text: String,
}

/// Trozo de texto acotado, con referencia a su documento de origen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source: PathBuf,
    /// Posición dentro del documento (empieza en 0 para cada documento).
    pub index: usize,
    pub text: String,
}

impl Chunk {
    pub fn new(document: &Document, index: usize, text: String) -> Self {
        Self {
            id: format!("{}#{}", document.id, index),
            document_id: document.id.clone(),
            source: document.source.clone(),
            index,
            text,
        }
    }
}

/// Chunk junto con su vector. Todos los vectores de un índice tienen la misma dimensión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f64>,
}

/// Un par pregunta/respuesta registrado en el historial de la sesión.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    /// Orden de llegada de la pregunta.
    pub sequence: u64,
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
    pub answered_at: DateTime<Utc>,
}
