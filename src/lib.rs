//! Agente de ventas RAG: ingesta de un corpus de documentos de producto,
//! índice vectorial persistente y respuestas generadas con una persona fija.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod vector_store;

pub use error::{RagError, RagResult};
