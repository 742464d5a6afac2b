//! Abstracción sobre Rig para los dos servicios externos del pipeline:
//! embeddings y generación de texto. De momento se implementa OpenAI;
//! Gemini/Ollama quedan preparados para el futuro.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts y .ndims
use rig::providers::openai;
use tracing::debug;

use crate::{
    config::{AppConfig, LlmProvider},
    error::{RagError, RagResult},
    prompt::AssembledPrompt,
};

/// Convierte texto en vectores de dimensión fija.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Dimensión que produce el modelo; `0` si el proveedor no la declara.
    fn ndims(&self) -> usize;

    async fn embed_texts(&self, texts: Vec<String>) -> RagResult<Vec<Vec<f64>>>;

    async fn embed_query(&self, text: &str) -> RagResult<Vec<f64>> {
        self.embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No se pudo generar embedding de la query".to_string()))
    }
}

/// Parámetros de muestreo con los que se invoca al modelo generativo.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Modelo generativo tratado como caja negra: prompt in, texto out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &AssembledPrompt, params: &SamplingParams) -> RagResult<String>;
}

/// Gestor de LLMs y embeddings: elige el proveedor y construye los clientes.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
        })
    }

    /// Cliente de embeddings. Sólo implementado para OpenAI.
    pub fn embedder(&self) -> Result<Arc<dyn EmbeddingService>> {
        match self.provider {
            LlmProvider::OpenAI => Ok(Arc::new(OpenAiEmbedder::new(
                openai::Client::from_env(),
                &self.embedding_model,
            ))),
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    /// Cliente de chat. Sólo implementado para OpenAI.
    pub fn generator(&self) -> Result<Arc<dyn CompletionService>> {
        match self.provider {
            LlmProvider::OpenAI => Ok(Arc::new(OpenAiGenerator::new(openai::Client::from_env()))),
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

pub struct OpenAiEmbedder {
    client: openai::Client,
    model_name: String,
}

impl OpenAiEmbedder {
    pub fn new(client: openai::Client, model_name: &str) -> Self {
        // Modelo de embeddings: config o default
        let model_name = if model_name.is_empty() {
            openai::TEXT_EMBEDDING_3_SMALL.to_string()
        } else {
            model_name.to_string()
        };
        Self { client, model_name }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    fn ndims(&self) -> usize {
        use rig::client::EmbeddingsClient as _;
        self.client.embedding_model(&self.model_name).ndims()
    }

    async fn embed_texts(&self, texts: Vec<String>) -> RagResult<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;

        let expected = texts.len();
        let embedding_model = self.client.embedding_model(&self.model_name);
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(RagError::Embedding(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            )));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

/// El cliente se crea una vez al arrancar; el agente se construye por
/// pregunta porque su preámbulo lleva el contexto recuperado.
pub struct OpenAiGenerator {
    client: openai::Client,
}

impl OpenAiGenerator {
    pub fn new(client: openai::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionService for OpenAiGenerator {
    async fn complete(&self, prompt: &AssembledPrompt, params: &SamplingParams) -> RagResult<String> {
        use rig::client::CompletionClient as _;

        debug!(
            "Invocando modelo {} (temperature={}, max_tokens={})",
            params.model, params.temperature, params.max_tokens
        );

        let agent = self
            .client
            .agent(&params.model)
            .preamble(&prompt.system)
            .temperature(params.temperature)
            .max_tokens(params.max_tokens)
            .build();

        agent
            .prompt(prompt.user.as_str())
            .await
            .map_err(|e| RagError::Generation(e.to_string()))
    }
}
