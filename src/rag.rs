//! Consulta RAG: recuperación de contexto + generación con la persona fija.
//!
//! Flujo por pregunta:
//!   1. Se asegura el índice compartido (se carga o construye una sola vez).
//!   2. Búsqueda vectorial de los `top_k` chunks más relevantes.
//!   3. Ensamblado del prompt: persona, contexto y pregunta.
//!   4. El LLM responde (con tiempo límite y reintentos opcionales).
//!   5. Se registra el turno en el historial.

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::{
    chunker::ChunkerConfig,
    config::AppConfig,
    conversation::ConversationState,
    error::{RagError, RagResult},
    ingest::DirectoryLoader,
    llm::{CompletionService, EmbeddingService, LlmManager, SamplingParams},
    models::ConversationTurn,
    prompt::{AssembledPrompt, Persona, PromptTemplate},
    vector_store::{self, IndexSource, VectorIndex},
};

/// Espera base entre reintentos de generación; se duplica en cada intento.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Tope de la espera entre reintentos.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Etapas por las que pasa cada pregunta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Idle,
    Embedding,
    Retrieving,
    PromptAssembly,
    Generating,
    Recorded,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub index_path: PathBuf,
    pub chunker: ChunkerConfig,
    pub embedding_batch_size: usize,
    pub top_k: usize,
    pub sampling: SamplingParams,
    pub generation_timeout: Duration,
    pub generation_retries: u32,
}

impl RagSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            index_path: cfg.vector_store_path.clone(),
            chunker: cfg.chunker(),
            embedding_batch_size: cfg.embedding_batch_size,
            top_k: cfg.top_k,
            sampling: cfg.sampling(),
            generation_timeout: cfg.generation_timeout,
            generation_retries: cfg.generation_retries,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub chunks: usize,
    pub dims: usize,
}

/// Orquestador de preguntas. Se construye una vez al arrancar y se comparte
/// (vía `Arc`) entre todas las peticiones.
pub struct RetrievalAnswerer {
    settings: RagSettings,
    loader: DirectoryLoader,
    persona: Persona,
    template: PromptTemplate,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn CompletionService>,
    index: OnceCell<Arc<VectorIndex>>,
    history: ConversationState,
}

impl RetrievalAnswerer {
    pub fn new(
        settings: RagSettings,
        loader: DirectoryLoader,
        persona: Persona,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            settings,
            loader,
            persona,
            template: PromptTemplate::default(),
            embedder,
            generator,
            index: OnceCell::new(),
            history: ConversationState::new(),
        }
    }

    /// Construye el orquestador con los clientes reales del proveedor configurado.
    pub fn from_config(cfg: &AppConfig, llm: &LlmManager) -> anyhow::Result<Self> {
        Ok(Self::new(
            RagSettings::from_config(cfg),
            DirectoryLoader::with_default_readers(&cfg.data_dir),
            cfg.persona()?,
            llm.embedder()?,
            llm.generator()?,
        ))
    }

    /// Fija un índice ya disponible; no se tocará ni el corpus ni el disco.
    pub fn with_index(self, index: VectorIndex) -> Self {
        let cell = OnceCell::new_with(Some(Arc::new(index)));
        Self { index: cell, ..self }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Devuelve el índice activo, resolviéndolo la primera vez.
    ///
    /// Las llamadas concurrentes esperan a la misma inicialización y sólo
    /// ven el índice una vez completo. Si la resolución falla no se guarda
    /// nada y la siguiente pregunta lo vuelve a intentar.
    pub async fn ensure_index(&self) -> RagResult<Arc<VectorIndex>> {
        let index = self
            .index
            .get_or_try_init(|| async {
                let source = vector_store::resolve_index(
                    &self.settings.index_path,
                    &self.loader,
                    &self.settings.chunker,
                    self.embedder.as_ref(),
                    self.settings.embedding_batch_size,
                )
                .await?;
                match &source {
                    IndexSource::Loaded(index) => info!("Índice existente cargado ({} chunks).", index.len()),
                    IndexSource::Built(index) => info!("Índice nuevo creado ({} chunks).", index.len()),
                }
                Ok::<_, RagError>(Arc::new(source.into_index()))
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// Resuelve el índice al arrancar para que la primera pregunta no lo pague.
    pub async fn warm_up(&self) -> RagResult<()> {
        self.ensure_index().await.map(|_| ())
    }

    /// Responde a una pregunta y la registra en el historial.
    ///
    /// Cualquier fallo deja el historial intacto. Un fallo de embeddings al
    /// consultar se devuelve como `RagError::Generation`.
    pub async fn answer(&self, question: &str) -> RagResult<String> {
        let ticket = self.history.begin_turn();
        let seq = ticket.sequence();
        stage(seq, QueryStage::Embedding);

        let index = self.ensure_index().await?;

        stage(seq, QueryStage::Retrieving);
        let retrieved = index
            .query(question, self.settings.top_k, self.embedder.as_ref())
            .await
            .map_err(|err| match err {
                RagError::Embedding(msg) => {
                    error!("Fallo de embeddings al consultar (pregunta #{seq}): {msg}");
                    RagError::Generation(format!("No se pudo recuperar contexto: {msg}"))
                }
                other => other,
            })?;
        debug!("Pregunta #{seq}: {} chunks recuperados.", retrieved.len());

        stage(seq, QueryStage::PromptAssembly);
        let context = PromptTemplate::context_block(retrieved.iter().map(|(c, _)| c.text.as_str()));
        let prompt = self.template.render(&self.persona, &context, question);

        stage(seq, QueryStage::Generating);
        let answer = self.generate(&prompt).await?;

        self.history.record(ticket, question, &answer);
        stage(seq, QueryStage::Recorded);
        stage(seq, QueryStage::Idle);

        Ok(answer)
    }

    async fn generate(&self, prompt: &AssembledPrompt) -> RagResult<String> {
        let timeout = self.settings.generation_timeout;
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(
                timeout,
                self.generator.complete(prompt, &self.settings.sampling),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RagError::Generation(format!(
                    "El modelo no respondió en {} ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(answer) => return Ok(answer),
                Err(err) if attempt < self.settings.generation_retries => {
                    let delay = retry_delay(attempt);
                    attempt += 1;
                    warn!(
                        "Generación fallida ({err}); reintento {}/{} en {} ms.",
                        attempt,
                        self.settings.generation_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(RagError::Generation(msg)) => return Err(RagError::Generation(msg)),
                Err(other) => return Err(RagError::Generation(other.to_string())),
            }
        }
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.snapshot()
    }

    pub fn index_status(&self) -> IndexStatus {
        match self.index.get() {
            Some(index) => IndexStatus {
                ready: true,
                chunks: index.len(),
                dims: index.dims(),
            },
            None => IndexStatus::default(),
        }
    }
}

fn stage(seq: u64, stage: QueryStage) {
    debug!("Pregunta #{seq} -> {stage:?}");
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}
