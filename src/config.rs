//! Carga y gestión de configuración de la aplicación (corpus, índice y LLM).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

use crate::{chunker::ChunkerConfig, llm::SamplingParams, prompt::Persona};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub static_dir: PathBuf,
    pub open_browser: bool,

    pub data_dir: PathBuf,
    pub vector_store_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    pub top_k: usize,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,
    pub generation_timeout: Duration,
    pub generation_retries: u32,

    pub persona_file: Option<PathBuf>,
    pub persona_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            static_dir: PathBuf::from("public"),
            open_browser: false,
            data_dir: PathBuf::from("./data"),
            vector_store_path: PathBuf::from("Data.index"),
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_batch_size: 64,
            top_k: 4,
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-3.5-turbo-1106".to_string(),
            llm_temperature: 1.0,
            llm_max_tokens: 300,
            generation_timeout: Duration::from_secs(60),
            generation_retries: 0,
            persona_file: None,
            persona_version: "sales-agent-v1".to_string(),
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    /// Toda clave ausente toma su valor por defecto.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria (útil en tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let llm_provider = LlmProvider::from_str(&string("LLM_PROVIDER", "openai"))?;

        Ok(Self {
            server_addr: string("SERVER_ADDR", &defaults.server_addr),
            static_dir: lookup("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
            open_browser: parse_or(&lookup, "OPEN_BROWSER", defaults.open_browser)?,

            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            vector_store_path: lookup("VECTOR_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.vector_store_path),
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_or(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            embedding_batch_size: parse_or(&lookup, "EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)?,
            top_k: parse_or(&lookup, "RAG_TOP_K", defaults.top_k)?,

            llm_provider,
            llm_embedding_model: string("LLM_EMBEDDING_MODEL", &defaults.llm_embedding_model),
            llm_chat_model: string("LLM_CHAT_MODEL", &defaults.llm_chat_model),
            llm_temperature: parse_or(&lookup, "LLM_TEMPERATURE", defaults.llm_temperature)?,
            llm_max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            generation_timeout: Duration::from_secs(parse_or(
                &lookup,
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            generation_retries: parse_or(&lookup, "GENERATION_RETRIES", defaults.generation_retries)?,

            persona_file: lookup("PERSONA_FILE").map(PathBuf::from),
            persona_version: string("PERSONA_VERSION", &defaults.persona_version),
        })
    }

    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            model: self.llm_chat_model.clone(),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }

    /// Persona desde `PERSONA_FILE` si está definida; si no, la integrada.
    pub fn persona(&self) -> Result<Persona> {
        match &self.persona_file {
            Some(path) => Persona::from_file(self.persona_version.clone(), path),
            None => Ok(Persona::default()),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}
