#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use sales_agent_rag_webapp::{
    chunker::ChunkerConfig,
    ingest::{DocumentReader, TextReader},
    llm::{CompletionService, EmbeddingService, SamplingParams},
    prompt::AssembledPrompt,
    rag::RagSettings,
    RagError, RagResult,
};

pub const DIMS: usize = 256;

/// Bolsa de palabras con hashing FNV-1a: determinista y sin red.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn vectorize(text: &str) -> Vec<f64> {
        let mut v = vec![0.0; DIMS];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            v[fnv1a(token) % DIMS] += 1.0;
        }
        v
    }
}

fn fnv1a(s: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash as usize
}

#[async_trait]
impl EmbeddingService for BagOfWordsEmbedder {
    fn ndims(&self) -> usize {
        DIMS
    }

    async fn embed_texts(&self, texts: Vec<String>) -> RagResult<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("rate limit exceeded".to_string()));
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}

/// Generador que guarda cada prompt y responde con texto derivado de él.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<AssembledPrompt>>,
    pub delay: Option<Duration>,
    pub failures_left: AtomicUsize,
}

impl RecordingGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn flaky(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        })
    }

    pub fn prompts(&self) -> Vec<AssembledPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for RecordingGenerator {
    async fn complete(&self, prompt: &AssembledPrompt, _params: &SamplingParams) -> RagResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RagError::Generation("upstream 500".to_string()));
        }

        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.clone());
        Ok(format!("Answer #{} to: {}", prompts.len(), prompt.user))
    }
}

/// Lector de texto que cuenta cuántas veces se lee el corpus.
pub struct CountingReader {
    pub reads: Arc<AtomicUsize>,
}

impl DocumentReader for CountingReader {
    fn name(&self) -> &'static str {
        "counting-text"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "txt"
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        TextReader.read(path)
    }
}

pub fn settings(index_path: &Path) -> RagSettings {
    RagSettings {
        index_path: index_path.to_path_buf(),
        chunker: ChunkerConfig::new(1000, 200),
        embedding_batch_size: 2,
        top_k: 2,
        sampling: SamplingParams {
            model: "test-model".to_string(),
            temperature: 1.0,
            max_tokens: 300,
        },
        generation_timeout: Duration::from_secs(5),
        generation_retries: 0,
    }
}

pub const LAPTOP: &str = "The Laptop Pro 15 costs $1200 and has 16GB RAM.";
pub const HEADPHONES: &str = "The Bluetooth Headphones cost $99 and offer 30 hours of battery life.";
pub const SPEAKER: &str = "A portable Bluetooth speaker that pairs with the headphones.";

pub fn write_catalog(dir: &Path) {
    std::fs::write(dir.join("laptop.txt"), LAPTOP).unwrap();
    std::fs::write(dir.join("headphones.txt"), HEADPHONES).unwrap();
    std::fs::write(dir.join("speaker.txt"), SPEAKER).unwrap();
}
