//! Índice vectorial en memoria con persistencia en disco.
//!
//! API pública:
//!   - `VectorIndex::build` / `save` / `load` / `query`
//!   - `resolve_index(...)`: carga el índice persistido o lo construye una vez desde el corpus.
//!
//! La búsqueda es exacta por distancia coseno (`1 - cos`), de menor a mayor.
//! En disco el índice es un directorio con `args.json` (metadatos) y
//! `docstore.json` (chunks + vectores).

use std::{fs, path::Path};

use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    chunker::{self, ChunkerConfig},
    error::{RagError, RagResult},
    ingest::DirectoryLoader,
    llm::EmbeddingService,
    models::{Chunk, EmbeddedChunk},
};

pub const INDEX_FORMAT_VERSION: u32 = 1;
const ARGS_FILE: &str = "args.json";
const DOCSTORE_FILE: &str = "docstore.json";
const SPACE_COSINE: &str = "cosine";
/// Lotes de embeddings en vuelo a la vez durante la construcción.
const EMBEDDING_CONCURRENCY: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct IndexArgs {
    format_version: u32,
    space: String,
    dims: usize,
    count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<EmbeddedChunk>,
}

/// Origen del índice activo tras el arranque.
#[derive(Debug)]
pub enum IndexSource {
    Loaded(VectorIndex),
    Built(VectorIndex),
}

impl IndexSource {
    pub fn is_built(&self) -> bool {
        matches!(self, IndexSource::Built(_))
    }

    pub fn into_index(self) -> VectorIndex {
        match self {
            IndexSource::Loaded(index) | IndexSource::Built(index) => index,
        }
    }
}

impl VectorIndex {
    pub fn empty(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EmbeddedChunk] {
        &self.entries
    }

    /// Calcula el embedding de todos los chunks y construye el índice.
    ///
    /// Todo o nada: si falla cualquier lote no se devuelve índice alguno.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingService,
        batch_size: usize,
    ) -> RagResult<Self> {
        if chunks.is_empty() {
            warn!("No hay chunks que indexar; se crea un índice vacío.");
            return Ok(Self::empty(embedder.ndims()));
        }

        let batches: Vec<Vec<String>> = chunks
            .chunks(batch_size.max(1))
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();
        let total_batches = batches.len();

        let embedded: Vec<Vec<Vec<f64>>> = stream::iter(batches.into_iter().enumerate())
            .map(|(i, texts)| async move {
                let expected = texts.len();
                let vectors = embedder.embed_texts(texts).await?;
                if vectors.len() != expected {
                    return Err(RagError::Embedding(format!(
                        "El lote {} devolvió {} embeddings para {} textos",
                        i + 1,
                        vectors.len(),
                        expected
                    )));
                }
                info!("Lote de embeddings {}/{} completado.", i + 1, total_batches);
                Ok::<_, RagError>(vectors)
            })
            .buffered(EMBEDDING_CONCURRENCY)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f64>> = embedded.into_iter().flatten().collect();
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 {
            return Err(RagError::Embedding("El servicio devolvió vectores vacíos".to_string()));
        }
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
            return Err(RagError::Embedding(format!(
                "Dimensión inconsistente en el chunk {}: {} (esperado {})",
                bad,
                vectors[bad].len(),
                dims
            )));
        }
        let declared = embedder.ndims();
        if declared != 0 && declared != dims {
            return Err(RagError::Embedding(format!(
                "El modelo declara {declared} dimensiones pero devolvió {dims}"
            )));
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();

        Ok(Self { dims, entries })
    }

    /// Persiste el índice completo. Se escribe en un directorio temporal
    /// hermano y se renombra al final, de modo que nunca queda a medias en `path`.
    pub fn save(&self, path: &Path) -> RagResult<()> {
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

        let result = self.write_into(&tmp).and_then(|_| {
            remove_existing(path)?;
            fs::rename(&tmp, path)?;
            Ok(())
        });

        if result.is_err() && tmp.exists() {
            let _ = fs::remove_dir_all(&tmp);
        }
        result?;

        info!("Índice vectorial guardado en {} ({} chunks).", path.display(), self.len());
        Ok(())
    }

    fn write_into(&self, dir: &Path) -> RagResult<()> {
        fs::create_dir_all(dir)?;
        let args = IndexArgs {
            format_version: INDEX_FORMAT_VERSION,
            space: SPACE_COSINE.to_string(),
            dims: self.dims,
            count: self.entries.len(),
        };
        fs::write(dir.join(ARGS_FILE), serde_json::to_vec_pretty(&args)?)?;
        fs::write(dir.join(DOCSTORE_FILE), serde_json::to_vec(&self.entries)?)?;
        Ok(())
    }

    /// Restaura un índice persistido, comprobando su estructura y que la
    /// dimensión coincide con la del servicio de embeddings actual.
    pub fn load(path: &Path, embedder: &dyn EmbeddingService) -> RagResult<Self> {
        let read = |name: &str| {
            fs::read(path.join(name))
                .map_err(|e| RagError::corrupt(path, format!("no se pudo leer {name}: {e}")))
        };

        let args: IndexArgs = serde_json::from_slice(&read(ARGS_FILE)?)
            .map_err(|e| RagError::corrupt(path, format!("{ARGS_FILE} inválido: {e}")))?;
        if args.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::corrupt(
                path,
                format!("versión de formato {} no soportada", args.format_version),
            ));
        }
        if args.space != SPACE_COSINE {
            return Err(RagError::corrupt(path, format!("espacio '{}' no soportado", args.space)));
        }

        let entries: Vec<EmbeddedChunk> = serde_json::from_slice(&read(DOCSTORE_FILE)?)
            .map_err(|e| RagError::corrupt(path, format!("{DOCSTORE_FILE} inválido: {e}")))?;
        if entries.len() != args.count {
            return Err(RagError::corrupt(
                path,
                format!("se esperaban {} entradas y hay {}", args.count, entries.len()),
            ));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != args.dims) {
            return Err(RagError::corrupt(
                path,
                format!(
                    "el chunk {} tiene {} dimensiones (esperado {})",
                    bad.chunk.id,
                    bad.vector.len(),
                    args.dims
                ),
            ));
        }
        let expected = embedder.ndims();
        if expected != 0 && !entries.is_empty() && expected != args.dims {
            return Err(RagError::corrupt(
                path,
                format!(
                    "el índice tiene {} dimensiones pero el modelo actual produce {}",
                    args.dims, expected
                ),
            ));
        }

        info!("Índice vectorial cargado desde {} ({} chunks).", path.display(), entries.len());
        Ok(Self {
            dims: args.dims,
            entries,
        })
    }

    /// Los `k` chunks más cercanos al texto, del mejor al peor.
    /// Con el índice vacío devuelve una lista vacía sin llamar al servicio.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        embedder: &dyn EmbeddingService,
    ) -> RagResult<Vec<(Chunk, f64)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embedder.embed_query(text).await?;
        if query_vec.len() != self.dims {
            return Err(RagError::Embedding(format!(
                "La query tiene {} dimensiones y el índice {}",
                query_vec.len(),
                self.dims
            )));
        }
        Ok(self.nearest(&query_vec, k))
    }

    /// Búsqueda exacta por distancia coseno. Los empates conservan el orden de inserción.
    pub fn nearest(&self, vector: &[f64], k: usize) -> Vec<(Chunk, f64)> {
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_distance(vector, &e.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        scored
            .into_iter()
            .take(k)
            .map(|(i, distance)| (self.entries[i].chunk.clone(), distance))
            .collect()
    }
}

/// `1 - cos(a, b)`. Vectores vacíos, de distinta longitud o nulos dan distancia 1.
/// Quita lo que haya en `path`: un índice anterior, un fichero suelto o un enlace.
fn remove_existing(path: &Path) -> RagResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 1.0;
    }
    1.0 - dot / denom
}

/// Pipeline completo de construcción: ingesta → troceado → embeddings.
pub async fn build_from_corpus(
    loader: &DirectoryLoader,
    chunker_cfg: &ChunkerConfig,
    embedder: &dyn EmbeddingService,
    batch_size: usize,
) -> RagResult<VectorIndex> {
    info!("Cargando documentos desde {}...", loader.root().display());
    let outcome = loader.load()?;
    let chunks = chunker::chunk_documents(&outcome.documents, chunker_cfg);
    info!(
        "{} documentos troceados en {} chunks.",
        outcome.documents.len(),
        chunks.len()
    );
    VectorIndex::build(chunks, embedder, batch_size).await
}

/// Si existe un índice persistido en `path` se carga; si no (o si está
/// corrupto) se construye desde el corpus y se guarda.
pub async fn resolve_index(
    path: &Path,
    loader: &DirectoryLoader,
    chunker_cfg: &ChunkerConfig,
    embedder: &dyn EmbeddingService,
    batch_size: usize,
) -> RagResult<IndexSource> {
    info!("Comprobando si existe un índice vectorial en {}...", path.display());
    if path.exists() {
        match VectorIndex::load(path, embedder) {
            Ok(index) => return Ok(IndexSource::Loaded(index)),
            Err(err @ RagError::CorruptIndex { .. }) => {
                warn!("{err}. Se reconstruye el índice desde el corpus.");
            }
            Err(err) => return Err(err),
        }
    }

    info!("Creando nuevo índice vectorial...");
    let index = build_from_corpus(loader, chunker_cfg, embedder, batch_size).await?;
    index.save(path)?;
    Ok(IndexSource::Built(index))
}
