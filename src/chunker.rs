//! Troceado recursivo de texto.
//!
//! Se intenta cortar primero por párrafos (`\n\n`), luego por líneas, luego
//! por palabras y, en último caso, por caracteres. Los trozos pequeños se
//! agrupan hasta `max_chunk_size`, arrastrando hasta `chunk_overlap`
//! caracteres del final del chunk anterior. Las longitudes se miden en
//! `char`s, no en bytes.

use std::collections::VecDeque;

use crate::models::{Chunk, Document};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkerConfig {
    /// `max_chunk_size` es al menos 1 y el solape siempre queda por debajo de él.
    pub fn new(max_chunk_size: usize, chunk_overlap: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1);
        Self {
            max_chunk_size,
            chunk_overlap: chunk_overlap.min(max_chunk_size - 1),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Trocea todos los documentos, en orden. Ningún chunk mezcla dos documentos.
pub fn chunk_documents(documents: &[Document], cfg: &ChunkerConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| {
            split_text(&doc.text, cfg)
                .into_iter()
                .enumerate()
                .map(move |(i, text)| Chunk::new(doc, i, text))
        })
        .collect()
}

/// Divide un texto en trozos de como mucho `max_chunk_size` caracteres.
pub fn split_text(text: &str, cfg: &ChunkerConfig) -> Vec<String> {
    let mut out = Vec::new();
    split_recursive(text, &SEPARATORS, cfg, &mut out);
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], cfg: &ChunkerConfig, out: &mut Vec<String>) {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|p| !p.is_empty()).collect()
    };

    let mut pending: Vec<&str> = Vec::new();
    for piece in pieces {
        if char_len(piece) < cfg.max_chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            out.extend(merge_pieces(&pending, separator, cfg));
            pending.clear();
        }
        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            split_recursive(piece, finer, cfg, out);
        }
    }
    if !pending.is_empty() {
        out.extend(merge_pieces(&pending, separator, cfg));
    }
}

/// Agrupa piezas ya pequeñas en chunks, con solape hacia delante.
fn merge_pieces(pieces: &[&str], separator: &str, cfg: &ChunkerConfig) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joined_sep = if window.is_empty() { 0 } else { sep_len };

        if total + len + joined_sep > cfg.max_chunk_size && !window.is_empty() {
            push_joined(&mut chunks, &window, separator);

            while total > cfg.chunk_overlap
                || (total > 0
                    && total + len + if window.is_empty() { 0 } else { sep_len }
                        > cfg.max_chunk_size)
            {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + if window.is_empty() { 0 } else { sep_len };
        window.push_back(piece);
    }

    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
