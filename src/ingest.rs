//! Ingesta de un directorio del sistema de archivos: cada fichero con una
//! extensión reconocida se convierte en un único `Document` de texto plano.
//!
//! El despacho por formato se hace a través de lectores registrados
//! (`DocumentReader`); el primero que acepta la extensión se encarga del fichero.

use std::{
    fs,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use mime_guess::MimeGuess;
use serde_json::Value;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    error::{RagError, RagResult},
    models::Document,
};

/// Límite de bytes descomprimidos para `word/document.xml` (protección zip-bomb).
const MAX_DOCX_XML_BYTES: u64 = 50 * 1024 * 1024;

/// Capacidad de lectura de un formato concreto.
pub trait DocumentReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// `extension` llega siempre en minúsculas y sin el punto.
    fn can_handle(&self, extension: &str) -> bool;

    /// Devuelve el contenido del fichero como un único texto plano.
    fn read(&self, path: &Path) -> RagResult<String>;
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos, {} con error.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.files_failed
        )
    }
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub summary: IngestionSummary,
}

/// Cargador de un directorio con un conjunto de lectores registrados.
pub struct DirectoryLoader {
    root: PathBuf,
    readers: Vec<Box<dyn DocumentReader>>,
}

impl DirectoryLoader {
    /// Cargador sin lectores; todos los ficheros se omiten hasta registrar alguno.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readers: Vec::new(),
        }
    }

    /// Cargador con los formatos soportados: txt/md, json, csv, pdf y docx.
    pub fn with_default_readers(root: impl Into<PathBuf>) -> Self {
        Self::new(root)
            .with_reader(TextReader)
            .with_reader(JsonReader)
            .with_reader(CsvReader)
            .with_reader(PdfReader)
            .with_reader(DocxReader)
    }

    pub fn with_reader(mut self, reader: impl DocumentReader + 'static) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reader_for(&self, extension: &str) -> Option<&dyn DocumentReader> {
        self.readers
            .iter()
            .find(|r| r.can_handle(extension))
            .map(|r| r.as_ref())
    }

    /// Recorre recursivamente el directorio (en orden de nombre, para que el
    /// resultado sea determinista) y produce un `Document` por fichero reconocido.
    ///
    /// Un fallo en un fichero concreto se registra y se omite; sólo es fatal
    /// que la raíz no exista o no se pueda leer.
    pub fn load(&self) -> RagResult<LoadOutcome> {
        if !self.root.is_dir() {
            return Err(RagError::Ingestion(format!(
                "La ruta no es un directorio: {}",
                self.root.display()
            )));
        }

        let mut outcome = LoadOutcome::default();

        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(RagError::Ingestion(format!(
                        "No se pudo leer el directorio {}: {err}",
                        self.root.display()
                    )));
                }
                Err(err) => {
                    warn!("Entrada ilegible en el corpus, se omite: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            outcome.summary.files_scanned += 1;
            let path = entry.path();
            let extension = path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("")
                .to_lowercase();

            let Some(reader) = self.reader_for(&extension) else {
                info!(
                    "Saltando fichero con extensión no soportada ('.{}'): {}",
                    extension,
                    path.display()
                );
                outcome.summary.files_skipped += 1;
                continue;
            };

            match reader.read(path) {
                Ok(text) if text.trim().is_empty() => {
                    warn!("Fichero vacío o sin texto útil: {}", path.display());
                    outcome.summary.files_skipped += 1;
                }
                Ok(text) => {
                    outcome.documents.push(self.make_document(path, extension, text));
                    outcome.summary.files_ingested += 1;
                }
                Err(err) => {
                    warn!(
                        "El lector '{}' falló con {}: {err}. Saltando fichero.",
                        reader.name(),
                        path.display()
                    );
                    outcome.summary.files_failed += 1;
                }
            }
        }

        info!("Corpus {} cargado. {}", self.root.display(), outcome.summary);
        Ok(outcome)
    }

    fn make_document(&self, path: &Path, extension: String, text: String) -> Document {
        let id = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let mime_type = MimeGuess::from_path(path).first().map(|m| m.to_string());

        Document {
            id,
            source: path.to_path_buf(),
            extension,
            mime_type,
            text,
        }
    }
}

fn read_error(path: &Path, err: impl std::fmt::Display) -> RagError {
    RagError::Ingestion(format!("{}: {err}", path.display()))
}

// ---------------------------------------------------------------------
// LECTORES
// ---------------------------------------------------------------------

/// Texto plano y Markdown.
pub struct TextReader;

impl DocumentReader for TextReader {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "md")
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        fs::read_to_string(path).map_err(|e| read_error(path, e))
    }
}

/// CSV con cabecera: cada fila se vuelve un bloque de líneas `cabecera: valor`.
pub struct CsvReader;

impl DocumentReader for CsvReader {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "csv"
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| read_error(path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| read_error(path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| read_error(path, e))?;
            let lines: Vec<String> = record
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let key = headers.get(i).map(String::as_str).unwrap_or("");
                    format!("{}: {}", key, value.trim())
                })
                .collect();
            rows.push(lines.join("\n"));
        }

        Ok(rows.join("\n\n"))
    }
}

/// JSON: todos los valores de tipo cadena, recorridos en profundidad.
pub struct JsonReader;

impl DocumentReader for JsonReader {
    fn name(&self) -> &'static str {
        "json"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "json"
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        let raw = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| read_error(path, e))?;
        let mut out = Vec::new();
        collect_json_strings(&value, &mut out);
        Ok(out.join("\n"))
    }
}

fn collect_json_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

pub struct PdfReader;

impl DocumentReader for PdfReader {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        pdf_extract::extract_text(path).map_err(|e| read_error(path, e))
    }
}

/// Word (OOXML): texto de las runs `<w:t>`, un salto de línea por párrafo.
pub struct DocxReader;

impl DocumentReader for DocxReader {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "docx"
    }

    fn read(&self, path: &Path) -> RagResult<String> {
        let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
        extract_docx_text(&bytes).map_err(|e| read_error(path, e))
    }
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml no encontrado".to_string())?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCX_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_DOCX_XML_BYTES {
        return Err("word/document.xml excede el límite de tamaño".to_string());
    }

    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(|e| e.to_string())?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
