use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::splitter::TextSplitter;
use crate::types::{Chunk, Document, Page};

/// File extensions the loader understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 384, overlap_chars: 20 }
    }
}

/// Loads documents from a directory and splits them into chunks.
#[derive(Debug, Clone)]
pub struct DataProcessor {
    splitter: TextSplitter,
}

impl DataProcessor {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        Ok(Self { splitter: TextSplitter::new(config.max_chars, config.overlap_chars)? })
    }

    /// Chunks every supported document under `data_dir`, ordered by path,
    /// then page, then position.
    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<Chunk>> {
        let files = list_document_files(data_dir)?;
        if files.is_empty() {
            tracing::info!(dir = %data_dir.display(), "no documents found");
            return Ok(Vec::new());
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            tracing::debug!(file = %file_path.display(), n = file_index + 1, of = files.len(), "processing document");
            let pages = match load_pages(file_path) {
                Ok(pages) => pages,
                Err(error) => {
                    tracing::warn!(file = %file_path.display(), %error, "skipping unreadable document");
                    continue;
                }
            };
            let doc = Document { name: doc_name(file_path), path: file_path.clone(), page_count: pages.len() };
            all_chunks.extend(self.chunk_document(&doc, &pages));
        }
        tracing::info!(files = files.len(), chunks = all_chunks.len(), "processed documents");
        Ok(all_chunks)
    }

    pub fn chunk_document(&self, doc: &Document, pages: &[Page]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for (chunk_index, text) in self.splitter.split(&page.text).into_iter().enumerate() {
                chunks.push(Chunk::new(doc, page.number, chunk_index, text));
            }
        }
        chunks
    }
}

/// Supported files under `root`, sorted by path. Hidden files are skipped.
pub fn list_document_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!("documents directory {}", root.display())));
    }
    fs::read_dir(root)
        .map_err(|e| Error::NotFound(format!("documents directory {}: {}", root.display(), e)))?;
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
        if !hidden && is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Extracts text per page. PDFs go through `pdf-extract`; text files are one page.
pub fn load_pages(path: &Path) -> Result<Vec<Page>> {
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
    let texts = match ext.as_deref() {
        Some("pdf") => extract_pdf_pages(path)?,
        Some("txt") => vec![read_text_lossy(path)?],
        _ => return Err(Error::InvalidConfig(format!("unsupported document type: {}", path.display()))),
    };
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page { number: i + 1, text })
        .collect())
}

fn extract_pdf_pages(path: &Path) -> Result<Vec<String>> {
    let owned = path.to_path_buf();
    // pdf-extract panics on some malformed inputs.
    match std::panic::catch_unwind(move || pdf_extract::extract_text_by_pages(&owned)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(Error::backend(&format!("extracting {}", path.display()), e)),
        Err(_) => Err(Error::backend("extracting PDF", format!("parser panicked on {}", path.display()))),
    }
}

fn read_text_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn doc_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
}
