use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::RawDocument;

/// Extensions accepted when scanning a document directory (lower case).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "doc", "docx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extractor {
    PlainText,
    Pdf,
}

impl Extractor {
    /// `doc`/`docx` are accepted by extension but have no extractor yet.
    fn for_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" | "md" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// Lower-cased extension of `path`, if any.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

pub fn is_supported_file(path: &Path) -> bool {
    file_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Reads every supported file under a directory into a [`RawDocument`].
///
/// A file that cannot be read or parsed is logged and skipped; loading a
/// directory never fails as a whole.
#[derive(Debug, Clone, Default)]
pub struct Loader {
    recursive: bool,
}

impl Loader {
    pub fn new() -> Self { Self::default() }

    /// Also descend into subdirectories. Sources then carry the path
    /// relative to the scanned root.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn load_directory(&self, docs_dir: &Path) -> Vec<RawDocument> {
        if !docs_dir.is_dir() {
            warn!(dir = %docs_dir.display(), "document directory does not exist");
            return Vec::new();
        }
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut documents = Vec::new();
        for entry in WalkDir::new(docs_dir).min_depth(1).max_depth(max_depth).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let source = source_tag(docs_dir, path);
            match self.load_file(path) {
                Ok(Some(text)) if text.trim().is_empty() => {
                    debug!(%source, "skipping document without text");
                }
                Ok(Some(text)) => documents.push(RawDocument { text, source }),
                Ok(None) => debug!(%source, "skipping unsupported file"),
                Err(e) => warn!(%source, error = %e, "error loading file, skipping"),
            }
        }
        info!(dir = %docs_dir.display(), documents = documents.len(), "loaded documents");
        documents
    }

    /// Extract the text of a single file. `Ok(None)` means the file type is
    /// not supported.
    pub fn load_file(&self, path: &Path) -> Result<Option<String>> {
        if !is_supported_file(path) {
            return Ok(None);
        }
        let Some(ext) = file_extension(path) else { return Ok(None) };
        match Extractor::for_extension(&ext) {
            Some(Extractor::PlainText) => read_text(path).map(Some),
            Some(Extractor::Pdf) => read_pdf(path).map(Some),
            None => Ok(None),
        }
    }
}

fn source_tag(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn read_pdf(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    // pdf-extract panics on some malformed inputs; contain it to this file.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Operation(format!("pdf extraction failed: {e}"))),
        Err(_) => Err(Error::Operation("pdf extractor panicked".to_string())),
    }
}
