use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text_by_pages;
use std::fs;
use std::path::{Path, PathBuf};

/// A single page of extracted text
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Page label used in citations (1-based for PDFs, `None` for unpaginated files)
    pub label: Option<String>,
    pub text: String,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Where the document was read from
    pub path: PathBuf,
    /// The document's file name, used in citations
    pub file_name: String,
    /// The document's MIME type
    pub mime_type: String,
    /// Extracted text, one entry per page
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RagError::UnsupportedDocument(format!("invalid file name: {}", path.display())))?
            .to_string();

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type {} for {}", mime_type, file_name);

        let pages = read_document_pages(path, &mime_type)?;

        Ok(Document {
            path: path.to_path_buf(),
            file_name,
            mime_type,
            pages,
        })
    }

    /// Build a document from already extracted pages
    pub fn from_pages(file_name: impl Into<String>, pages: Vec<Page>) -> Self {
        let file_name = file_name.into();
        let mime_type = from_path(&file_name).first_or_octet_stream().to_string();
        Document {
            path: PathBuf::from(&file_name),
            file_name,
            mime_type,
            pages,
        }
    }
}

/// Read the pages of a document based on its MIME type
pub fn read_document_pages<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<Vec<Page>> {
    let path = file_path.as_ref();

    match mime_type {
        // Handle PDF documents
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let pages = extract_text_by_pages(path).map_err(|e| {
                RagError::UnsupportedDocument(format!(
                    "failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?;

            let pages: Vec<Page> = pages
                .iter()
                .enumerate()
                .map(|(i, text)| Page {
                    label: Some((i + 1).to_string()),
                    // PDF extraction can sometimes include excessive whitespace
                    text: normalize_whitespace(text),
                })
                .collect();

            if pages.iter().all(|page| page.text.is_empty()) {
                warn!("Extracted PDF content of {} is empty or contains only whitespace", path.display());
            }

            Ok(pages)
        }

        // Handle plain text documents
        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)?;
            Ok(vec![Page {
                label: None,
                text: normalize_whitespace(&content),
            }])
        }

        // Unsupported format
        _ => Err(RagError::UnsupportedDocument(format!(
            "{} ({}): only text and PDF files are supported",
            path.display(),
            mime_type
        ))),
    }
}

/// Scans an intake directory for documents
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryLoader { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List the directory and return a lazy iterator over its documents.
    ///
    /// Files are visited in file-name order. Hidden files and subdirectories
    /// are ignored. Nothing is read until the iterator is advanced.
    pub fn documents(&self) -> Result<Documents> {
        if !self.dir.is_dir() {
            return Err(RagError::NotFound(format!(
                "intake directory {} does not exist",
                self.dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.starts_with('.'));
            if path.is_file() && !hidden {
                paths.push(path);
            }
        }
        paths.sort();
        debug!("Found {} candidate files in {}", paths.len(), self.dir.display());

        Ok(Documents {
            paths: paths.into_iter(),
            skipped: Vec::new(),
        })
    }
}

/// A file the loader could not turn into a [`Document`]
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Lazy sequence of documents produced by [`DirectoryLoader::documents`]
#[derive(Debug)]
pub struct Documents {
    paths: std::vec::IntoIter<PathBuf>,
    skipped: Vec<SkippedFile>,
}

impl Documents {
    /// Files skipped so far, with the reason
    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }
}

impl Iterator for Documents {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        for path in self.paths.by_ref() {
            match Document::from_file(&path) {
                Ok(document) => return Some(document),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    self.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        None
    }
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    // Replace multiple consecutive newlines with double newlines (paragraph separator)
    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
                newline_count = 0;
                prev_char = '\n';
            }

            // Don't add consecutive spaces
            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}
