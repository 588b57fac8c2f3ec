use crate::document::Document;
use serde::{Deserialize, Serialize};

/// Bounds for the chunk windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    /// Upper bound on estimated tokens per chunk (before overlap is carried over)
    pub target_tokens: usize,
    /// Words repeated from the end of one chunk at the start of the next
    pub overlap_tokens: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        ChunkingOptions {
            target_tokens: 500,
            overlap_tokens: 50,
        }
    }
}

/// Citation metadata carried by every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    /// Page the chunk was taken from, `None` for unpaginated documents
    pub page_label: Option<String>,
    /// Position of the chunk within its document
    pub chunk_index: usize,
}

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

/// Split a document into chunks, page by page.
///
/// Chunks never cross a page boundary, so every chunk cites a single page.
pub fn split_document(document: &Document, options: &ChunkingOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for page in &document.pages {
        for text in split_into_chunks(&page.text, options) {
            let token_count = estimate_token_count(&text);
            chunks.push(Chunk {
                text,
                token_count,
                metadata: ChunkMetadata {
                    file_name: document.file_name.clone(),
                    page_label: page.label.clone(),
                    chunk_index: chunks.len(),
                },
            });
        }
    }

    chunks
}

/// A piece of text that is packed into chunks as a whole
struct Unit<'a> {
    text: &'a str,
    tokens: usize,
    /// Separator placed before this unit when it follows another one
    separator: &'static str,
}

/// Split text into chunks of approximately `target_tokens` tokens
pub fn split_into_chunks(text: &str, options: &ChunkingOptions) -> Vec<String> {
    let target = options.target_tokens.max(1);

    // First, split by paragraphs
    let mut units = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let paragraph_tokens = estimate_token_count(paragraph);
        if paragraph_tokens <= target {
            units.push(Unit {
                text: paragraph,
                tokens: paragraph_tokens,
                separator: "\n\n",
            });
            continue;
        }

        // A single paragraph is too large, split it into sentences
        let mut separator = "\n\n";
        for sentence in paragraph.split_inclusive(['.', '!', '?', '\n']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let sentence_tokens = estimate_token_count(sentence);
            if sentence_tokens <= target {
                units.push(Unit {
                    text: sentence,
                    tokens: sentence_tokens,
                    separator,
                });
            } else {
                for words in split_words(sentence, target) {
                    units.push(Unit {
                        text: words,
                        tokens: estimate_token_count(words),
                        separator,
                    });
                    separator = " ";
                }
            }
            separator = " ";
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for unit in units {
        if current_tokens + unit.tokens > target && !current.is_empty() {
            chunks.push(current.clone());

            // Start a new chunk with overlap from the previous one
            current = overlap_tail(&current, options.overlap_tokens);
            current_tokens = estimate_token_count(&current);
        }

        if !current.is_empty() {
            current.push_str(unit.separator);
        }
        current.push_str(unit.text);
        current_tokens += unit.tokens;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Greedily group the words of an oversize sentence into runs of at most `target` tokens
fn split_words(sentence: &str, target: usize) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut tokens = 0;

    for (offset, word) in word_spans(sentence) {
        let word_tokens = estimate_token_count(word);
        if let Some(run_start) = start {
            if tokens + word_tokens > target {
                runs.push(&sentence[run_start..end]);
                start = None;
                tokens = 0;
            }
        }
        if start.is_none() {
            start = Some(offset);
        }
        end = offset + word.len();
        tokens += word_tokens;
    }

    if let Some(run_start) = start {
        runs.push(&sentence[run_start..end]);
    }

    runs
}

/// Whitespace-separated words together with their byte offsets
fn word_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_whitespace().map(move |word| {
        // `word` is a subslice of `text`, so the pointer difference is its offset
        let offset = word.as_ptr() as usize - text.as_ptr() as usize;
        (offset, word)
    })
}

/// The last `words` whitespace-separated words of `text`
fn overlap_tail(text: &str, words: usize) -> String {
    if words == 0 {
        return String::new();
    }

    let spans: Vec<(usize, &str)> = word_spans(text).collect();
    match spans.len().checked_sub(words) {
        Some(start) if start > 0 => text[spans[start].0..].to_string(),
        // The whole chunk would be carried, which would repeat it verbatim
        _ => String::new(),
    }
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
