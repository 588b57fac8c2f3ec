#![allow(dead_code)]

use async_trait::async_trait;
use research_chatbot::config::Config;
use research_chatbot::document::{Document, Page};
use research_chatbot::embeddings::{Embedding, EmbeddingClient};
use research_chatbot::error::{RagError, Result};
use research_chatbot::llm::{LanguageModel, TextStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const DIMENSION: usize = 32;

/// Bag-of-words embedder: every word increments one of 32 buckets
pub struct HashEmbedder {
    model: String,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_model("hash-embedder")
    }

    pub fn with_model(model: &str) -> Self {
        HashEmbedder {
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut values = vec![0.0f32; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            // FNV-1a, stable across runs
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            values[(hash % DIMENSION as u64) as usize] += 1.0;
        }
        // Keep empty texts off the zero vector
        values[0] += 0.01;
        Ok(Embedding::from(values))
    }
}

/// Answers with the prompt it was given and remembers every prompt
#[derive(Default)]
pub struct EchoModel {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl EchoModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn record(&self, prompt: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        Ok(prompt.to_string())
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        self.record(prompt);
        let fragments: Vec<Result<String>> = prompt
            .split_inclusive('\n')
            .map(|line| Ok(line.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

/// Fails every call, or breaks off streams after one fragment
#[derive(Default)]
pub struct FailingModel {
    calls: AtomicUsize,
}

impl FailingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FailingModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::provider("fake", "model unavailable"))
    }

    async fn stream_complete(&self, _prompt: &str) -> Result<TextStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fragments = vec![
            Ok("partial ".to_string()),
            Err(RagError::provider("fake", "connection reset")),
        ];
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

/// Configuration that never reads the process environment
pub fn test_config(data_dir: &Path, persist_dir: &Path) -> Config {
    let data_dir = data_dir.to_string_lossy().into_owned();
    let persist_dir = persist_dir.to_string_lossy().into_owned();
    Config::from_lookup(move |key| match key {
        "GOOGLE_API_KEY" => Some("test-key".to_string()),
        "DATA_DIR" => Some(data_dir.clone()),
        "PERSIST_DIR" => Some(persist_dir.clone()),
        _ => None,
    })
    .unwrap()
}

/// A paginated document as the PDF loader would produce it
pub fn pdf(file_name: &str, pages: &[&str]) -> Document {
    Document::from_pages(
        file_name,
        pages
            .iter()
            .enumerate()
            .map(|(i, text)| Page {
                label: Some((i + 1).to_string()),
                text: text.to_string(),
            })
            .collect(),
    )
}
