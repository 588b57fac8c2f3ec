use crate::chunking::{split_document, ChunkingOptions};
use crate::config::Config;
use crate::document::{DirectoryLoader, Document};
use crate::embeddings::EmbeddingClient;
use crate::error::{RagError, Result};
use crate::index::{IndexEntry, VectorIndex};
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds a [`VectorIndex`] from documents: chunk, embed, store
pub struct Indexer {
    embedder: Arc<dyn EmbeddingClient>,
    chunking: ChunkingOptions,
}

impl Indexer {
    pub fn new(config: &Config, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Indexer {
            embedder,
            chunking: config.chunking,
        }
    }

    /// Index a set of documents into a fresh index
    pub async fn index_documents<I>(&self, documents: I) -> Result<VectorIndex>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut index = VectorIndex::new(self.embedder.model());
        let mut document_count = 0;

        for document in documents {
            document_count += 1;

            // Split content into chunks
            let chunks = split_document(&document, &self.chunking);
            if chunks.is_empty() {
                warn!("No text to index in {}", document.file_name);
                continue;
            }
            debug!("Split {} into {} chunks", document.file_name, chunks.len());

            // Generate embeddings for the chunks
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != chunks.len() {
                return Err(RagError::provider(
                    self.embedder.model(),
                    format!(
                        "expected {} embeddings for {}, received {}",
                        chunks.len(),
                        document.file_name,
                        embeddings.len()
                    ),
                ));
            }

            let entries = chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
                .collect();
            index.add(entries)?;
        }

        if document_count == 0 {
            return Err(RagError::NotFound("no documents to index".to_string()));
        }
        if index.is_empty() {
            return Err(RagError::NotFound(
                "no text could be extracted from the documents".to_string(),
            ));
        }

        info!(
            "Indexed {} documents into {} chunks",
            document_count,
            index.len()
        );
        Ok(index)
    }

    /// Index every readable document in `dir`
    pub async fn index_directory(&self, dir: &Path) -> Result<VectorIndex> {
        let loader = DirectoryLoader::new(dir);

        // Text extraction is blocking, keep it off the async workers
        let documents = blocking(move || {
            let mut documents = loader.documents()?;
            let loaded: Vec<Document> = documents.by_ref().collect();
            if !documents.skipped().is_empty() {
                warn!(
                    "Skipped {} unreadable or unsupported files in {}",
                    documents.skipped().len(),
                    loader.dir().display()
                );
            }
            Ok(loaded)
        })
        .await?;

        self.index_documents(documents).await
    }

    /// Index a single file
    pub async fn index_file(&self, path: PathBuf) -> Result<VectorIndex> {
        let document = blocking(move || Document::from_file(&path)).await?;
        self.index_documents([document]).await
    }
}

/// Load the persisted index from `dir`, if there is one
pub async fn load_index(dir: PathBuf) -> Result<Option<VectorIndex>> {
    blocking(move || {
        if VectorIndex::exists(&dir) {
            VectorIndex::load(&dir).map(Some)
        } else {
            Ok(None)
        }
    })
    .await
}

/// Persist `index` to `dir` without blocking the async workers
pub async fn persist_index(index: Arc<VectorIndex>, dir: PathBuf) -> Result<()> {
    blocking(move || index.persist(&dir)).await
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}
