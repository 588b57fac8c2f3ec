use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

/// Turns text into fixed-length vectors.
///
/// One client is configured with one embedding model and must be used for
/// both indexing and querying; the index remembers [`model`](EmbeddingClient::model)
/// and refuses queries embedded with another one.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Identifier of the embedding model, recorded in the index
    fn model(&self) -> &str;

    /// Generate an embedding for a query text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple document texts, one per input, in order.
    ///
    /// The default implementation calls [`embed`](EmbeddingClient::embed) sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}
