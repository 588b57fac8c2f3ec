use crate::chat::{ConversationState, Turn};
use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::error::{RagError, Result};
use crate::index::{ScoredEntry, VectorIndex};
use crate::llm::{LanguageModel, TextStream};
use crate::prompt::{build_prompt, preview, NO_PAGE};
use futures::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A retrieved chunk cited alongside an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub file: String,
    pub page: String,
    /// Beginning of the chunk text
    #[serde(rename = "text")]
    pub text_preview: String,
    pub score: f32,
}

/// An answer together with the chunks it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<Source>,
}

/// RAG (Retrieval-Augmented Generation) engine
///
/// Holds no per-conversation state: chat history lives in a
/// [`ConversationState`] owned by the caller, so one engine can serve many
/// sessions.
#[derive(Clone)]
pub struct RagEngine {
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LanguageModel>,
    index: Option<Arc<VectorIndex>>,
    top_k: usize,
    preview_chars: usize,
    history_turns: usize,
    system_prompt: String,
}

impl RagEngine {
    /// Create a new RAG engine. `index` is `None` until a document has been indexed.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LanguageModel>,
        index: Option<Arc<VectorIndex>>,
    ) -> Self {
        RagEngine {
            embedder,
            llm,
            index,
            top_k: config.similarity_top_k,
            preview_chars: config.preview_chars,
            history_turns: config.history_turns,
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn index(&self) -> Option<&Arc<VectorIndex>> {
        self.index.as_ref()
    }

    /// Check a question against the index without any network call
    pub fn validate(&self, question: &str) -> Result<&Arc<VectorIndex>> {
        let index = self.index.as_ref().ok_or(RagError::IndexNotReady)?;

        if question.trim().is_empty() {
            return Err(RagError::InvalidRequest("question is empty".to_string()));
        }
        if index.embedding_model() != self.embedder.model() {
            return Err(RagError::ConfigMismatch(format!(
                "index was built with embedding model {} but queries use {}",
                index.embedding_model(),
                self.embedder.model()
            )));
        }
        Ok(index)
    }

    /// Embed the question and return the top-K most similar index entries
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredEntry>> {
        let index = self.validate(question)?;

        // Get embedding for the question
        let embedding = self.embedder.embed(question).await?;

        // Retrieve relevant chunks
        index.search(&embedding.values, self.top_k)
    }

    /// Answer a question without conversation memory
    pub async fn query(&self, question: &str) -> Result<QueryResult> {
        let (prompt, sources) = self.prepare(question, &[]).await?;
        let answer = self.llm.complete(&prompt).await?;
        Ok(QueryResult { answer, sources })
    }

    /// Answer a question using prior turns, appending the turn on success
    pub async fn chat(&self, state: &mut ConversationState, question: &str) -> Result<QueryResult> {
        let (prompt, sources) = self
            .prepare(question, state.recent(self.history_turns))
            .await?;
        let answer = self.llm.complete(&prompt).await?;

        state.push(question.trim().to_string(), answer.clone());
        Ok(QueryResult { answer, sources })
    }

    /// Stream the answer to a question without conversation memory
    pub async fn stream_query(&self, question: &str) -> Result<StreamingAnswer<'static>> {
        let (prompt, sources) = self.prepare(question, &[]).await?;
        let fragments = self.llm.stream_complete(&prompt).await?;
        Ok(StreamingAnswer::new(sources, fragments, None))
    }

    /// Stream the answer to a chat turn.
    ///
    /// The turn is appended to `state` only once the stream has been drained
    /// without error.
    pub async fn stream_chat<'a>(
        &self,
        state: &'a mut ConversationState,
        question: &str,
    ) -> Result<StreamingAnswer<'a>> {
        let (prompt, sources) = self
            .prepare(question, state.recent(self.history_turns))
            .await?;
        let fragments = self.llm.stream_complete(&prompt).await?;
        Ok(StreamingAnswer::new(
            sources,
            fragments,
            Some((state, question.trim().to_string())),
        ))
    }

    async fn prepare(&self, question: &str, history: &[Turn]) -> Result<(String, Vec<Source>)> {
        let hits = self.retrieve(question).await?;
        debug!("Building prompt from {} chunks and {} prior turns", hits.len(), history.len());

        let prompt = build_prompt(&self.system_prompt, &hits, history, question);
        let sources = hits.iter().map(|hit| self.source(hit)).collect();
        Ok((prompt, sources))
    }

    fn source(&self, hit: &ScoredEntry) -> Source {
        let chunk = &hit.entry.chunk;
        Source {
            file: chunk.metadata.file_name.clone(),
            page: chunk
                .metadata
                .page_label
                .clone()
                .unwrap_or_else(|| NO_PAGE.to_string()),
            text_preview: preview(&chunk.text, self.preview_chars),
            score: hit.score,
        }
    }
}

/// An answer being received fragment by fragment
pub struct StreamingAnswer<'a> {
    sources: Vec<Source>,
    fragments: TextStream,
    answer: String,
    /// Where to record the turn once the answer is complete
    commit: Option<(&'a mut ConversationState, String)>,
    finished: bool,
}

impl<'a> StreamingAnswer<'a> {
    fn new(
        sources: Vec<Source>,
        fragments: TextStream,
        commit: Option<(&'a mut ConversationState, String)>,
    ) -> Self {
        StreamingAnswer {
            sources,
            fragments,
            answer: String::new(),
            commit,
            finished: false,
        }
    }

    /// Citations for this answer, available before the first fragment
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Next fragment of the answer, `None` once the stream is exhausted
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }

        match self.fragments.next().await {
            Some(Ok(fragment)) => {
                self.answer.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            None if self.answer.is_empty() => {
                self.finish();
                Some(Err(RagError::provider("llm", "no response generated")))
            }
            None => {
                if let Some((state, question)) = self.commit.take() {
                    state.push(question, self.answer.clone());
                }
                self.finish();
                None
            }
        }
    }

    /// Drain the stream into a complete result
    pub async fn collect(mut self) -> Result<QueryResult> {
        while let Some(fragment) = self.next_fragment().await {
            fragment?;
        }
        Ok(QueryResult {
            answer: self.answer,
            sources: self.sources,
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.commit = None;
    }
}
