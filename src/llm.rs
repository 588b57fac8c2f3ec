use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Single-pass, finite sequence of answer fragments.
///
/// Dropping the stream releases whatever connection backs it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A generative model answering a fully assembled prompt
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the complete answer for a prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generate the answer as incremental fragments.
    ///
    /// The default implementation yields the output of [`complete`](LanguageModel::complete)
    /// as a single fragment.
    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let answer = self.complete(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(answer) })))
    }
}
