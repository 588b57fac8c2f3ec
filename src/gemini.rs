use crate::config::{Config, GenerationOptions};
use crate::embeddings::{Embedding, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::llm::{LanguageModel, TextStream};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "gemini";

/// Client for interacting with Gemini API
///
/// One client serves both the embedding model and the generative model named
/// in [`Config`].
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    embedding_model: String,
    embedding_dimensions: Option<u32>,
    llm_model: String,
    generation: GenerationOptions,
    embed_batch_size: usize,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RagError::provider(PROVIDER, format!("failed to build HTTP client: {}", e)))?;

        Ok(GeminiClient {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            embedding_model: model_path(&config.embedding_model),
            embedding_dimensions: config.embedding_dimensions,
            llm_model: model_path(&config.llm_model),
            generation: config.generation.clone(),
            embed_batch_size: config.embed_batch_size,
            client,
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, model, method)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .query(query)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::provider(
                PROVIDER,
                format!("API request failed: {} {}", status, api_error_message(&error_text)),
            ));
        }

        Ok(response)
    }

    fn embed_request<'a>(&'a self, text: &'a str, task_type: &'static str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: &self.embedding_model,
            content: Content::user(text),
            task_type,
            output_dimensionality: self.embedding_dimensions,
        }
    }

    fn generate_request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content::user(prompt)],
            generation_config: GenerationConfig {
                temperature: self.generation.temperature,
                top_p: self.generation.top_p,
                top_k: self.generation.top_k,
                max_output_tokens: self.generation.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl EmbeddingClient for GeminiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        debug!("Embedding query of {} bytes", text.len());
        let url = self.url(&self.embedding_model, "embedContent");
        let request = self.embed_request(text, "RETRIEVAL_QUERY");

        let response: EmbeddingResponse = self
            .post(&url, &[], &request)
            .await?
            .json()
            .await?;

        Ok(Embedding {
            values: response.embedding.values,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let url = self.url(&self.embedding_model, "batchEmbedContents");
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.embed_batch_size.max(1)) {
            debug!("Embedding batch of {} texts", batch.len());
            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|text| self.embed_request(text, "RETRIEVAL_DOCUMENT"))
                    .collect(),
            };

            let response: BatchEmbeddingResponse = self
                .post(&url, &[], &request)
                .await?
                .json()
                .await?;

            if response.embeddings.len() != batch.len() {
                return Err(RagError::provider(
                    PROVIDER,
                    format!(
                        "requested {} embeddings, received {}",
                        batch.len(),
                        response.embeddings.len()
                    ),
                ));
            }

            embeddings.extend(
                response
                    .embeddings
                    .into_iter()
                    .map(|data| Embedding { values: data.values }),
            );
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = self.url(&self.llm_model, "generateContent");
        let request = self.generate_request(prompt);

        let response: GenerateResponse = self
            .post(&url, &[], &request)
            .await?
            .json()
            .await?;

        let text = response.text();
        if text.is_empty() {
            return Err(RagError::provider(PROVIDER, response.empty_reason()));
        }
        Ok(text)
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let url = self.url(&self.llm_model, "streamGenerateContent");
        let request = self.generate_request(prompt);

        let response = self.post(&url, &[("alt", "sse")], &request).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| -> Result<String> {
                let event = event.map_err(|e| {
                    RagError::provider(PROVIDER, format!("failed to read stream: {}", e))
                })?;
                let chunk: GenerateResponse = serde_json::from_str(&event.data).map_err(|e| {
                    RagError::provider(PROVIDER, format!("invalid stream chunk: {}", e))
                })?;
                Ok(chunk.text())
            })
            .try_filter(|text: &String| futures::future::ready(!text.is_empty()));

        Ok(Box::pin(stream))
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::provider(PROVIDER, e.without_url().to_string())
    }
}

/// Prefix bare model names with `models/`, as the REST paths expect
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// Pull the human-readable message out of a Gemini error body, if there is one
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// Request/response structures for the Gemini API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<u32>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct BatchEmbeddingResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn user(text: &'a str) -> Self {
        Content {
            parts: vec![Part { text }],
            role: "user",
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    /// Text of the first candidate, all parts concatenated
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn empty_reason(&self) -> String {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return format!("prompt blocked: {}", reason);
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_ref()) {
            Some(reason) => format!("no response generated (finish reason {})", reason),
            None => "no response generated".to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GeminiClient {
        let config = Config::from_lookup(|key| match key {
            "GOOGLE_API_KEY" => Some("key".to_string()),
            "GEMINI_EMBEDDING_MODEL" => Some("gemini-embedding-001".to_string()),
            "GEMINI_EMBEDDING_DIMENSIONS" => Some("768".to_string()),
            _ => None,
        })
        .unwrap();
        GeminiClient::new(&config).unwrap()
    }

    #[test]
    fn test_model_path() {
        assert_eq!(model_path("gemini-embedding-001"), "models/gemini-embedding-001");
        assert_eq!(model_path("models/gemini-3-pro-preview"), "models/gemini-3-pro-preview");
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(client.model(), "models/gemini-embedding-001");
        assert_eq!(
            client.url(&client.llm_model, "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-preview:generateContent"
        );
    }

    #[test]
    fn test_embed_request_shape() {
        let client = client();
        let request = client.embed_request("hello", "RETRIEVAL_QUERY");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "models/gemini-embedding-001",
                "content": {"parts": [{"text": "hello"}], "role": "user"},
                "taskType": "RETRIEVAL_QUERY",
                "outputDimensionality": 768
            })
        );
    }

    #[test]
    fn test_generate_request_shape() {
        let client = client();
        let value = serde_json::to_value(client.generate_request("question")).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "question");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(value["generationConfig"]["topK"], 40);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello, "}, {"text": "world"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(response.text(), "Hello, world");
    }

    #[test]
    fn test_blocked_response() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert_eq!(response.text(), "");
        assert_eq!(response.empty_reason(), "prompt blocked: SAFETY");
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message("plain"), "plain");
    }
}
