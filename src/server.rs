//! HTTP service: document upload, grounded queries and streamed answers.

use crate::chat::ConversationState;
use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::indexer::{persist_index, Indexer};
use crate::llm::LanguageModel;
use crate::rag::{QueryResult, RagEngine};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::Stream;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;

/// Largest accepted upload
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const NO_INDEX_DETAIL: &str = "No index found. Upload a file first.";

/// State shared by all handlers
pub struct AppState {
    config: Config,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LanguageModel>,
    indexer: Indexer,
    /// Live index, replaced as a whole after each upload
    index: RwLock<Option<Arc<VectorIndex>>>,
    /// Held for the duration of an upload so rebuilds never interleave
    uploads: Mutex<()>,
    sessions: Mutex<HashMap<String, Session>>,
}

/// Chat history kept for one `session_id`
struct Session {
    state: ConversationState,
    last_used: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LanguageModel>,
        index: Option<VectorIndex>,
    ) -> Arc<Self> {
        let indexer = Indexer::new(&config, embedder.clone());
        Arc::new(AppState {
            config,
            embedder,
            llm,
            indexer,
            index: RwLock::new(index.map(Arc::new)),
            uploads: Mutex::new(()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// An engine over the index as it is right now
    pub async fn engine(&self) -> RagEngine {
        let index = self.index.read().await.clone();
        RagEngine::new(&self.config, self.embedder.clone(), self.llm.clone(), index)
    }

    pub async fn is_indexed(&self) -> bool {
        self.index.read().await.is_some()
    }

    /// A copy of the session's history. The lock is not held while the model runs,
    /// so concurrent requests on one session are last-writer-wins.
    async fn session(&self, id: &str) -> ConversationState {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(|session| session.state.clone())
            .unwrap_or_default()
    }

    /// Store a session's history, evicting the least recently used session
    /// once more than `max_sessions` are held
    async fn save_session(&self, id: &str, state: ConversationState) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id.to_string(),
            Session {
                state,
                last_used: Instant::now(),
            },
        );

        while sessions.len() > self.config.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, session)| session.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            debug!("Evicting least recently used session {}", oldest);
            sessions.remove(&oldest);
        }
    }

    /// Forget a session's history. Returns whether the session existed.
    pub async fn end_session(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    /// Save an uploaded file, rebuild the index from it and swap it in
    async fn ingest(&self, file_name: &str, data: &[u8]) -> Result<usize> {
        let _guard = self.uploads.lock().await;

        tokio::fs::create_dir_all(&self.config.data_dir).await?;
        let path = self.config.data_dir.join(file_name);
        tokio::fs::write(&path, data).await?;

        let index = Arc::new(self.indexer.index_file(path).await?);
        persist_index(index.clone(), self.config.persist_dir.clone()).await?;

        let chunks = index.len();
        *self.index.write().await = Some(index);
        Ok(chunks)
    }
}

/// An error response with a `{"detail": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        ApiError {
            status,
            detail: detail.into(),
        }
    }
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        let status = match &e {
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::ConfigMismatch(_) => StatusCode::CONFLICT,
            RagError::Provider { .. } => StatusCode::BAD_GATEWAY,
            RagError::IndexNotReady | RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RagError::UnsupportedDocument(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RagError::Config(_) | RagError::Io(_) | RagError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let detail = match e {
            RagError::IndexNotReady => NO_INDEX_DETAIL.to_string(),
            e => e.to_string(),
        };
        ApiError { status, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// Keeps conversation history across requests that share it
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub filename: String,
    pub message: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .route("/session/:id", delete(end_session))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `addr` until the process is stopped
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "indexed": state.is_indexed().await }))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> std::result::Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(sanitize_file_name)
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid file name"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing multipart field 'file'"))?;
    info!("Received upload {} ({} bytes)", file_name, data.len());

    match state.ingest(&file_name, &data).await {
        Ok(chunks) => {
            info!("Indexed {} into {} chunks", file_name, chunks);
            Ok(Json(UploadResponse {
                status: "success".to_string(),
                filename: file_name,
                message: "File indexed successfully".to_string(),
            }))
        }
        // Any indexing failure is a server error for the uploader
        Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> std::result::Result<Json<QueryResult>, ApiError> {
    let engine = state.engine().await;

    let result = match &request.session_id {
        Some(id) => {
            let mut session = state.session(id).await;
            let result = engine.chat(&mut session, &request.question).await?;
            state.save_session(id, session).await;
            result
        }
        None => engine.query(&request.question).await?,
    };
    Ok(Json(result))
}

async fn query_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    // Refuse requests that cannot succeed before committing to a 200 event stream
    let engine = state.engine().await;
    engine.validate(&request.question)?;

    let stream = async_stream::stream! {
        let mut session = match &request.session_id {
            Some(id) => Some(state.session(id).await),
            None => None,
        };

        let answer = match session.as_mut() {
            Some(session) => engine.stream_chat(session, &request.question).await,
            None => engine.stream_query(&request.question).await,
        };
        let mut answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                yield Ok(error_event(e));
                return;
            }
        };

        yield Ok(json_event("sources", answer.sources()));
        while let Some(fragment) = answer.next_fragment().await {
            match fragment {
                // SSE data may not carry carriage returns
                Ok(fragment) => yield Ok(Event::default().event("token").data(fragment.replace('\r', ""))),
                Err(e) => {
                    yield Ok(error_event(e));
                    return;
                }
            }
        }
        drop(answer);

        if let (Some(id), Some(session)) = (&request.session_id, session) {
            state.save_session(id, session).await;
        }
        yield Ok(Event::default().event("done").data(""));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> std::result::Result<StatusCode, ApiError> {
    if state.end_session(&id).await {
        info!("Ended session {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RagError::NotFound(format!("session {}", id)).into())
    }
}

fn json_event<T: Serialize + ?Sized>(name: &str, value: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn error_event(e: RagError) -> Event {
    warn!("Streaming query failed: {}", e);
    json_event("error", &json!({ "detail": ApiError::from(e).detail }))
}

/// Keep only the final path component of a client-supplied name; hidden names are refused
fn sanitize_file_name(name: &str) -> Option<String> {
    let name = Path::new(name.trim()).file_name()?.to_str()?;
    if name.is_empty() || name.starts_with('.') {
        None
    } else {
        Some(name.to_string())
    }
}
