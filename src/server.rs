//! HTTP API for asking questions about the indexed repository.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness, version, corpus and repository info |
//! | `POST` | `/api/query` | Run the query workflow |
//! | `POST` | `/api/index` | Start a background indexing pass |
//! | `GET`  | `/api/index/status` | Progress and outcome of the last pass |
//! | `POST` | `/api/search` | Raw similarity search, no answer synthesis |
//! | `GET`  | `/api/stats` | Corpus counts and pipeline settings |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `indexing_in_progress` (409),
//! `not_indexed` (503), `internal` (500).
//!
//! Workflow failures are not HTTP errors: `/api/query` always answers 200
//! with a complete result whose `error` field says what went wrong.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use repo_qa_core::models::{CorpusStats, IndexStats, MetadataFilter, ScoredChunk};
use repo_qa_core::PipelineError;

use crate::config::Config;
use crate::service::{IndexStart, QaService};
use crate::workflow::QueryResult;

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = QaService::build(config).await?;

    let stats = service.indexer.stats();
    info!(
        chunks = stats.chunk_count,
        documents = stats.document_count,
        persistent = stats.persistent,
        "corpus loaded"
    );

    let app = router(service);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes with permissive CORS, bound to `service`.
pub fn router(service: QaService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/query", post(handle_query))
        .route("/api/index", post(handle_index))
        .route("/api/index/status", get(handle_index_status))
        .route("/api/search", post(handle_search))
        .route("/api/stats", get(handle_stats))
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::IndexingInProgress => AppError {
                status: StatusCode::CONFLICT,
                code: "indexing_in_progress",
                message: err.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// Constructs a 503 error for queries against a corpus that was never built.
fn not_indexed(indexing: bool) -> AppError {
    let message = if indexing {
        "the repository is being indexed; try again when indexing finishes"
    } else {
        "the repository has not been indexed; POST /api/index first"
    };
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "not_indexed",
        message: message.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct RepositoryInfo {
    url: Option<String>,
    branch: String,
    owner: Option<String>,
    name: String,
    indexed: bool,
    indexing_in_progress: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    corpus: CorpusStats,
    repository: RepositoryInfo,
}

async fn handle_health(State(service): State<QaService>) -> Json<HealthResponse> {
    let repo = &service.config.repository;
    let (owner, _) = repo.owner_and_name();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        corpus: service.indexer.stats(),
        repository: RepositoryInfo {
            url: repo.url.clone(),
            branch: repo.branch.clone(),
            owner,
            name: repo.display_name(),
            indexed: service.is_indexed(),
            indexing_in_progress: service.indexer.is_indexing(),
        },
    })
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    /// Prior turns in any of the accepted shapes; malformed entries are dropped.
    #[serde(default)]
    chat_history: Vec<Value>,
}

async fn handle_query(
    State(service): State<QaService>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !service.is_indexed() {
        return Err(not_indexed(service.indexer.is_indexing()));
    }
    Ok(Json(service.workflow.run_query(query, &req.chat_history).await))
}

// ============ POST /api/index ============

#[derive(Deserialize, Default)]
struct IndexRequest {
    #[serde(default)]
    force_reindex: bool,
}

#[derive(Serialize)]
struct IndexResponse {
    status: IndexStart,
    message: String,
}

async fn handle_index(
    State(service): State<QaService>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    let status = service.start_indexing(req.force_reindex)?;
    let message = match status {
        IndexStart::Started if req.force_reindex => "re-indexing started in the background",
        IndexStart::Started => "indexing started in the background",
        IndexStart::AlreadyIndexed => {
            "repository is already indexed; pass force_reindex to rebuild"
        }
    };
    Ok(Json(IndexResponse {
        status,
        message: message.to_string(),
    }))
}

// ============ GET /api/index/status ============

#[derive(Serialize)]
struct IndexStatusResponse {
    in_progress: bool,
    last_indexed: Option<chrono::DateTime<chrono::Utc>>,
    document_count: usize,
    chunk_count: usize,
    stats: Option<IndexStats>,
    error: Option<String>,
}

async fn handle_index_status(State(service): State<QaService>) -> Json<IndexStatusResponse> {
    let corpus = service.indexer.stats();
    let status = service.index_status();
    Json(IndexStatusResponse {
        in_progress: service.indexer.is_indexing(),
        last_indexed: corpus.last_indexed,
        document_count: corpus.document_count,
        chunk_count: corpus.chunk_count,
        stats: status.stats,
        error: status.error.or(corpus.error),
    })
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    filter: MetadataFilter,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ScoredChunk>,
}

async fn handle_search(
    State(service): State<QaService>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = req.k.unwrap_or(service.config.retrieval.top_k);
    let results = service.indexer.search(&req.query, k, &req.filter).await;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /api/stats ============

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    corpus: CorpusStats,
    chunk_size: usize,
    chunk_overlap: usize,
    embedding_model: String,
    embedding_dims: usize,
    top_k: usize,
}

async fn handle_stats(State(service): State<QaService>) -> Json<StatsResponse> {
    let chunker = service.indexer.chunker();
    let embedder = service.indexer.index_handle().embedder();
    Json(StatsResponse {
        corpus: service.indexer.stats(),
        chunk_size: chunker.chunk_size(),
        chunk_overlap: chunker.chunk_overlap(),
        embedding_model: embedder.model_name().to_string(),
        embedding_dims: embedder.dims(),
        top_k: service.config.retrieval.top_k,
    })
}
