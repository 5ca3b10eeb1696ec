//! Semantic cache gateway.
//!
//! A transparent HTTP proxy in front of an LLM chat-completion API that
//! serves cached responses for byte-identical or semantically similar
//! queries. Redis Stack provides JSON storage and the HNSW vector index;
//! an OpenAI-compatible embeddings endpoint turns queries into vectors.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

mod api_types;
mod cache;
mod config;
mod embedding;
mod middleware;
mod observability;
mod proxy;
mod routes;

#[cfg(test)]
mod tests;

use cache::{CacheService, RedisCacheService, RedisStore};
use config::Config;
use embedding::{Embedder, EmbeddingClient};
use observability::Stats;
use proxy::{Upstream, UpstreamProxy};

/// Deadline for the startup Redis connectivity check.
const STARTUP_PING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
/// Bound on the graceful-shutdown drain of background tasks.
const SHUTDOWN_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Store handle, kept alongside the cache service for the health probe.
    pub store: Arc<RedisStore>,
    pub cache: Arc<dyn CacheService>,
    pub embedder: Arc<dyn Embedder>,
    pub upstream: Arc<dyn Upstream>,
    pub stats: Arc<Stats>,
    /// Tracks write-behind tasks so shutdown can drain them.
    pub task_tracker: TaskTracker,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let task_tracker = TaskTracker::new();

        let store = Arc::new(RedisStore::connect(&config.redis_url)?);
        tokio::time::timeout(STARTUP_PING_TIMEOUT, store.ping())
            .await
            .map_err(|_| "timed out connecting to redis")??;
        tracing::info!(url = %config.redis_url, "connected to redis");

        let cache = Arc::new(
            RedisCacheService::new(
                store.clone(),
                config.embedding_dimensions,
                config.cache_ttl(),
                task_tracker.clone(),
            )
            .await?,
        );
        tracing::info!("cache service initialized");

        let embedder = Arc::new(EmbeddingClient::new(
            config.embedding_url.clone(),
            config.embedding_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )?);
        tracing::info!(model = %config.embedding_model, "embedding service initialized");

        let upstream = Arc::new(UpstreamProxy::new(
            &config.upstream_url,
            config.upstream_api_key.clone(),
        )?);
        tracing::info!(upstream_url = %config.upstream_url, "upstream proxy initialized");

        Ok(Self {
            config: Arc::new(config),
            store,
            cache,
            embedder,
            upstream,
            stats: Arc::new(Stats::new()),
            task_tracker,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    let chat = post(routes::chat_completions)
        .layer(axum::middleware::from_fn(middleware::body_buffer_middleware));

    Router::new()
        .route("/chat/completions", chat.clone())
        .route("/v1/chat/completions", chat)
        .route("/health", get(routes::health_check))
        .route("/stats", get(routes::stats_dashboard))
        .route("/stats/json", get(routes::stats_json))
        .route("/cache/clear", post(routes::cache_clear))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(middleware::MAX_BODY_BYTES))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    observability::init_tracing(config.log_format);
    tracing::info!("starting semantic cache gateway");
    tracing::info!(
        port = config.port,
        upstream_url = %config.upstream_url,
        similarity_threshold = config.similarity_threshold,
        "configuration loaded"
    );

    let port = config.port;
    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "bootstrap failed");
            std::process::exit(1);
        }
    };

    let task_tracker = state.task_tracker.clone();
    let app = build_app(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("server listening on http://{bind_addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker))
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }

    tracing::info!("server stopped");
}

/// Wait for SIGINT/SIGTERM, then drain background write-behind tasks
/// within a bounded window.
async fn shutdown_signal(task_tracker: TaskTracker) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, waiting for background tasks");

    task_tracker.close();
    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, task_tracker.wait()).await {
        Ok(()) => tracing::info!("all background tasks completed"),
        Err(_) => tracing::warn!("timeout waiting for background tasks"),
    }
}
