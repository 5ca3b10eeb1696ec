//! The caching pipeline for chat completion requests.
//!
//! Flow per request: buffered body → fingerprint → exact lookup →
//! embedding → vector search → upstream forward → write-behind. Cache and
//! embedding failures degrade gracefully; only an upstream failure is
//! surfaced to the client.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use http::{HeaderName, HeaderValue, StatusCode, header};
use rand::Rng;

use crate::{
    AppState,
    api_types::{ChatCompletionRequest, error_response},
    cache::{CacheEntry, CacheKeys},
    middleware::BufferedBody,
};

pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-status");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Response headers that must not be replayed from the upstream exchange.
/// Content-Length is recomputed from the buffered body; the rest are
/// hop-by-hop.
const SKIPPED_RESPONSE_HEADERS: [HeaderName; 5] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::UPGRADE,
];

/// Generate a request identifier: `req-` followed by 16 hex characters.
fn generate_request_id() -> String {
    format!("req-{:016x}", rand::thread_rng().r#gen::<u64>())
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

pub async fn chat_completions(State(state): State<AppState>, req: Request) -> Response {
    let started = Instant::now();
    let request_id = generate_request_id();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query_string = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();

    tracing::info!(request_id = %request_id, path = %path, method = %method, "processing request");

    let Some(BufferedBody(body)) = req.extensions().get::<BufferedBody>().cloned() else {
        state.stats.record_error();
        tracing::error!(request_id = %request_id, "request body not available");
        return error_response(
            StatusCode::BAD_REQUEST,
            "Request body not available",
            "invalid_request_error",
        );
    };

    let chat_req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            state.stats.record_error();
            tracing::error!(request_id = %request_id, error = %e, "failed to parse request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid request format",
                "invalid_request_error",
            );
        }
    };

    let query_text = chat_req.user_query();
    if query_text.is_empty() {
        state.stats.record_error();
        tracing::error!(request_id = %request_id, "no user messages in request");
        return error_response(
            StatusCode::BAD_REQUEST,
            "No user messages found in request",
            "invalid_request_error",
        );
    }

    let ctx = PipelineContext {
        state: &state,
        request_id: &request_id,
        started,
        method,
        path,
        query_string,
        headers,
        body,
    };

    // Streaming responses are never cached; skip both lookup tiers.
    if chat_req.stream {
        tracing::info!(request_id = %request_id, "streaming request, bypassing cache");
        return ctx.forward_to_upstream(None, &query_text).await;
    }

    let query_hash = CacheKeys::fingerprint(&query_text);
    tracing::info!(
        request_id = %request_id,
        query_hash = %query_hash,
        query_length = query_text.len(),
        "query extracted"
    );

    // Tier 1: exact fingerprint match.
    match ctx.state.cache.check_exact_match(&query_hash).await {
        Ok(Some(entry)) => return ctx.serve_cached(entry, 1.0),
        Ok(None) => {}
        Err(e) => {
            // Fail open: a broken store must not break the request.
            tracing::error!(request_id = %request_id, error = %e, "exact match check failed");
        }
    }

    tracing::info!(request_id = %request_id, "no exact match, generating embedding");

    // Tier 2: embed, then nearest-neighbour search.
    let embed_start = Instant::now();
    let embedding = match ctx.state.embedder.embed(&query_text).await {
        Ok(vector) => vector,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                embed_latency_ms = elapsed_ms(embed_start),
                "embedding generation failed"
            );
            // No vector means nothing useful to store for future
            // semantic lookups either.
            return ctx.forward_to_upstream(None, &query_text).await;
        }
    };
    tracing::info!(
        request_id = %request_id,
        embed_latency_ms = elapsed_ms(embed_start),
        dimensions = embedding.len(),
        "embedding generated"
    );

    let search_start = Instant::now();
    match ctx
        .state
        .cache
        .search_similar(&embedding, ctx.state.config.similarity_threshold)
        .await
    {
        Ok((Some(entry), similarity)) => {
            tracing::info!(
                request_id = %request_id,
                search_latency_ms = elapsed_ms(search_start),
                similarity,
                "vector search completed"
            );
            ctx.serve_cached(entry, similarity)
        }
        Ok((None, similarity)) => {
            tracing::info!(
                request_id = %request_id,
                search_latency_ms = elapsed_ms(search_start),
                similarity,
                "cache miss, forwarding to upstream"
            );
            ctx.forward_to_upstream(Some((query_hash, embedding)), &query_text)
                .await
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                search_latency_ms = elapsed_ms(search_start),
                "vector search failed"
            );
            ctx.forward_to_upstream(Some((query_hash, embedding)), &query_text)
                .await
        }
    }
}

/// Per-request data threaded through the terminal pipeline stages.
struct PipelineContext<'a> {
    state: &'a AppState,
    request_id: &'a str,
    started: Instant,
    method: http::Method,
    path: String,
    query_string: Option<String>,
    headers: http::HeaderMap,
    body: bytes::Bytes,
}

impl PipelineContext<'_> {
    /// Serve a cached entry: 200, HIT marker, stored body verbatim.
    fn serve_cached(&self, entry: CacheEntry, similarity: f64) -> Response {
        let total_latency_ms = elapsed_ms(self.started);
        self.state.stats.record_hit(total_latency_ms);

        let mut response = Response::new(Body::from(entry.llm_response.into_bytes()));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        self.insert_request_id(headers);

        tracing::info!(
            request_id = %self.request_id,
            status = "cache_hit",
            total_latency_ms,
            similarity,
            "request completed"
        );
        response
    }

    /// Forward to the upstream, mirror its response, and enqueue a
    /// write-behind when the exchange succeeded and a vector is in hand.
    async fn forward_to_upstream(
        &self,
        cacheable: Option<(String, Vec<f32>)>,
        query_text: &str,
    ) -> Response {
        let forwarded = self
            .state
            .upstream
            .forward(
                self.method.clone(),
                &self.path,
                self.query_string.as_deref(),
                &self.headers,
                self.body.clone(),
            )
            .await;

        let upstream = match forwarded {
            Ok(response) => response,
            Err(e) => {
                let total_latency_ms = elapsed_ms(self.started);
                self.state.stats.record_error();
                tracing::error!(
                    request_id = %self.request_id,
                    error = %e,
                    status = "error",
                    total_latency_ms,
                    "upstream request failed"
                );
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    "Upstream request failed",
                    "upstream_error",
                );
            }
        };

        let total_latency_ms = elapsed_ms(self.started);

        // Write-behind: only successful completions with an embedding are
        // worth keeping for future lookups.
        if upstream.status == StatusCode::OK {
            if let Some((query_hash, embedding)) = cacheable {
                let entry = CacheEntry {
                    id: String::new(),
                    query_hash: query_hash.clone(),
                    user_query: query_text.to_string(),
                    embedding,
                    llm_response: String::from_utf8_lossy(&upstream.body).into_owned(),
                    created_at: chrono::Utc::now().timestamp(),
                };
                self.state.cache.store_async(entry);
                tracing::info!(
                    request_id = %self.request_id,
                    query_hash = %query_hash,
                    "cache entry queued for storage"
                );
            }
        }

        self.state.stats.record_miss(total_latency_ms);
        tracing::info!(
            request_id = %self.request_id,
            status = "cache_miss",
            upstream_status = %upstream.status,
            total_latency_ms,
            "request completed"
        );

        let mut response = Response::new(Body::from(upstream.body));
        *response.status_mut() = upstream.status;
        let headers = response.headers_mut();
        for (name, value) in upstream.headers.iter() {
            if SKIPPED_RESPONSE_HEADERS.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        self.insert_request_id(headers);

        response
    }

    fn insert_request_id(&self, headers: &mut http::HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(self.request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }
}
