//! Body-buffer pre-stage.
//!
//! Axum bodies can only be consumed once, but the pipeline needs the raw
//! bytes twice: to extract the query and to replay the request upstream.
//! This middleware buffers POST bodies, rejects syntactically invalid
//! JSON early, and hands the bytes to the handler via an extension.

use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use bytes::Bytes;
use http::{Method, StatusCode};

use crate::api_types::error_response;

/// Upper bound on a buffered request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// The buffered request body, stored in request extensions.
#[derive(Debug, Clone)]
pub struct BufferedBody(pub Bytes);

/// Buffer POST request bodies and validate JSON syntax.
///
/// Non-POST requests and bodiless requests pass through untouched. A
/// non-empty body that is not valid JSON is rejected with a 400 and an
/// OpenAI-shaped error before it reaches any handler.
pub async fn body_buffer_middleware(req: Request, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
                "invalid_request_error",
            );
        }
    };

    if !bytes.is_empty()
        && serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_err()
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Request body is not valid JSON",
            "invalid_request_error",
        );
    }

    let mut req = Request::from_parts(parts, Body::from(bytes.clone()));
    req.extensions_mut().insert(BufferedBody(bytes));

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::{Router, response::IntoResponse, routing::post};
    use tower::ServiceExt;

    use super::*;

    async fn echo_buffered(req: Request) -> Response {
        match req.extensions().get::<BufferedBody>() {
            Some(BufferedBody(bytes)) => {
                (StatusCode::OK, String::from_utf8_lossy(bytes).to_string()).into_response()
            }
            None => (StatusCode::OK, "no-buffer").into_response(),
        }
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", post(echo_buffered).get(echo_buffered))
            .layer(axum::middleware::from_fn(body_buffer_middleware))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn buffers_valid_json_post_body() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from(r#"{"hello":"world"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"hello":"world"}"#);
    }

    #[tokio::test]
    async fn rejects_invalid_json_with_400() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn empty_post_body_passes_through() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // An empty body is buffered as empty bytes, not rejected here;
        // the handler decides whether that is acceptable.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn get_requests_are_not_buffered() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "no-buffer");
    }
}
